//! Sentence counting and long-sentence splitting.

use crate::StageOutput;

const TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];
const CLAUSE_COMMAS: &[char] = &[',', '，'];

fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

/// Number of non-empty sentences, splitting on runs of `.!?。！？`.
pub fn count_sentences(text: &str) -> usize {
    text.split(is_terminator)
        .filter(|piece| !piece.trim().is_empty())
        .count()
}

/// Split every sentence longer than `max_len` characters at the clause comma
/// closest to its midpoint. The comma becomes a period.
///
/// Each long sentence is split at most once; sentences without a usable comma
/// are left intact. Commas between digits are never split points.
pub fn split_long_sentences(text: &str, max_len: usize) -> StageOutput {
    let chars: Vec<char> = text.chars().collect();
    let mut out: Vec<char> = Vec::with_capacity(chars.len());
    let mut count = 0;

    for (start, end) in sentence_spans(&chars) {
        let mut sentence = chars[start..end].to_vec();
        let trimmed_len = sentence
            .iter()
            .collect::<String>()
            .trim()
            .chars()
            .count();
        if trimmed_len > max_len {
            if let Some(at) = split_point(&sentence) {
                sentence[at] = '.';
                count += 1;
            }
        }
        out.extend(sentence);
    }

    StageOutput::new(out.into_iter().collect(), count)
}

/// `(start, end)` char ranges, each ending after a run of terminators.
fn sentence_spans(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        if is_terminator(chars[i]) {
            while i < chars.len() && is_terminator(chars[i]) {
                i += 1;
            }
            spans.push((start, i));
            start = i;
        } else {
            i += 1;
        }
    }
    if start < chars.len() {
        spans.push((start, chars.len()));
    }
    spans
}

fn split_point(sentence: &[char]) -> Option<usize> {
    let mid = sentence.len() / 2;
    sentence
        .iter()
        .enumerate()
        .filter(|&(i, c)| {
            CLAUSE_COMMAS.contains(c)
                && i > 0
                && i + 1 < sentence.len()
                && !(sentence[i - 1].is_ascii_digit() && sentence[i + 1].is_ascii_digit())
        })
        .min_by_key(|&(i, _)| i.abs_diff(mid))
        .map(|(i, _)| i)
}
