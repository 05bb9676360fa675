//! Spacing around punctuation.
//!
//! Speech engines use punctuation for prosody, and stray spaces before a
//! comma or a missing space after a period both produce odd pauses.

use crate::StageOutput;

/// Marks whose surrounding spacing is normalized.
pub const PUNCTUATION: &[char] = &['.', '!', '?', ',', ';', '。', '！', '？'];

const CLOSERS: &[char] = &[')', ']', '}', '”', '’', '」', '』', '》', '〉'];

fn is_punct(c: char) -> bool {
    PUNCTUATION.contains(&c)
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Normalize spacing around punctuation.
///
/// Spaces and tabs before a mark are removed. After a mark there is exactly
/// one space, unless the mark ends the text or a line, or is followed by
/// another mark or a closing bracket. `3.14`, `1,000` and `example.com` are
/// left alone, as is spacing before a straight quote. Applying the function
/// twice gives the same text as applying it once.
pub fn fix_punctuation(text: &str) -> StageOutput {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut count = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if is_blank(c) {
            let run_end = skip_blanks(&chars, i);
            let before_mark = run_end < chars.len() && is_punct(chars[run_end]);
            let after_text = i > 0 && !chars[i - 1].is_whitespace();
            if before_mark && after_text {
                count += 1;
            } else {
                out.extend(&chars[i..run_end]);
            }
            i = run_end;
            continue;
        }

        if !is_punct(c) {
            out.push(c);
            i += 1;
            continue;
        }

        out.push(c);
        let run_start = i + 1;
        let run_end = skip_blanks(&chars, run_start);
        let run = &chars[run_start..run_end];
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(run_end).copied();

        match space_after(c, prev, next, run.is_empty()) {
            Spacing::Keep => out.extend(run),
            Spacing::One => {
                out.push(' ');
                if run != [' '] {
                    count += 1;
                }
            }
            Spacing::None => {
                if !run.is_empty() {
                    count += 1;
                }
            }
        }
        i = run_end;
    }

    StageOutput::new(out, count)
}

enum Spacing {
    Keep,
    One,
    None,
}

fn space_after(mark: char, prev: Option<char>, next: Option<char>, tight: bool) -> Spacing {
    let Some(next) = next else {
        return Spacing::None;
    };
    if next == '\n' || next == '\r' || is_punct(next) || CLOSERS.contains(&next) {
        return Spacing::None;
    }
    if next == '"' || next == '\'' {
        return Spacing::Keep;
    }
    if tight {
        if let Some(prev) = prev {
            let between_digits = prev.is_ascii_digit() && next.is_ascii_digit();
            let inside_word =
                mark == '.' && prev.is_ascii_alphanumeric() && next.is_ascii_alphanumeric();
            if (between_digits && (mark == '.' || mark == ',')) || inside_word {
                return Spacing::Keep;
            }
        }
    }
    Spacing::One
}

fn skip_blanks(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && is_blank(chars[i]) {
        i += 1;
    }
    i
}
