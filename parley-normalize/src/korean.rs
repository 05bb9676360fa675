//! Korean-specific cleanup: detached particles, number counters, quotes.
//!
//! All rules are cosmetic. They make the synthesized reading sound closer to
//! natural speech and never change meaning.

use crate::StageOutput;

/// Particles (조사) that are re-attached to the preceding word. Longer
/// particles come first so `에서` wins over `에`.
pub const PARTICLES: &[&str] = &[
    "에서", "한테", "으로", "은", "는", "이", "가", "을", "를", "와", "과", "도", "만", "에", "께",
    "로",
];

/// Counters (단위 명사) that get a space after a preceding number.
pub const COUNTERS: &[char] = &[
    '개', '명', '번', '살', '원', '시', '분', '초', '층', '권', '병', '잔', '대',
];

const CURLY_DOUBLE_QUOTES: &[char] = &['“', '”', '„', '″'];

/// Apply every Korean rule in order: particles, counters, quotes.
pub fn normalize_korean(text: &str) -> StageOutput {
    let particles = attach_particles(text);
    let counters = space_counters(&particles.text);
    let quotes = straighten_quotes(&counters.text);
    StageOutput::new(
        quotes.text,
        particles.count + counters.count + quotes.count,
    )
}

/// Remove spaces and tabs between a word and a detached particle.
///
/// A particle only counts as detached when no letter follows it, so `이번`
/// or `가방` after a space are left alone.
pub fn attach_particles(text: &str) -> StageOutput {
    let mut out = String::with_capacity(text.len());
    let mut count = 0;
    let mut rest = text;
    let mut prev: Option<char> = None;

    while let Some(c) = rest.chars().next() {
        if c == ' ' || c == '\t' {
            let run_len = rest.len() - rest.trim_start_matches([' ', '\t']).len();
            let after = &rest[run_len..];
            let follows_word = prev.is_some_and(|p| !p.is_whitespace());
            if follows_word && detached_particle(after).is_some() {
                count += 1;
                rest = after;
                continue;
            }
            out.push_str(&rest[..run_len]);
            prev = Some(' ');
            rest = after;
            continue;
        }
        out.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    StageOutput::new(out, count)
}

fn detached_particle(s: &str) -> Option<&'static str> {
    PARTICLES.iter().copied().find(|p| {
        s.strip_prefix(p)
            .is_some_and(|tail| !tail.chars().next().is_some_and(char::is_alphabetic))
    })
}

/// Insert a space between a run of digits and a counter noun (`3개` → `3 개`).
pub fn space_counters(text: &str) -> StageOutput {
    let mut out = String::with_capacity(text.len() + 8);
    let mut count = 0;
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if COUNTERS.contains(&c) && prev.is_some_and(|p| p.is_ascii_digit()) {
            out.push(' ');
            count += 1;
        }
        out.push(c);
        prev = Some(c);
    }

    StageOutput::new(out, count)
}

/// Replace curly and low double quotes with `"`.
pub fn straighten_quotes(text: &str) -> StageOutput {
    let mut count = 0;
    let out = text
        .chars()
        .map(|c| {
            if CURLY_DOUBLE_QUOTES.contains(&c) {
                count += 1;
                '"'
            } else {
                c
            }
        })
        .collect();
    StageOutput::new(out, count)
}
