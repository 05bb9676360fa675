//! Citation marker removal.
//!
//! The text path asks the model to cite sources as `[출처 N]`; models also
//! produce `[source N]` and bare `[N]`. None of them should be spoken.

use std::sync::OnceLock;

use regex::Regex;

use crate::{cached_regex, StageOutput};

static KOREAN: OnceLock<Option<Regex>> = OnceLock::new();
static ENGLISH: OnceLock<Option<Regex>> = OnceLock::new();
static BARE: OnceLock<Option<Regex>> = OnceLock::new();

fn patterns() -> [Option<&'static Regex>; 3] {
    [
        cached_regex(&KOREAN, r"[ \t]*\[출처\s*\d+\]"),
        cached_regex(&ENGLISH, r"(?i)[ \t]*\[source\s*\d+\]"),
        cached_regex(&BARE, r"[ \t]*\[\d+\]"),
    ]
}

/// Remove `[출처 N]`, `[source N]` (any case) and `[N]` markers together with
/// the spaces that precede them.
pub fn remove_citations(text: &str) -> StageOutput {
    let mut count = 0;
    let mut result = text.to_owned();

    for re in patterns().into_iter().flatten() {
        let found = re.find_iter(&result).count();
        if found > 0 {
            count += found;
            result = re.replace_all(&result, "").into_owned();
        }
    }

    StageOutput::new(result, count)
}
