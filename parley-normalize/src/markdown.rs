//! Markdown removal.
//!
//! Code goes first: fence and inline-code bodies are swapped for opaque
//! placeholders, so `*` and `_` inside code are never read as emphasis, and
//! restored verbatim at the end. Emphasis rules then repeat until nothing
//! matches, which unwraps nested emphasis such as `**a *b* c**`. Links and
//! heading markers run once.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::{cached_regex, StageOutput};

struct Rule {
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &'static str,
    replacement: &'static str,
}

static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
static INLINE_CODE: OnceLock<Option<Regex>> = OnceLock::new();
static BOLD_STAR: OnceLock<Option<Regex>> = OnceLock::new();
static BOLD_UNDERSCORE: OnceLock<Option<Regex>> = OnceLock::new();
static ITALIC_STAR: OnceLock<Option<Regex>> = OnceLock::new();
static ITALIC_UNDERSCORE: OnceLock<Option<Regex>> = OnceLock::new();
static LINK: OnceLock<Option<Regex>> = OnceLock::new();
static HEADING: OnceLock<Option<Regex>> = OnceLock::new();
static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

/// Private-use delimiters around a code placeholder index.
const CODE_OPEN: char = '\u{E000}';
const CODE_CLOSE: char = '\u{E001}';
const PLACEHOLDER_PATTERN: &str = "\u{E000}(\\d+)\u{E001}";

/// Code constructs; the first capture group is the kept body.
static CODE_RULES: &[Rule] = &[
    // ```lang\n body ``` keeps the body, drops the language tag line
    Rule {
        cell: &FENCE,
        pattern: r"(?s)```(?:[A-Za-z0-9_+\-]*\n)?(.*?)```",
        replacement: "$1",
    },
    Rule {
        cell: &INLINE_CODE,
        pattern: r"`([^`\n]+)`",
        replacement: "$1",
    },
];

static EMPHASIS_RULES: &[Rule] = &[
    Rule {
        cell: &BOLD_STAR,
        pattern: r"\*\*([^*\n]+)\*\*",
        replacement: "$1",
    },
    Rule {
        cell: &BOLD_UNDERSCORE,
        pattern: r"__([^_\n]+)__",
        replacement: "$1",
    },
    // opening `*` must be followed by, and closing `*` preceded by, a
    // non-space so `2 * 3 * 4` survives
    Rule {
        cell: &ITALIC_STAR,
        pattern: r"\*([^*\s](?:[^*\n]*[^*\s])?)\*",
        replacement: "$1",
    },
    // underscores must sit on word boundaries so `snake_case_name` survives
    Rule {
        cell: &ITALIC_UNDERSCORE,
        pattern: r"(^|[^\w])_([^_\s](?:[^_\n]*[^_\s])?)_($|[^\w])",
        replacement: "${1}${2}${3}",
    },
];

static STRUCTURE_RULES: &[Rule] = &[
    Rule {
        cell: &LINK,
        pattern: r"\[([^\]\n]+)\]\([^)\n]+\)",
        replacement: "$1",
    },
    Rule {
        cell: &HEADING,
        pattern: r"(?m)^#{1,6}[ \t]+",
        replacement: "",
    },
];

/// Apply `rule` once over `text`, returning the number of matches.
fn apply(rule: &Rule, text: &mut String) -> usize {
    let Some(re) = cached_regex(rule.cell, rule.pattern) else {
        return 0;
    };
    let found = re.find_iter(text.as_str()).count();
    if found > 0 {
        *text = re.replace_all(text.as_str(), rule.replacement).into_owned();
    }
    found
}

/// Replace each code construct with a placeholder, collecting its body.
fn stash_code(text: &mut String, bodies: &mut Vec<String>) -> usize {
    let mut count = 0;
    for rule in CODE_RULES {
        let Some(re) = cached_regex(rule.cell, rule.pattern) else {
            continue;
        };
        let replaced = re.replace_all(text.as_str(), |caps: &Captures<'_>| {
            count += 1;
            bodies.push(caps.get(1).map_or("", |m| m.as_str()).to_owned());
            format!("{CODE_OPEN}{}{CODE_CLOSE}", bodies.len() - 1)
        });
        *text = replaced.into_owned();
    }
    count
}

fn restore_code(text: &str, bodies: &[String]) -> String {
    if bodies.is_empty() {
        return text.to_owned();
    }
    let Some(re) = cached_regex(&PLACEHOLDER, PLACEHOLDER_PATTERN) else {
        return text.to_owned();
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|i| bodies.get(i))
            .cloned()
            .unwrap_or_else(|| caps[0].to_owned())
    })
    .into_owned()
}

/// Strip markdown syntax, keeping the visible text.
pub fn remove_markdown(text: &str) -> StageOutput {
    let mut result = text.to_owned();
    let mut bodies = Vec::new();
    let mut count = stash_code(&mut result, &mut bodies);

    // every match removes markers, so this terminates
    loop {
        let found: usize = EMPHASIS_RULES.iter().map(|rule| apply(rule, &mut result)).sum();
        if found == 0 {
            break;
        }
        count += found;
    }

    for rule in STRUCTURE_RULES {
        count += apply(rule, &mut result);
    }

    StageOutput::new(restore_code(&result, &bodies), count)
}
