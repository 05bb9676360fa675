//! Text preparation for speech synthesis.
//!
//! Generated answers are written for the screen: they carry `[출처 N]`
//! citation markers, markdown emphasis, code spans and loose punctuation.
//! Read aloud verbatim, all of that is noise. [`normalize_for_speech`] runs a
//! fixed sequence of pure stages over the text and reports how many edits
//! each stage made.
//!
//! # Stage order
//!
//! ```text
//! citations → markdown → punctuation → korean → sentence split → fillers → whitespace
//! ```
//!
//! The order is part of the contract. Code spans are unwrapped before
//! emphasis is stripped, fillers are inserted after punctuation has settled,
//! and whitespace cleanup runs last because every earlier stage may leave
//! doubled spaces behind.
//!
//! # Examples
//!
//! ```
//! use parley_normalize::{normalize_for_speech, NormalizationOptions};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let opts = NormalizationOptions::deterministic();
//! let result = normalize_for_speech("This is *emphasized*. [source 1]", &opts, &mut rng);
//! assert_eq!(result.normalized, "This is emphasized.");
//! assert_eq!(result.changes.citations_removed, 1);
//! assert_eq!(result.changes.markdown_removed, 1);
//! ```

pub mod citations;
pub mod fillers;
pub mod korean;
pub mod markdown;
pub mod punctuation;
pub mod sentences;
pub mod whitespace;

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use fillers::{FillerRule, DEFAULT_MAX_FILLERS};
pub use sentences::count_sentences;

/// Which stages run, and their tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationOptions {
    /// Strip `[출처 N]`, `[source N]` and `[N]` markers.
    pub remove_citations: bool,
    /// Strip code fences, inline code, emphasis, links and heading markers.
    pub remove_markdown: bool,
    /// Normalize spacing around sentence and clause punctuation.
    pub fix_punctuation: bool,
    /// Korean particle, counter and quotation cleanup.
    pub normalize_korean: bool,
    /// Insert conversational fillers at trigger sites.
    pub add_fillers: bool,
    /// Upper bound on fillers per response.
    pub max_fillers: usize,
    /// Split sentences longer than this many characters at a clause comma.
    /// `None` disables splitting.
    pub max_sentence_length: Option<usize>,
}

impl Default for NormalizationOptions {
    fn default() -> Self {
        Self {
            remove_citations: true,
            remove_markdown: true,
            fix_punctuation: true,
            normalize_korean: true,
            add_fillers: true,
            max_fillers: DEFAULT_MAX_FILLERS,
            max_sentence_length: None,
        }
    }
}

impl NormalizationOptions {
    /// Default stages with filler insertion disabled, so output depends on
    /// the input text alone.
    pub fn deterministic() -> Self {
        Self {
            add_fillers: false,
            ..Self::default()
        }
    }

    /// Every stage except whitespace cleanup switched off.
    pub fn none() -> Self {
        Self {
            remove_citations: false,
            remove_markdown: false,
            fix_punctuation: false,
            normalize_korean: false,
            add_fillers: false,
            max_fillers: DEFAULT_MAX_FILLERS,
            max_sentence_length: None,
        }
    }
}

/// Per-stage edit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationChanges {
    pub citations_removed: usize,
    pub markdown_removed: usize,
    pub punctuation_fixed: usize,
    pub language_fixed: usize,
    pub sentences_split: usize,
    pub fillers_added: usize,
    pub whitespace_removed: usize,
}

impl NormalizationChanges {
    /// Sum of all counters.
    pub fn total(&self) -> usize {
        self.citations_removed
            + self.markdown_removed
            + self.punctuation_fixed
            + self.language_fixed
            + self.sentences_split
            + self.fillers_added
            + self.whitespace_removed
    }
}

/// Output of [`normalize_for_speech`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationResult {
    pub original: String,
    pub normalized: String,
    pub changes: NormalizationChanges,
}

/// A stage output: the rewritten text and how many edits were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub text: String,
    pub count: usize,
}

impl StageOutput {
    pub(crate) fn new(text: String, count: usize) -> Self {
        Self { text, count }
    }
}

/// Compile `pattern` once into `cell`.
///
/// Every pattern in this crate is a literal covered by unit tests; a compile
/// failure is logged and the calling stage becomes a no-op.
pub(crate) fn cached_regex(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern, error = %e, "invalid normalization pattern");
            None
        }
    })
    .as_ref()
}

/// Run the full normalization pipeline.
///
/// `rng` is only consulted by the filler stage; pass any seeded RNG for
/// reproducible output, or disable fillers via
/// [`NormalizationOptions::deterministic`].
pub fn normalize_for_speech<R: Rng + ?Sized>(
    text: &str,
    options: &NormalizationOptions,
    rng: &mut R,
) -> NormalizationResult {
    let mut changes = NormalizationChanges::default();
    let mut current = text.to_owned();

    if options.remove_citations {
        let out = citations::remove_citations(&current);
        changes.citations_removed = out.count;
        current = out.text;
    }

    if options.remove_markdown {
        let out = markdown::remove_markdown(&current);
        changes.markdown_removed = out.count;
        current = out.text;
    }

    if options.fix_punctuation {
        let out = punctuation::fix_punctuation(&current);
        changes.punctuation_fixed = out.count;
        current = out.text;
    }

    if options.normalize_korean {
        let out = korean::normalize_korean(&current);
        changes.language_fixed = out.count;
        current = out.text;
    }

    if let Some(max_len) = options.max_sentence_length {
        let out = sentences::split_long_sentences(&current, max_len);
        changes.sentences_split = out.count;
        current = out.text;
    }

    if options.add_fillers {
        let out = fillers::add_fillers(&current, options.max_fillers, rng);
        changes.fillers_added = out.count;
        current = out.text;
    }

    let out = whitespace::cleanup_whitespace(&current);
    changes.whitespace_removed = out.count;
    current = out.text;

    tracing::debug!(
        citations = changes.citations_removed,
        markdown = changes.markdown_removed,
        fillers = changes.fillers_added,
        "normalized text for speech"
    );

    NormalizationResult {
        original: text.to_owned(),
        normalized: current,
        changes,
    }
}
