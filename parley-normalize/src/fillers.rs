//! Conversational fillers.
//!
//! A spoken answer with no hesitation at all sounds read from a page. A
//! small number of fillers (`음`, `어...`, a trailing `응?`) is inserted at
//! a few trigger sites. Whether a trigger matches is decided by the text
//! alone; whether it fires draws from the caller's RNG.

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

use crate::{cached_regex, StageOutput};

/// Default cap on fillers per response.
pub const DEFAULT_MAX_FILLERS: usize = 2;

/// One trigger pattern and what it is rewritten to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillerRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub replacement: &'static str,
    /// Chance that a matching trigger actually fires.
    pub probability: f64,
}

/// Rules in evaluation order. Each applies to its first match only.
pub const FILLER_RULES: &[FillerRule] = &[
    FillerRule {
        name: "leading_demonstrative",
        pattern: r"^(그거|그게|이거|저거|이게)\s",
        replacement: "음, $0",
        probability: 0.2,
    },
    FillerRule {
        name: "after_conjunction",
        pattern: r"(근데|그런데)\s+",
        replacement: "$1 어... ",
        probability: 0.3,
    },
    FillerRule {
        name: "trailing_question",
        pattern: r"\?\s*$",
        replacement: "? 응?",
        probability: 0.5,
    },
];

static COMPILED: [OnceLock<Option<Regex>>; 3] = [OnceLock::new(), OnceLock::new(), OnceLock::new()];

/// Insert at most `max_fillers` fillers.
pub fn add_fillers<R: Rng + ?Sized>(text: &str, max_fillers: usize, rng: &mut R) -> StageOutput {
    let mut result = text.to_owned();
    let mut count = 0;

    for (rule, cell) in FILLER_RULES.iter().zip(COMPILED.iter()) {
        if count >= max_fillers {
            break;
        }
        let Some(re) = cached_regex(cell, rule.pattern) else {
            continue;
        };
        if !re.is_match(&result) {
            continue;
        }
        if rng.gen_bool(rule.probability) {
            result = re.replacen(&result, 1, rule.replacement).into_owned();
            count += 1;
            tracing::trace!(rule = rule.name, "filler inserted");
        }
    }

    StageOutput::new(result, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn always() -> StepRng {
        StepRng::new(0, 0)
    }

    fn never() -> StepRng {
        StepRng::new(u64::MAX, 0)
    }

    #[test]
    fn rule_table_matches_compiled_cells() {
        assert_eq!(FILLER_RULES.len(), COMPILED.len());
        for rule in FILLER_RULES {
            assert!(Regex::new(rule.pattern).is_ok(), "{}", rule.name);
            assert!(rule.probability > 0.0 && rule.probability < 1.0);
        }
    }

    #[test]
    fn leading_demonstrative_gets_um() {
        let out = add_fillers("그거 정말 좋아.", 2, &mut always());
        assert_eq!(out.text, "음, 그거 정말 좋아.");
        assert_eq!(out.count, 1);
    }

    #[test]
    fn conjunction_gets_hesitation() {
        let out = add_fillers("좋아. 근데 비싸.", 2, &mut always());
        assert_eq!(out.text, "좋아. 근데 어... 비싸.");
        assert_eq!(out.count, 1);
    }

    #[test]
    fn trailing_question_gets_tag() {
        let out = add_fillers("맞지?", 2, &mut always());
        assert_eq!(out.text, "맞지? 응?");
        assert_eq!(out.count, 1);
    }

    #[test]
    fn cap_stops_later_rules() {
        let out = add_fillers("그거 좋아. 근데 어때?", 2, &mut always());
        assert_eq!(out.text, "음, 그거 좋아. 근데 어... 어때?");
        assert_eq!(out.count, 2);

        let out = add_fillers("그거 좋아. 근데 어때?", 0, &mut always());
        assert_eq!(out.text, "그거 좋아. 근데 어때?");
        assert_eq!(out.count, 0);
    }

    #[test]
    fn only_first_conjunction_fires() {
        let out = add_fillers("근데 하나. 그런데 둘.", 2, &mut always());
        assert_eq!(out.text, "근데 어... 하나. 그런데 둘.");
    }

    #[test]
    fn rejected_draws_leave_text_alone() {
        let out = add_fillers("그거 좋아. 근데 어때?", 2, &mut never());
        assert_eq!(out.text, "그거 좋아. 근데 어때?");
        assert_eq!(out.count, 0);
    }

    #[test]
    fn same_seed_same_output() {
        let text = "그거 좋아. 근데 어때?";
        let a = add_fillers(text, 2, &mut StdRng::seed_from_u64(9));
        let b = add_fillers(text, 2, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn text_without_triggers_draws_nothing() {
        let out = add_fillers("평범한 문장.", 2, &mut always());
        assert_eq!(out.text, "평범한 문장.");
        assert_eq!(out.count, 0);
    }
}
