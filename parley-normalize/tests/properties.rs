//! Property tests for the speech normalization stages.

use parley_normalize::citations::remove_citations;
use parley_normalize::fillers::add_fillers;
use parley_normalize::markdown::remove_markdown;
use parley_normalize::punctuation::fix_punctuation;
use parley_normalize::whitespace::cleanup_whitespace;
use parley_normalize::{normalize_for_speech, NormalizationOptions};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Short texts mixing Hangul, ASCII, punctuation and whitespace.
fn arb_text() -> impl Strategy<Value = String> {
    "[a-z0-9가나다그거근데 .,!?;\t\n\"')]{0,60}"
}

/// Text that contains filler triggers more often than `arb_text`.
fn arb_trigger_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            Just("그거 ".to_string()),
            Just("이게 ".to_string()),
            Just("근데 ".to_string()),
            Just("그런데 ".to_string()),
            Just("?".to_string()),
            "[가-힣]{1,4} ",
        ],
        0..12,
    )
    .prop_map(|parts| parts.concat())
}

mod prop_filler_cap {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn never_exceeds_max_fillers(
            text in arb_trigger_text(),
            seed in any::<u64>(),
            max in 0usize..4,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = add_fillers(&text, max, &mut rng);
            prop_assert!(out.count <= max);
        }

        #[test]
        fn pipeline_respects_configured_cap(text in arb_trigger_text(), seed in any::<u64>()) {
            let opts = NormalizationOptions { max_fillers: 1, ..NormalizationOptions::default() };
            let mut rng = StdRng::seed_from_u64(seed);
            let result = normalize_for_speech(&text, &opts, &mut rng);
            prop_assert!(result.changes.fillers_added <= 1);
        }
    }
}

mod prop_idempotence {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn punctuation_fix_is_idempotent(text in arb_text()) {
            let once = fix_punctuation(&text).text;
            let twice = fix_punctuation(&once);
            prop_assert_eq!(&twice.text, &once);
            prop_assert_eq!(twice.count, 0);
        }

        #[test]
        fn whitespace_cleanup_is_idempotent(text in arb_text()) {
            let once = cleanup_whitespace(&text).text;
            let twice = cleanup_whitespace(&once);
            prop_assert_eq!(&twice.text, &once);
            prop_assert_eq!(twice.count, 0);
        }

        #[test]
        fn normalized_output_has_no_stray_whitespace(text in arb_text()) {
            let mut rng = StdRng::seed_from_u64(0);
            let result = normalize_for_speech(&text, &NormalizationOptions::deterministic(), &mut rng);
            prop_assert_eq!(result.normalized.trim(), result.normalized.as_str());
            prop_assert!(!result.normalized.contains("  "));
        }
    }
}

mod prop_markup_removal {
    use super::*;

    fn arb_emphasis() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("*"), Just("**"), Just("_"), Just("__")]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn emphasis_unwraps_to_the_word(word in "[a-z가-힣]{1,10}") {
            for wrapped in [format!("*{word}*"), format!("**{word}**"), format!("`{word}`")] {
                let out = remove_markdown(&wrapped);
                prop_assert_eq!(&out.text, &word);
                prop_assert_eq!(out.count, 1);
            }
        }

        #[test]
        fn nested_emphasis_reduces_to_plain_text(
            words in proptest::collection::vec("[a-z가-힣]{1,8}", 1..4),
            wrappers in proptest::collection::vec(arb_emphasis(), 1..4),
        ) {
            let plain = words.join(" ");
            let wrapped = wrappers
                .iter()
                .fold(plain.clone(), |inner, marker| format!("{marker}{inner}{marker}"));
            let out = remove_markdown(&format!("말하자면 {wrapped} 끝"));
            prop_assert_eq!(&out.text, &format!("말하자면 {plain} 끝"));
            prop_assert!(!out.text.contains(|c| matches!(c, '*' | '_' | '`')));
            prop_assert!(out.count >= 1);
        }

        #[test]
        fn code_spans_keep_markup_characters(code in "[a-z*_]{1,8}") {
            let out = remove_markdown(&format!("`{code}`"));
            prop_assert_eq!(&out.text, &code);
            prop_assert_eq!(out.count, 1);

            let out = remove_markdown(&format!("**see `{code}`**"));
            prop_assert_eq!(&out.text, &format!("see {code}"));
            prop_assert_eq!(out.count, 2);
        }

        #[test]
        fn citation_markers_never_survive(
            parts in proptest::collection::vec("[가-힣a-z ]{0,12}", 1..6),
            n in 1u32..20,
        ) {
            let text = parts.join(&format!("[출처 {n}]"));
            let out = remove_citations(&text);
            prop_assert!(!out.text.contains("[출처"));
            prop_assert_eq!(out.count, parts.len() - 1);
        }
    }
}

#[test]
fn emphasized_english_sentence_with_source_marker() {
    let mut rng = StdRng::seed_from_u64(1);
    let result = normalize_for_speech(
        "This is *emphasized*. [source 1]",
        &NormalizationOptions::deterministic(),
        &mut rng,
    );
    assert_eq!(result.normalized, "This is emphasized.");
    assert_eq!(result.changes.citations_removed, 1);
    assert_eq!(result.changes.markdown_removed, 1);
}

#[test]
fn long_answer_splits_when_configured() {
    let opts = NormalizationOptions {
        max_sentence_length: Some(20),
        ..NormalizationOptions::deterministic()
    };
    let mut rng = StdRng::seed_from_u64(1);
    let result = normalize_for_speech(
        "블로그에는 여행 이야기가 많고, 요리 이야기도 조금 있어요.",
        &opts,
        &mut rng,
    );
    assert_eq!(result.normalized, "블로그에는 여행 이야기가 많고. 요리 이야기도 조금 있어요.");
    assert_eq!(result.changes.sentences_split, 1);
}
