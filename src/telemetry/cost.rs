//! Per-request cost estimate.
//!
//! These are estimates, not billing data. Speech-to-text is priced from the
//! transcription stage's processing time rather than the billed audio
//! length, and token counts are derived from character counts.

use serde::{Deserialize, Serialize};

/// Unit prices used by [`estimate_cost`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    /// Dollars per minute of speech-to-text.
    pub stt_per_minute: f64,
    /// Dollars per synthesized character.
    pub tts_per_char: f64,
    /// Dollars per 1000 prompt tokens.
    pub llm_input_per_1k: f64,
    /// Dollars per 1000 completion tokens.
    pub llm_output_per_1k: f64,
    /// Characters per token. Korean-heavy traffic averages about 2.
    pub chars_per_token: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            stt_per_minute: 0.003,
            tts_per_char: 0.000_03,
            llm_input_per_1k: 0.000_15,
            llm_output_per_1k: 0.000_6,
            chars_per_token: 2.0,
        }
    }
}

/// Usage figures a cost estimate is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub stt_duration_ms: f64,
    pub synthesized_chars: f64,
    pub input_chars: f64,
    pub output_chars: f64,
}

/// Estimated dollars per stage. Each component is rounded to 6 decimals and
/// `total` is the rounded sum of the rounded components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub stt: f64,
    pub tts: f64,
    pub llm: f64,
    pub total: f64,
}

/// Round to 6 decimal places.
pub fn round6(value: f64) -> f64 {
    round_to(value, 6)
}

/// Round to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Estimate request cost. Negative or non-finite inputs count as zero.
pub fn estimate_cost(usage: &Usage, rates: &CostRates) -> CostBreakdown {
    let chars_per_token = if rates.chars_per_token > 0.0 {
        rates.chars_per_token
    } else {
        1.0
    };

    let stt_minutes = non_negative(usage.stt_duration_ms) / 1000.0 / 60.0;
    let stt = round6(stt_minutes * non_negative(rates.stt_per_minute));

    let tts = round6(non_negative(usage.synthesized_chars) * non_negative(rates.tts_per_char));

    let input_tokens = non_negative(usage.input_chars) / chars_per_token;
    let output_tokens = non_negative(usage.output_chars) / chars_per_token;
    let llm = round6(
        input_tokens / 1000.0 * non_negative(rates.llm_input_per_1k)
            + output_tokens / 1000.0 * non_negative(rates.llm_output_per_1k),
    );

    CostBreakdown {
        stt,
        tts,
        llm,
        total: round6(stt + tts + llm),
    }
}
