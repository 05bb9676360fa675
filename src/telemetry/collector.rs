//! Per-request metrics collector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parley_normalize::NormalizationResult;
use rand::Rng;
use tracing::Instrument;

use super::TelemetryError;
use super::cost::{CostRates, Usage, estimate_cost};
use super::record::{ErrorInfo, MetricsRecord, MetricsRow};
use super::spans::SPAN_PERSIST;
use super::store::TelemetryStore;
use crate::pipeline::messages::Document;
use crate::stage::{Channel, Stage};

/// Checkpoint labels. Durations are measured between `*_start` and `*_end`.
pub mod labels {
    pub const STT_START: &str = "stt_start";
    pub const STT_END: &str = "stt_end";
    pub const RAG_START: &str = "rag_start";
    pub const RAG_END: &str = "rag_end";
    pub const RERANK_START: &str = "rerank_start";
    pub const RERANK_END: &str = "rerank_end";
    pub const LLM_START: &str = "llm_start";
    pub const LLM_END: &str = "llm_end";
    pub const NORM_START: &str = "norm_start";
    pub const NORM_END: &str = "norm_end";
    pub const TTS_START: &str = "tts_start";
    pub const TTS_END: &str = "tts_end";
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `session_{epoch_millis}_{7 random base-36 chars}`.
pub fn new_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("session_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Mean similarity of `documents`, 0 when empty.
pub fn average_similarity(documents: &[Document]) -> f64 {
    if documents.is_empty() {
        return 0.0;
    }
    let sum: f64 = documents.iter().map(|d| f64::from(d.similarity)).sum();
    sum / documents.len() as f64
}

/// Metrics for one request, mutated by each stage and consumed by
/// [`finalize`](Self::finalize).
pub struct RequestMetrics {
    record: MetricsRecord,
    started: Instant,
    checkpoints: HashMap<String, Instant>,
    rates: CostRates,
    store: Arc<dyn TelemetryStore>,
}

impl std::fmt::Debug for RequestMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMetrics")
            .field("session_id", &self.record.session_id)
            .field("checkpoints", &self.checkpoints.len())
            .field("store", &self.store.name())
            .finish()
    }
}

impl RequestMetrics {
    pub fn new(channel: Channel, store: Arc<dyn TelemetryStore>, rates: CostRates) -> Self {
        Self {
            record: MetricsRecord::new(new_session_id(), channel),
            started: Instant::now(),
            checkpoints: HashMap::new(),
            rates,
            store,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.record.session_id
    }

    /// The record as measured so far.
    pub fn record(&self) -> &MetricsRecord {
        &self.record
    }

    /// Record the current instant under `label`. A repeated label overwrites.
    pub fn checkpoint(&mut self, label: &str) {
        self.checkpoints.insert(label.to_string(), Instant::now());
    }

    /// Milliseconds from `start` to `end`. 0 if either label is missing or
    /// `end` precedes `start`.
    pub fn duration_ms(&self, start: &str, end: &str) -> u64 {
        match (self.checkpoints.get(start), self.checkpoints.get(end)) {
            (Some(a), Some(b)) => b.saturating_duration_since(*a).as_millis() as u64,
            _ => 0,
        }
    }

    /// Milliseconds since the collector was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Write `value` into the record at a dotted path such as
    /// `quality.documents_used`. Unknown top-level keys are kept in `extra`.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidMetric`] for an unknown nested key or
    /// a value of the wrong type. The record is left unchanged.
    pub fn set_metric(
        &mut self,
        path: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<(), TelemetryError> {
        let value = value.into();
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TelemetryError::InvalidMetric(format!("invalid metric path {path:?}")));
        }

        let mut tree = serde_json::to_value(&self.record)
            .map_err(|e| TelemetryError::InvalidMetric(e.to_string()))?;
        let Some(root) = tree.as_object_mut() else {
            return Err(TelemetryError::InvalidMetric("record is not an object".into()));
        };

        if segments[0] == "extra" && segments.len() > 1 {
            self.record.extra.insert(segments[1..].join("."), value);
            return Ok(());
        }
        if !root.contains_key(segments[0]) {
            self.record.extra.insert(path.to_string(), value);
            return Ok(());
        }

        let mut slot = root
            .get_mut(segments[0])
            .ok_or_else(|| TelemetryError::InvalidMetric(format!("unknown metric {path:?}")))?;
        for segment in &segments[1..] {
            slot = slot
                .as_object_mut()
                .and_then(|obj| obj.get_mut(*segment))
                .ok_or_else(|| TelemetryError::InvalidMetric(format!("unknown metric {path:?}")))?;
        }
        *slot = value;

        let updated: MetricsRecord = serde_json::from_value(tree)
            .map_err(|e| TelemetryError::InvalidMetric(format!("{path}: {e}")))?;
        self.record = updated;
        Ok(())
    }

    /// Record the request's failure. Last writer wins.
    pub fn record_error(&mut self, stage: Stage, message: impl Into<String>, code: Option<&str>) {
        self.record.error = Some(ErrorInfo {
            stage: stage.as_str().to_string(),
            message: message.into(),
            code: code.map(String::from),
        });
    }

    /// Characters of model input, used for the token estimate.
    pub fn set_input(&mut self, text: &str) {
        self.record.quality.input_chars = text.chars().count() as u64;
    }

    pub fn set_transcription(&mut self, text: &str) {
        self.record.quality.transcription_length = text.chars().count() as u64;
        self.record.transcription_text = Some(text.to_string());
    }

    /// `found` candidates were retrieved; `used` made it into the prompt.
    pub fn set_documents(&mut self, found: usize, used: &[Document]) {
        self.record.quality.documents_found = found as u64;
        self.record.quality.documents_used = used.len() as u64;
        self.record.quality.avg_similarity = average_similarity(used);
    }

    pub fn set_response(&mut self, text: &str) {
        self.record.quality.response_length = text.chars().count() as u64;
        self.record.quality.response_sentences = parley_normalize::count_sentences(text) as u64;
        self.record.response_text = Some(text.to_string());
    }

    pub fn set_normalization(&mut self, result: &NormalizationResult) {
        self.record.quality.normalized_length = result.normalized.chars().count() as u64;
        self.record.quality.normalization_changes = result.changes;
        self.record.normalized_text = Some(result.normalized.clone());
    }

    pub fn set_synthesized_chars(&mut self, chars: usize) {
        self.record.quality.synthesized_chars = chars as u64;
    }

    fn compute(&mut self) {
        use labels::*;

        let stt = self.duration_ms(STT_START, STT_END);
        let rag = self.duration_ms(RAG_START, RAG_END);
        let rerank = self.duration_ms(RERANK_START, RERANK_END);
        let llm = self.duration_ms(LLM_START, LLM_END);
        let norm = self.duration_ms(NORM_START, NORM_END);
        let tts = self.duration_ms(TTS_START, TTS_END);
        let total = self.elapsed_ms();

        let performance = &mut self.record.performance;
        performance.stt_duration = stt;
        performance.rag_search_duration = rag;
        performance.rag_rerank_duration = rerank;
        performance.llm_duration = llm;
        performance.normalization_duration = norm;
        performance.tts_duration = tts;
        performance.total_duration = total;

        let quality = &self.record.quality;
        let usage = Usage {
            stt_duration_ms: stt as f64,
            synthesized_chars: quality.synthesized_chars as f64,
            input_chars: quality.input_chars as f64,
            output_chars: quality.response_length as f64,
        };
        self.record.cost = estimate_cost(&usage, &self.rates);
    }

    /// Compute durations and cost, start persistence in the background and
    /// return the finished record.
    ///
    /// Outside a tokio runtime the write is skipped with a warning.
    pub fn finalize(mut self) -> MetricsRecord {
        self.compute();
        let record = self.record;
        let row = MetricsRow::from(&record);

        tracing::info!(
            session_id = %record.session_id,
            channel = %record.channel,
            total_ms = record.performance.total_duration,
            cost = record.cost.total,
            error_stage = record.error.as_ref().map(|e| e.stage.as_str()),
            "request finished"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store;
                let span = tracing::info_span!(SPAN_PERSIST, session_id = %row.session_id);
                handle.spawn(
                    async move {
                        if let Err(e) = store.insert(&row).await {
                            tracing::warn!(store = store.name(), error = %e, "failed to persist request metrics");
                        }
                    }
                    .instrument(span),
                );
            }
            Err(_) => {
                tracing::warn!(session_id = %record.session_id, "no async runtime, metrics not persisted");
            }
        }

        record
    }
}
