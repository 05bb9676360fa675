//! Finalized request metrics and their flat persistence row.

use chrono::{DateTime, Utc};
use parley_normalize::NormalizationChanges;
use serde::{Deserialize, Serialize};

use super::cost::CostBreakdown;
use crate::stage::Channel;

/// Stage durations in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Performance {
    pub stt_duration: u64,
    pub rag_search_duration: u64,
    pub rag_rerank_duration: u64,
    pub llm_duration: u64,
    pub normalization_duration: u64,
    pub tts_duration: u64,
    pub total_duration: u64,
}

/// Answer and retrieval quality counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quality {
    pub transcription_length: u64,
    pub response_length: u64,
    pub response_sentences: u64,
    pub normalized_length: u64,
    pub synthesized_chars: u64,
    /// Characters of model input (query or transcript).
    pub input_chars: u64,
    pub normalization_changes: NormalizationChanges,
    pub documents_found: u64,
    pub documents_used: u64,
    pub avg_similarity: f64,
}

/// The failure recorded for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub stage: String,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Everything measured about one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub channel: Channel,
    #[serde(default)]
    pub transcription_text: Option<String>,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub normalized_text: Option<String>,
    #[serde(default)]
    pub performance: Performance,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub cost: CostBreakdown,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    /// Metrics without a dedicated field.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MetricsRecord {
    pub fn new(session_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            user_id: None,
            channel,
            transcription_text: None,
            response_text: None,
            normalized_text: None,
            performance: Performance::default(),
            quality: Quality::default(),
            cost: CostBreakdown::default(),
            error: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// One row of the `voice_metrics` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub stt_duration: u64,
    #[serde(default)]
    pub rag_search_duration: u64,
    #[serde(default)]
    pub rag_rerank_duration: u64,
    #[serde(default)]
    pub llm_duration: u64,
    #[serde(default)]
    pub normalization_duration: u64,
    #[serde(default)]
    pub tts_duration: u64,
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub transcription_length: u64,
    #[serde(default)]
    pub transcription_text: Option<String>,
    #[serde(default)]
    pub response_length: u64,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub normalized_text: Option<String>,
    #[serde(default)]
    pub response_sentences: u64,
    #[serde(default)]
    pub citations_removed: u64,
    #[serde(default)]
    pub markdown_removed: u64,
    #[serde(default)]
    pub fillers_added: u64,
    #[serde(default)]
    pub documents_found: u64,
    #[serde(default)]
    pub documents_used: u64,
    #[serde(default)]
    pub avg_similarity: f64,
    #[serde(default)]
    pub cost_stt: f64,
    #[serde(default)]
    pub cost_tts: f64,
    #[serde(default)]
    pub cost_llm: f64,
    #[serde(default)]
    pub cost_total: f64,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error_stage: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl From<&MetricsRecord> for MetricsRow {
    fn from(record: &MetricsRecord) -> Self {
        let p = &record.performance;
        let q = &record.quality;
        let changes = &q.normalization_changes;
        Self {
            session_id: record.session_id.clone(),
            timestamp: record.timestamp,
            user_id: record.user_id.clone(),
            channel: record.channel,
            stt_duration: p.stt_duration,
            rag_search_duration: p.rag_search_duration,
            rag_rerank_duration: p.rag_rerank_duration,
            llm_duration: p.llm_duration,
            normalization_duration: p.normalization_duration,
            tts_duration: p.tts_duration,
            total_duration: p.total_duration,
            transcription_length: q.transcription_length,
            transcription_text: record.transcription_text.clone(),
            response_length: q.response_length,
            response_text: record.response_text.clone(),
            normalized_text: record.normalized_text.clone(),
            response_sentences: q.response_sentences,
            citations_removed: changes.citations_removed as u64,
            markdown_removed: changes.markdown_removed as u64,
            fillers_added: changes.fillers_added as u64,
            documents_found: q.documents_found,
            documents_used: q.documents_used,
            avg_similarity: q.avg_similarity,
            cost_stt: record.cost.stt,
            cost_tts: record.cost.tts,
            cost_llm: record.cost.llm,
            cost_total: record.cost.total,
            has_error: record.error.is_some(),
            error_stage: record.error.as_ref().map(|e| e.stage.clone()),
            error_message: record.error.as_ref().map(|e| e.message.clone()),
        }
    }
}
