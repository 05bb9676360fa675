//! Request telemetry.
//!
//! A [`RequestMetrics`](collector::RequestMetrics) collector is created once a
//! request passes intake validation. Stages record checkpoints and counters
//! on it; `finalize` computes durations and cost, hands the flattened
//! [`MetricsRow`](record::MetricsRow) to a [`TelemetryStore`](store::TelemetryStore)
//! on a spawned task and returns without waiting.
//!
//! # Persistence
//!
//! Store failures are logged and dropped. They never reach the visitor and
//! are never retried.
//!
//! # Statistics
//!
//! [`stats`] aggregates stored rows for the metrics endpoint.

pub mod collector;
pub mod cost;
pub mod record;
pub mod spans;
pub mod stats;
pub mod store;

pub use collector::{RequestMetrics, average_similarity, new_session_id};
pub use cost::{CostBreakdown, CostRates};
pub use record::{MetricsRecord, MetricsRow};
pub use store::{NoopTelemetryStore, SqliteTelemetryStore, SupabaseTelemetryStore, TelemetryStore};

use crate::providers::ProviderError;

/// Stable error codes for telemetry failures.
pub mod error_codes {
    /// A metric path or value did not fit the record.
    pub const INVALID_METRIC: &str = "INVALID_METRIC";

    /// The telemetry store rejected a read or write.
    pub const STORE_FAILED: &str = "STORE_FAILED";
}

/// Telemetry failures. Never surfaced to the visitor.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A metric path or value did not fit the record.
    #[error("[{}] {}", error_codes::INVALID_METRIC, .0)]
    InvalidMetric(String),

    /// Remote store failure.
    #[error("[{}] remote store: {}", error_codes::STORE_FAILED, .0)]
    Remote(#[from] ProviderError),

    /// Local database failure.
    #[error("[{}] sqlite: {}", error_codes::STORE_FAILED, .0)]
    Sqlite(#[from] rusqlite::Error),

    /// Any other store failure (lock poisoning, task join).
    #[error("[{}] {}", error_codes::STORE_FAILED, .0)]
    Store(String),
}

impl TelemetryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMetric(_) => error_codes::INVALID_METRIC,
            Self::Remote(_) | Self::Sqlite(_) | Self::Store(_) => error_codes::STORE_FAILED,
        }
    }
}
