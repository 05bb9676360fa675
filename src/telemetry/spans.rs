/// Span names for request tracing.
///
/// Spans follow the hierarchy:
///
/// ```text
/// parley.request
///   └─> parley.stage
/// parley.telemetry.persist (spawned, detached from the request)
/// ```
///
/// # Example
///
/// ```rust
/// use parley::telemetry::spans::SPAN_STAGE;
///
/// let span = tracing::info_span!(SPAN_STAGE, stage = "rag");
/// let _enter = span.enter();
/// ```
// Span names (hierarchical, dot-separated)
/// Root span for one chat or voice request.
pub const SPAN_REQUEST: &str = "parley.request";

/// Span for a single pipeline stage (child of the request span).
pub const SPAN_STAGE: &str = "parley.stage";

/// Span for the spawned metrics write.
pub const SPAN_PERSIST: &str = "parley.telemetry.persist";
