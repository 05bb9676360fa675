//! Error types for the parley pipeline.
//!
//! Each [`PipelineError`] variant carries a stable error code that is
//! included in the Display output and accessible via [`PipelineError::code()`].
//! Display text is for logs; clients only ever see [`PipelineError::user_message()`].

use crate::providers::ProviderError;
use crate::stage::Stage;

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Request failed intake validation.
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";

    /// A remote stage failed.
    pub const UPSTREAM_FAILED: &str = "UPSTREAM_FAILED";

    /// The response stream could not be produced or delivered.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Local I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Why a request was rejected before any remote stage ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message is {actual} characters, limit is {max}")]
    MessageTooLong { max: usize, actual: usize },

    #[error("audio file is required")]
    MissingAudio,

    #[error("audio is {actual} bytes, limit is {max}")]
    AudioTooLarge { max: usize, actual: usize },

    #[error("transcription is empty")]
    EmptyTranscript,

    #[error("text to synthesize is empty")]
    EmptySynthesisText,

    #[error("request body is malformed: {0}")]
    MalformedBody(String),
}

impl ValidationError {
    /// Short Korean message safe to show to the visitor.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyMessage => "메시지를 입력해주세요.".to_string(),
            Self::MessageTooLong { max, .. } => {
                format!("메시지는 {max}자를 초과할 수 없습니다.")
            }
            Self::MissingAudio => "오디오 파일이 필요합니다.".to_string(),
            Self::AudioTooLarge { .. } => "오디오 파일이 너무 큽니다.".to_string(),
            Self::EmptyTranscript => "음성을 인식하지 못했습니다. 다시 말씀해주세요.".to_string(),
            Self::EmptySynthesisText => "변환할 텍스트를 입력해주세요.".to_string(),
            Self::MalformedBody(_) => "요청 형식이 올바르지 않습니다.".to_string(),
        }
    }
}

/// Top-level error for a request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Request rejected by intake validation.
    #[error("[{}] {}", error_codes::VALIDATION_FAILED, .0)]
    Validation(#[from] ValidationError),

    /// A remote stage failed.
    #[error("[{}] {stage} stage failed: {source}", error_codes::UPSTREAM_FAILED)]
    Upstream {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    /// The response stream broke.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Local I/O failure.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn upstream(stage: Stage, source: ProviderError) -> Self {
        Self::Upstream { stage, source }
    }

    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => error_codes::VALIDATION_FAILED,
            Self::Upstream { .. } => error_codes::UPSTREAM_FAILED,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// The stage that failed, when one did.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Upstream { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the client caused the failure (maps to HTTP 400).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { source, .. } => source.is_retryable(),
            Self::Stream(_) => true,
            Self::Validation(_) | Self::Config(_) | Self::Io(_) => false,
        }
    }

    /// Short Korean message safe to show to the visitor. Internal detail
    /// stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(v) => v.user_message(),
            Self::Upstream { stage, .. } => stage_failure_message(*stage).to_string(),
            Self::Stream(_) => GENERATION_FAILED.to_string(),
            Self::Config(_) | Self::Io(_) => "요청을 처리하는 중 오류가 발생했습니다.".to_string(),
        }
    }
}

/// Message for a failure while producing the answer.
pub const GENERATION_FAILED: &str = "답변 생성 중 오류가 발생했습니다.";

/// Message for a failure while finding documents.
pub const SEARCH_FAILED: &str = "문서 검색 중 오류가 발생했습니다.";

fn stage_failure_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Stt => "음성 인식 중 오류가 발생했습니다.",
        Stage::Embedding | Stage::Rag | Stage::Rerank => SEARCH_FAILED,
        Stage::Llm | Stage::Normalization => GENERATION_FAILED,
        Stage::Tts => "음성 합성 중 오류가 발생했습니다.",
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_localized() {
        let err = PipelineError::from(ValidationError::MessageTooLong {
            max: 4000,
            actual: 4001,
        });
        assert_eq!(err.user_message(), "메시지는 4000자를 초과할 수 없습니다.");
        assert!(err.is_client_error());
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert_eq!(
            PipelineError::from(ValidationError::EmptyMessage).user_message(),
            "메시지를 입력해주세요."
        );
    }

    #[test]
    fn upstream_hides_provider_detail() {
        let err = PipelineError::upstream(
            Stage::Rag,
            ProviderError::Http {
                status: 500,
                body: "relation \"documents\" does not exist".into(),
            },
        );
        assert_eq!(err.user_message(), SEARCH_FAILED);
        assert!(!err.user_message().contains("relation"));
        assert!(format!("{err}").contains("relation"));
        assert_eq!(err.stage(), Some(Stage::Rag));
        assert!(!err.is_client_error());
    }

    #[test]
    fn display_includes_code_prefix() {
        let err = PipelineError::Config("missing OPENAI_API_KEY".into());
        assert!(format!("{err}").starts_with("[CONFIG_INVALID]"));
        let err = PipelineError::upstream(Stage::Llm, ProviderError::Timeout("30s".into()));
        assert!(format!("{err}").starts_with("[UPSTREAM_FAILED] llm stage failed"));
    }

    #[test]
    fn retryable_follows_provider() {
        let transient =
            PipelineError::upstream(Stage::Embedding, ProviderError::Request("reset".into()));
        let permanent = PipelineError::upstream(Stage::Embedding, ProviderError::Auth("key".into()));
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!PipelineError::from(ValidationError::EmptyTranscript).is_retryable());
    }

    #[test]
    fn every_stage_has_a_message() {
        for stage in [
            Stage::Stt,
            Stage::Embedding,
            Stage::Rag,
            Stage::Rerank,
            Stage::Llm,
            Stage::Normalization,
            Stage::Tts,
        ] {
            assert!(!stage_failure_message(stage).is_empty());
        }
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineError>();
    }
}
