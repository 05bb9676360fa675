//! Stage and channel identifiers shared by errors, telemetry and logging.

use serde::{Deserialize, Serialize};

/// A stage of request handling.
///
/// The string form is what lands in the `error_stage` telemetry column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Stt,
    Embedding,
    Rag,
    Rerank,
    Llm,
    Normalization,
    Tts,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Embedding => "embedding",
            Self::Rag => "rag",
            Self::Rerank => "rerank",
            Self::Llm => "llm",
            Self::Normalization => "normalization",
            Self::Tts => "tts",
        }
    }
}

/// Which surface a request arrived on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Written answers streamed with `[출처 N]` citations.
    Text,
    /// Short spoken answers in the owner's voice.
    #[default]
    Voice,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
