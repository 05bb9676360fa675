//! Message types passed between pipeline stages and across the HTTP surface.

use bytes::Bytes;
use parley_normalize::NormalizationChanges;
use serde::{Deserialize, Deserializer, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of a conversation, either client history or a prompt sent
/// to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The page the visitor is reading when they ask a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default, alias = "pageContext")]
    pub page_context: Option<PageContext>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// A validated question ready for retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// The question, trimmed of surrounding whitespace.
    pub text: String,
    /// At most the configured number of most recent user/assistant turns.
    pub history: Vec<Turn>,
    pub page_context: Option<PageContext>,
}

/// Uploaded audio for transcription.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub bytes: Bytes,
    pub filename: String,
    pub content_type: Option<String>,
}

impl AudioInput {
    pub fn new(bytes: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Input of the voice path: recorded audio plus optional prior turns.
#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub audio: AudioInput,
    pub history: Vec<Turn>,
}

/// Speech-to-text output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
}

/// A retrieved content unit with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Chunk content prefixed with surrounding document context, preferred
    /// for reranking when present.
    #[serde(default)]
    pub content_with_context: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub similarity: f32,
}

/// Title shown when a document has none.
pub const UNTITLED: &str = "제목 없음";

impl Document {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => UNTITLED,
        }
    }

    /// Text handed to the reranker.
    pub fn rerank_text(&self) -> &str {
        match self.content_with_context.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => &self.content,
        }
    }

    pub fn non_empty_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Float(n) => n.to_string(),
    })
}

/// Client-facing projection of a [`Document`] sent in the `sources` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePreview {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub similarity: f32,
}

impl SourcePreview {
    /// Keep the first `preview_chars` characters of the content, followed by `...`.
    pub fn from_document(doc: &Document, preview_chars: usize) -> Self {
        let preview: String = doc.content.chars().take(preview_chars).collect();
        Self {
            id: doc.id.clone(),
            title: doc.display_title().to_string(),
            content: format!("{preview}..."),
            url: doc.non_empty_url().map(String::from),
            similarity: doc.similarity,
        }
    }
}

/// Source attribution returned with a spoken answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub similarity: f32,
}

impl From<&Document> for Citation {
    fn from(doc: &Document) -> Self {
        Self {
            title: doc.display_title().to_string(),
            url: doc.non_empty_url().unwrap_or_default().to_string(),
            similarity: doc.similarity,
        }
    }
}

/// Per-request numbers returned with a spoken answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMetricsSummary {
    pub session_id: String,
    /// Milliseconds from request start to response.
    pub total_duration: u64,
    pub normalization_changes: NormalizationChanges,
}

/// Result of the voice path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceChatResponse {
    pub transcription: String,
    /// The generated answer before speech normalization.
    pub response_text: String,
    /// Synthesized `audio/mpeg`, base64-encoded.
    pub audio: String,
    pub citations: Vec<Citation>,
    pub metrics: VoiceMetricsSummary,
}
