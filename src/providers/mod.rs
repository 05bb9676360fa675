//! Remote service adapters.
//!
//! Each pipeline stage talks to its upstream through a narrow trait so the
//! orchestrator can be driven by fakes in tests:
//!
//! | Trait | Adapter |
//! |---|---|
//! | [`Embedder`] | [`openai::OpenAiClient`] (`/v1/embeddings`) |
//! | [`VectorStore`] | [`supabase::SupabaseVectorStore`] (`rpc/match_documents`) |
//! | [`Reranker`] | [`cohere::CohereReranker`] (`/v1/rerank`) |
//! | [`Generator`] | [`openai::OpenAiClient`] (`/v1/chat/completions`, SSE) |
//! | [`Transcriber`] | [`openai::OpenAiClient`] (`/v1/audio/transcriptions`) |
//! | [`Synthesizer`] | [`elevenlabs::ElevenLabsSynthesizer`] |

pub mod cohere;
pub mod elevenlabs;
pub mod error;
pub mod openai;
pub mod sse;
pub mod supabase;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::pipeline::messages::{AudioInput, Document, Transcription, Turn};

pub use error::{ProviderError, Result};

/// Stream of generated text fragments, in emission order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Similarity search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub embedding: Vec<f32>,
    /// Minimum similarity in `[0, 1]`.
    pub threshold: f32,
    /// Maximum number of candidates.
    pub limit: usize,
}

/// Finds documents similar to an embedding.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Candidates ordered by descending similarity. An empty result is valid.
    async fn match_documents(&self, query: &MatchQuery) -> Result<Vec<Document>>;
}

/// Reorders candidate texts by relevance to a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns indices into `documents`, most relevant first, at most `top_n` long.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<usize>>;
}

/// Sampling parameters and prompt for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Streams a chat completion.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Open the completion stream. Errors before the first fragment are
    /// returned here; later failures arrive as `Err` items.
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream>;
}

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput, language: &str) -> Result<Transcription>;
}

/// Text to speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns the full `audio/mpeg` body. `voice_override` replaces the
    /// configured voice for this call.
    async fn synthesize(&self, text: &str, voice_override: Option<&str>) -> Result<Bytes>;
}

/// Shared HTTP client with the configured per-request timeout.
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))
}
