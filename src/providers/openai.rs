//! OpenAI adapter: embeddings, streamed chat completions and transcription.
//!
//! Chat completions are requested with `stream: true` and decoded through
//! [`SseLineParser`]; each `choices[0].delta.content` becomes one fragment
//! of the [`TextStream`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use super::sse::SseLineParser;
use super::{
    Embedder, GenerationRequest, Generator, ProviderError, Result, TextStream, Transcriber,
    http_client,
};
use crate::config::OpenAiSettings;
use crate::pipeline::messages::{AudioInput, Transcription, Turn};

const SERVICE: &str = "openai";

/// OpenAI connection settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub transcription_model: String,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = OpenAiSettings::default();
        Self {
            api_key: api_key.into(),
            base_url: defaults.base_url,
            embedding_model: defaults.embedding_model,
            chat_model: defaults.chat_model,
            transcription_model: defaults.transcription_model,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }
}

impl From<&OpenAiSettings> for OpenAiConfig {
    fn from(settings: &OpenAiSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            embedding_model: settings.embedding_model.clone(),
            chat_model: settings.chat_model.clone(),
            transcription_model: settings.transcription_model.clone(),
        }
    }
}

/// Client for the OpenAI HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the API key is empty or the HTTP
    /// client cannot be built.
    pub fn new(config: OpenAiConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::Config("OpenAI API key is empty".into()));
        }
        Ok(Self {
            config,
            client: http_client(timeout)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(SERVICE, status, &body))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": text,
        });
        let response = self
            .client
            .post(self.url("/v1/embeddings"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request(SERVICE, e))?;
        let parsed: EmbeddingResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("embedding response: {e}")))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .unwrap_or_default();
        if embedding.is_empty() {
            return Err(ProviderError::Decode("embedding response had no vector".into()));
        }
        Ok(embedding)
    }
}

/// Build the chat completions request body.
fn build_completions_request(model: &str, request: &GenerationRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|Turn { role, content }| {
            serde_json::json!({ "role": role.as_str(), "content": content })
        })
        .collect();

    serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "stream": true,
    })
}

/// Extract the content delta from one streamed chunk. Chunks without
/// content (role announcements, finish markers) yield `None`.
fn parse_completions_chunk(data: &str) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("completion chunk: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(ProviderError::Stream(format!("{SERVICE}: {message}")));
    }

    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from))
}

struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    parser: SseLineParser,
    buffer: Vec<Result<String>>,
    finished: bool,
}

impl StreamState {
    /// Queue fragments in reverse so `pop` yields them in order. Returns
    /// true once `[DONE]` is seen.
    fn queue(&mut self, events: Vec<super::sse::SseEvent>) -> bool {
        let mut done = false;
        let mut items = Vec::new();
        for event in events {
            if event.is_done() {
                done = true;
                break;
            }
            match parse_completions_chunk(&event.data) {
                Ok(Some(text)) => items.push(Ok(text)),
                Ok(None) => {}
                Err(e) => {
                    items.push(Err(e));
                    done = true;
                    break;
                }
            }
        }
        self.buffer.extend(items.into_iter().rev());
        done
    }
}

/// Turn the SSE byte stream into text fragments.
fn create_text_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> TextStream {
    let stream = futures_util::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            parser: SseLineParser::new(),
            buffer: Vec::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(item) = state.buffer.pop() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.parser.push(&chunk);
                        state.finished = state.queue(events);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        let err = ProviderError::Stream(format!("{SERVICE} stream read: {e}"));
                        return Some((Err(err), state));
                    }
                    None => {
                        state.finished = true;
                        if let Some(event) = state.parser.flush() {
                            state.queue(vec![event]);
                        }
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

#[async_trait]
impl Generator for OpenAiClient {
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let body = build_completions_request(&self.config.chat_model, request);
        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request(SERVICE, e))?;
        let response = Self::check(response).await?;
        Ok(create_text_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio: &AudioInput, language: &str) -> Result<Transcription> {
        let mut part = reqwest::multipart::Part::bytes(audio.bytes.to_vec())
            .file_name(audio.filename.clone());
        if let Some(content_type) = &audio.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| ProviderError::Request(format!("invalid content type: {e}")))?;
        }
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.transcription_model.clone())
            .text("language", language.to_string());

        let response = self
            .client
            .post(self.url("/v1/audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::request(SERVICE, e))?;
        let parsed: TranscriptionResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("transcription response: {e}")))?;

        Ok(Transcription {
            text: parsed.text,
            language: language.to_string(),
        })
    }
}
