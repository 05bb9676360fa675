//! In-process fakes for the provider traits, shared by integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parley::ChatStream;
use parley::config::ParleyConfig;
use parley::pipeline::ChatPipelineBuilder;
use parley::pipeline::messages::{AudioInput, Document, Transcription, Turn};
use parley::pipeline::retry::RetryPolicy;
use parley::protocol::{ChatFrame, FrameDecoder};
use parley::providers::{
    Embedder, GenerationRequest, Generator, MatchQuery, ProviderError, Reranker, Result,
    Synthesizer, TextStream, Transcriber, VectorStore,
};
use parley::telemetry::{MetricsRow, SqliteTelemetryStore, TelemetryStore};
use parley::ChatPipeline;
use parley_normalize::NormalizationOptions;

pub const FAKE_AUDIO: &[u8] = b"ID3fake-mpeg";

pub fn doc(id: &str, similarity: f32) -> Document {
    Document {
        id: id.to_string(),
        title: Some(format!("글 {id}")),
        content: format!("{id} 문서의 본문입니다."),
        content_with_context: None,
        url: Some(format!("/blog/{id}")),
        similarity,
    }
}

/// Defaults with single-attempt calls, short deadlines and no fillers.
pub fn test_config() -> ParleyConfig {
    let mut config = ParleyConfig::default();
    config.retry.policy = RetryPolicy::none();
    config.retry.request_timeout_secs = 5;
    config.normalization.options = NormalizationOptions::deterministic();
    config
}

// ────────────────────────────────────────────────────────────────────────────
// Fakes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    /// Calls that fail with a 503 before the embedder recovers.
    pub transient_failures: AtomicUsize,
    pub error: Option<ProviderError>,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Http {
                status: 503,
                body: "busy".into(),
            });
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub docs: Vec<Document>,
    pub calls: AtomicUsize,
    pub error: Option<ProviderError>,
    pub last_query: Mutex<Option<MatchQuery>>,
}

impl FakeStore {
    pub fn with_docs(docs: Vec<Document>) -> Self {
        Self {
            docs,
            ..Self::default()
        }
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn match_documents(&self, query: &MatchQuery) -> Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self.docs.iter().take(query.limit).cloned().collect())
    }
}

pub struct FakeReranker {
    pub answer: std::result::Result<Vec<usize>, ProviderError>,
    pub calls: AtomicUsize,
}

impl FakeReranker {
    pub fn ordering(indices: Vec<usize>) -> Self {
        Self {
            answer: Ok(indices),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: Err(ProviderError::Http {
                status: 500,
                body: "rerank exploded".into(),
            }),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Reranker for FakeReranker {
    async fn rerank(&self, _query: &str, _documents: &[String], _top_n: usize) -> Result<Vec<usize>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// Yields a fixed list of fragments, optionally failing.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub fragments: Vec<String>,
    /// Fail when the stream is opened.
    pub open_error: Option<ProviderError>,
    /// Yield a stream error instead of the fragment at this index.
    pub fail_at: Option<usize>,
    /// Sleep between fragments.
    pub delay: Option<Duration>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn answering(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn last_messages(&self) -> Vec<Turn> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }
        let fragments = self.fragments.clone();
        let fail_at = self.fail_at;
        let delay = self.delay;
        let stream = async_stream::stream! {
            for (i, fragment) in fragments.into_iter().enumerate() {
                if fail_at == Some(i) {
                    yield Err(ProviderError::Stream("connection reset".into()));
                    return;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(fragment);
            }
        };
        Ok(Box::pin(stream))
    }
}

pub struct FakeTranscriber {
    pub text: String,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn hearing(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &AudioInput, language: &str) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Transcription {
            text: self.text.clone(),
            language: language.to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, voice_override: Option<&str>) -> Result<Bytes> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice_override.map(String::from)));
        Ok(Bytes::from_static(FAKE_AUDIO))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

/// A pipeline over fakes plus handles to inspect them.
pub struct Harness {
    pub embedder: Arc<FakeEmbedder>,
    pub store: Arc<FakeStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub transcriber: Arc<FakeTranscriber>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub metrics: SqliteTelemetryStore,
}

impl Harness {
    pub fn new(store: FakeStore, generator: ScriptedGenerator) -> Self {
        Self {
            embedder: Arc::new(FakeEmbedder::default()),
            store: Arc::new(store),
            generator: Arc::new(generator),
            transcriber: Arc::new(FakeTranscriber::hearing("요즘 어떤 책을 읽으세요?")),
            synthesizer: Arc::new(FakeSynthesizer::default()),
            metrics: SqliteTelemetryStore::in_memory().unwrap(),
        }
    }

    pub fn with_embedder(mut self, embedder: FakeEmbedder) -> Self {
        self.embedder = Arc::new(embedder);
        self
    }

    pub fn with_transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = Arc::new(transcriber);
        self
    }

    /// Builder with every fake attached and no reranker.
    pub fn builder(&self) -> ChatPipelineBuilder {
        ChatPipeline::builder()
            .embedder(self.embedder.clone())
            .vector_store(self.store.clone())
            .generator(self.generator.clone())
            .transcriber(self.transcriber.clone())
            .synthesizer(self.synthesizer.clone())
            .telemetry(Arc::new(self.metrics.clone()))
            .config(test_config())
    }

    pub fn pipeline(&self) -> ChatPipeline {
        self.builder().build().unwrap()
    }

    /// Wait until at least `n` rows were persisted.
    pub async fn rows(&self, n: usize) -> Vec<MetricsRow> {
        for _ in 0..100 {
            let rows = self.metrics.recent(None, 100).await.unwrap();
            if rows.len() >= n {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {n} persisted metrics rows");
    }
}

/// Drain a response stream and decode its frames.
pub async fn collect_frames(mut stream: ChatStream) -> Vec<ChatFrame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    while let Some(chunk) = stream.next().await {
        frames.extend(decoder.push(&chunk).unwrap());
    }
    frames.extend(decoder.finish().unwrap());
    frames
}

/// Concatenate the content deltas of `frames`.
pub fn answer_text(frames: &[ChatFrame]) -> String {
    frames
        .iter()
        .filter_map(|f| match f {
            ChatFrame::Content { data } => Some(data.as_str()),
            _ => None,
        })
        .collect()
}
