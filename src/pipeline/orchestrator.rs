//! Request orchestration for the text and voice paths.
//!
//! ```text
//! text:  intake ─> embed ─> retrieve ─> rerank ─> context ─> generate (streamed frames)
//! voice: intake ─> transcribe ─> embed ─> retrieve ─> rerank ─> context
//!        ─> generate (buffered) ─> normalize ─> synthesize
//! ```
//!
//! Everything before the first frame runs inline so a failure there becomes
//! an `Err`. Generation for the text path runs on a spawned task that
//! forwards encoded frames through a bounded channel; from that point the
//! stream always ends with exactly one `done` or `error` frame.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parley_normalize::normalize_for_speech;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::config::{ParleyConfig, TelemetryBackend};
use crate::error::{GENERATION_FAILED, PipelineError, Result, ValidationError, error_codes};
use crate::pipeline::cache::EmbeddingCache;
use crate::pipeline::context::{Persona, build_messages};
use crate::pipeline::intake;
use crate::pipeline::messages::{
    AudioInput, ChatRequest, Citation, Document, Query, SourcePreview, Transcription, Turn,
    VoiceChatResponse, VoiceMetricsSummary, VoiceRequest,
};
use crate::pipeline::retrieval::{RankOutcome, rerank_or_fallback};
use crate::pipeline::retry::{with_retry, with_timeout};
use crate::protocol::{ChatFrame, FrameEncoder};
use crate::providers::cohere::CohereReranker;
use crate::providers::elevenlabs::ElevenLabsSynthesizer;
use crate::providers::openai::{OpenAiClient, OpenAiConfig};
use crate::providers::supabase::{SupabaseClient, SupabaseVectorStore};
use crate::providers::{
    Embedder, GenerationRequest, Generator, MatchQuery, ProviderError, Reranker, Synthesizer,
    TextStream, Transcriber, VectorStore,
};
use crate::stage::{Channel, Stage};
use crate::telemetry::collector::labels;
use crate::telemetry::spans::{SPAN_REQUEST, SPAN_STAGE};
use crate::telemetry::{
    NoopTelemetryStore, RequestMetrics, SqliteTelemetryStore, SupabaseTelemetryStore, TelemetryStore,
};

/// Spoken when generation produced no text.
pub const FALLBACK_ANSWER: &str = "죄송합니다, 답변을 생성할 수 없습니다.";

/// Encoded frames of one streamed answer.
pub struct ChatStream {
    session_id: String,
    inner: ReceiverStream<Bytes>,
}

impl ChatStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Stream for ChatStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Documents selected for one question.
struct Retrieved {
    found: usize,
    documents: Vec<Document>,
}

/// The multi-stage response pipeline. Cheap to clone.
#[derive(Clone)]
pub struct ChatPipeline {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    reranker: Option<Arc<dyn Reranker>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    cache: Option<EmbeddingCache>,
    telemetry: Arc<dyn TelemetryStore>,
    config: Arc<ParleyConfig>,
    persona: Arc<Persona>,
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("reranker", &self.reranker.is_some())
            .field("transcriber", &self.transcriber.is_some())
            .field("synthesizer", &self.synthesizer.is_some())
            .field("cache", &self.cache.is_some())
            .field("telemetry", &self.telemetry.name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ChatPipeline`].
#[derive(Default)]
pub struct ChatPipelineBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    generator: Option<Arc<dyn Generator>>,
    reranker: Option<Arc<dyn Reranker>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    cache: Option<EmbeddingCache>,
    telemetry: Option<Arc<dyn TelemetryStore>>,
    config: Option<ParleyConfig>,
    persona: Option<Persona>,
}

impl ChatPipelineBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn embedding_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn telemetry(mut self, store: Arc<dyn TelemetryStore>) -> Self {
        self.telemetry = Some(store);
        self
    }

    pub fn config(mut self, config: ParleyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when the embedder, vector store or
    /// generator is missing.
    pub fn build(self) -> Result<ChatPipeline> {
        let missing = |what: &str| PipelineError::Config(format!("pipeline needs {what}"));
        let config = self.config.unwrap_or_default();
        let persona = self
            .persona
            .unwrap_or_else(|| Persona::new(config.persona.name.clone()));
        Ok(ChatPipeline {
            embedder: self.embedder.ok_or_else(|| missing("an embedder"))?,
            vector_store: self.vector_store.ok_or_else(|| missing("a vector store"))?,
            generator: self.generator.ok_or_else(|| missing("a generator"))?,
            reranker: self.reranker,
            transcriber: self.transcriber,
            synthesizer: self.synthesizer,
            cache: self.cache,
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(NoopTelemetryStore)),
            config: Arc::new(config),
            persona: Arc::new(persona),
        })
    }
}

/// Record an upstream failure, finalize telemetry and build the error.
fn fail(mut metrics: RequestMetrics, stage: Stage, error: ProviderError) -> PipelineError {
    metrics.record_error(stage, error.to_string(), Some(error.code()));
    metrics.finalize();
    PipelineError::upstream(stage, error)
}

impl ChatPipeline {
    pub fn builder() -> ChatPipelineBuilder {
        ChatPipelineBuilder::default()
    }

    /// Wire the remote adapters described by `config`.
    ///
    /// Reranking and synthesis are attached only when their keys are set.
    /// A telemetry store that cannot be opened is replaced by a no-op store.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when a required adapter cannot be built.
    pub fn from_config(config: ParleyConfig) -> Result<Self> {
        let timeout = config.retry.request_timeout();
        let invalid = |e: ProviderError| PipelineError::Config(e.to_string());

        let openai = Arc::new(
            OpenAiClient::new(OpenAiConfig::from(&config.openai), timeout).map_err(invalid)?,
        );
        let supabase = SupabaseClient::new(
            &config.vector_store.url,
            &config.vector_store.service_key,
            timeout,
        )
        .map_err(invalid)?;

        let mut builder = Self::builder()
            .embedder(openai.clone())
            .generator(openai.clone())
            .transcriber(openai)
            .vector_store(Arc::new(SupabaseVectorStore::new(
                supabase.clone(),
                &config.vector_store.match_function,
            )));

        if let Some(api_key) = config.rerank.api_key.as_deref().filter(|_| config.rerank.enabled()) {
            let reranker = CohereReranker::new(
                api_key,
                &config.rerank.base_url,
                &config.rerank.model,
                timeout,
            )
            .map_err(invalid)?;
            builder = builder.reranker(Arc::new(reranker));
        } else {
            tracing::info!("reranking disabled, candidates keep retrieval order");
        }

        if config.synthesis.enabled() {
            let synthesizer =
                ElevenLabsSynthesizer::from_config(&config.synthesis, timeout).map_err(invalid)?;
            builder = builder.synthesizer(Arc::new(synthesizer));
        } else {
            tracing::info!("speech synthesis disabled");
        }

        if let Some(cache) = EmbeddingCache::from_config(&config.cache) {
            builder = builder.embedding_cache(cache);
        }

        let telemetry: Arc<dyn TelemetryStore> = match config.telemetry.backend {
            TelemetryBackend::None => Arc::new(NoopTelemetryStore),
            TelemetryBackend::Supabase => Arc::new(SupabaseTelemetryStore::new(
                supabase,
                &config.vector_store.metrics_table,
            )),
            TelemetryBackend::Sqlite => match SqliteTelemetryStore::open(&config.telemetry.sqlite_path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "metrics database unavailable, metrics are discarded");
                    Arc::new(NoopTelemetryStore)
                }
            },
        };

        let mut persona = Persona::new(config.persona.name.clone());
        if let Some(path) = &config.persona.opinions_path {
            persona = persona.load_opinions(path);
        }

        builder
            .telemetry(telemetry)
            .persona(persona)
            .config(config)
            .build()
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    pub fn telemetry_store(&self) -> Arc<dyn TelemetryStore> {
        Arc::clone(&self.telemetry)
    }

    fn request_timeout(&self) -> Duration {
        self.config.retry.request_timeout()
    }

    fn new_metrics(&self, channel: Channel) -> RequestMetrics {
        RequestMetrics::new(channel, Arc::clone(&self.telemetry), self.config.cost.clone())
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get(text).await
        {
            tracing::debug!("embedding cache hit");
            return Ok(hit.as_ref().clone());
        }

        let embedding = with_retry(
            &self.config.retry.policy,
            self.request_timeout(),
            "embedding",
            || self.embedder.embed(text),
        )
        .await?;

        if let Some(cache) = &self.cache {
            cache.insert(text, embedding.clone()).await;
        }
        Ok(embedding)
    }

    /// Embed, search and rerank. Failures are recorded on `metrics`.
    async fn retrieve(
        &self,
        metrics: &mut RequestMetrics,
        text: &str,
        threshold: f32,
        limit: usize,
    ) -> std::result::Result<Retrieved, (Stage, ProviderError)> {
        metrics.checkpoint(labels::RAG_START);
        let embedding = self
            .embed(text)
            .instrument(tracing::info_span!(SPAN_STAGE, stage = "embedding"))
            .await
            .map_err(|e| (Stage::Embedding, e))?;

        let query = MatchQuery {
            embedding,
            threshold,
            limit,
        };
        let candidates = with_retry(
            &self.config.retry.policy,
            self.request_timeout(),
            "vector search",
            || self.vector_store.match_documents(&query),
        )
        .instrument(tracing::info_span!(SPAN_STAGE, stage = "rag"))
        .await
        .map_err(|e| (Stage::Rag, e))?;
        metrics.checkpoint(labels::RAG_END);

        let found = candidates.len();
        metrics.checkpoint(labels::RERANK_START);
        let ranked = rerank_or_fallback(
            self.reranker.as_deref(),
            text,
            candidates,
            self.config.retrieval.rerank_top_n,
            self.request_timeout(),
        )
        .instrument(tracing::info_span!(SPAN_STAGE, stage = "rerank"))
        .await;
        metrics.checkpoint(labels::RERANK_END);

        if let RankOutcome::Fallback(reason) = &ranked.outcome {
            let _ = metrics.set_metric("rerank_fallback", reason.as_str());
        }
        metrics.set_documents(found, &ranked.documents);
        tracing::debug!(found, used = ranked.documents.len(), "documents selected");

        Ok(Retrieved {
            found,
            documents: ranked.documents,
        })
    }

    async fn open_generation(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<TextStream, ProviderError> {
        with_timeout(
            self.request_timeout(),
            "generation",
            self.generator.stream(request),
        )
        .await
    }

    /// Answer a text question as a stream of encoded frames.
    ///
    /// # Errors
    ///
    /// Validation, embedding and retrieval failures are returned before any
    /// frame is produced. Later failures end the stream with an `error` frame.
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream> {
        let query = intake::validate_chat(request, &self.config.limits)?;

        let mut metrics = self.new_metrics(Channel::Text);
        let session_id = metrics.session_id().to_string();
        let span = tracing::info_span!(SPAN_REQUEST, channel = "text", session_id = %session_id);
        metrics.set_input(&query.text);

        let retrieved = match self
            .retrieve(
                &mut metrics,
                &query.text,
                self.config.retrieval.text_threshold,
                self.config.retrieval.text_match_count,
            )
            .instrument(span.clone())
            .await
        {
            Ok(retrieved) => retrieved,
            Err((stage, error)) => {
                tracing::error!(parent: &span, stage = %stage, error = %error, "retrieval failed");
                return Err(fail(metrics, stage, error));
            }
        };

        let preview_chars = self.config.retrieval.source_preview_chars;
        let sources: Vec<SourcePreview> = retrieved
            .documents
            .iter()
            .map(|d| SourcePreview::from_document(d, preview_chars))
            .collect();
        let request = GenerationRequest {
            messages: build_messages(
                Channel::Text,
                &self.persona,
                &query,
                &retrieved.documents,
                self.config.limits.max_context_chars,
            ),
            temperature: self.config.openai.text_temperature,
            max_tokens: self.config.openai.text_max_tokens,
        };

        let (tx, rx) = mpsc::channel(self.config.server.channel_capacity.max(1));
        let pipeline = self.clone();
        tokio::spawn(
            async move {
                pipeline.run_text_generation(request, sources, tx, metrics).await;
            }
            .instrument(span),
        );

        Ok(ChatStream {
            session_id,
            inner: ReceiverStream::new(rx),
        })
    }

    async fn run_text_generation(
        &self,
        request: GenerationRequest,
        sources: Vec<SourcePreview>,
        tx: mpsc::Sender<Bytes>,
        mut metrics: RequestMetrics,
    ) {
        let mut sink = FrameSink::new(tx);
        if !sink.send(ChatFrame::Sources { data: sources }).await {
            record_disconnect(&mut metrics);
            metrics.finalize();
            return;
        }

        metrics.checkpoint(labels::LLM_START);
        let mut answer = String::new();
        let outcome = match self.open_generation(&request).await {
            Ok(stream) => {
                forward_fragments(stream, &mut sink, &mut answer, self.request_timeout()).await
            }
            Err(error) => Forwarded::Failed(error),
        };
        metrics.checkpoint(labels::LLM_END);
        metrics.set_response(&answer);

        match outcome {
            Forwarded::Complete => {
                if !sink.send(ChatFrame::Done).await {
                    record_disconnect(&mut metrics);
                }
            }
            Forwarded::Failed(error) => {
                tracing::error!(error = %error, partial_chars = answer.chars().count(), "generation failed");
                metrics.record_error(Stage::Llm, error.to_string(), Some(error.code()));
                let _ = sink
                    .send(ChatFrame::Error {
                        message: GENERATION_FAILED.to_string(),
                    })
                    .await;
            }
            Forwarded::Disconnected => record_disconnect(&mut metrics),
        }

        metrics.finalize();
    }

    /// Answer a spoken question with a spoken answer.
    ///
    /// # Errors
    ///
    /// Fails on invalid audio, an empty transcript, or a failure in
    /// transcription, embedding, retrieval, generation or synthesis.
    /// Reranking failures fall back silently.
    pub async fn voice_chat(&self, request: VoiceRequest) -> Result<VoiceChatResponse> {
        let audio = intake::validate_audio(Some(request.audio), self.config.server.max_audio_bytes)?;
        let transcriber = self.require_transcriber()?;
        let synthesizer = self.require_synthesizer()?;

        let mut metrics = self.new_metrics(Channel::Voice);
        let span = tracing::info_span!(SPAN_REQUEST, channel = "voice", session_id = %metrics.session_id());
        let outcome = self
            .voice_chat_inner(audio, request.history, transcriber, synthesizer, &mut metrics)
            .instrument(span.clone())
            .await;

        match outcome {
            Ok(mut response) => {
                let record = metrics.finalize();
                response.metrics.total_duration = record.performance.total_duration;
                Ok(response)
            }
            Err((stage, VoiceFailure::Upstream(error))) => {
                tracing::error!(parent: &span, stage = %stage, error = %error, "voice chat failed");
                Err(fail(metrics, stage, error))
            }
            Err((stage, VoiceFailure::Invalid(invalid))) => {
                tracing::warn!(parent: &span, stage = %stage, error = %invalid, "voice input rejected");
                metrics.record_error(stage, invalid.to_string(), Some(error_codes::VALIDATION_FAILED));
                metrics.finalize();
                Err(PipelineError::Validation(invalid))
            }
        }
    }

    async fn voice_chat_inner(
        &self,
        audio: AudioInput,
        history: Vec<Turn>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        metrics: &mut RequestMetrics,
    ) -> std::result::Result<VoiceChatResponse, (Stage, VoiceFailure)> {
        let config = &self.config;

        metrics.checkpoint(labels::STT_START);
        let transcription = with_retry(
            &config.retry.policy,
            self.request_timeout(),
            "transcription",
            || transcriber.transcribe(&audio, &config.openai.transcription_language),
        )
        .instrument(tracing::info_span!(SPAN_STAGE, stage = "stt"))
        .await
        .map_err(|e| (Stage::Stt, VoiceFailure::Upstream(e)))?;
        metrics.checkpoint(labels::STT_END);

        let text = intake::validate_transcript(&transcription.text)
            .map_err(|v| (Stage::Stt, VoiceFailure::Invalid(v)))?;
        metrics.set_transcription(&text);
        metrics.set_input(&text);
        tracing::info!(chars = text.chars().count(), "transcribed");

        let query = Query {
            text,
            history: intake::trim_history(history, config.limits.max_history_turns),
            page_context: None,
        };
        let retrieved = self
            .retrieve(
                metrics,
                &query.text,
                config.retrieval.voice_threshold,
                config.retrieval.voice_match_count,
            )
            .await
            .map_err(|(stage, e)| (stage, VoiceFailure::Upstream(e)))?;

        let request = GenerationRequest {
            messages: build_messages(
                Channel::Voice,
                &self.persona,
                &query,
                &retrieved.documents,
                config.limits.max_context_chars,
            ),
            temperature: config.openai.voice_temperature,
            max_tokens: config.openai.voice_max_tokens,
        };

        metrics.checkpoint(labels::LLM_START);
        let answer = self
            .generate_full(&request)
            .instrument(tracing::info_span!(SPAN_STAGE, stage = "llm"))
            .await
            .map_err(|e| (Stage::Llm, VoiceFailure::Upstream(e)))?;
        metrics.checkpoint(labels::LLM_END);
        let answer = if answer.trim().is_empty() {
            FALLBACK_ANSWER.to_string()
        } else {
            answer
        };
        metrics.set_response(&answer);

        metrics.checkpoint(labels::NORM_START);
        let normalized = {
            let mut rng = self.filler_rng();
            normalize_for_speech(&answer, &config.normalization.options, &mut rng)
        };
        metrics.checkpoint(labels::NORM_END);
        metrics.set_normalization(&normalized);

        let speech = if normalized.normalized.is_empty() {
            answer.clone()
        } else {
            normalized.normalized.clone()
        };

        metrics.checkpoint(labels::TTS_START);
        let audio_bytes = with_timeout(
            self.request_timeout(),
            "synthesis",
            synthesizer.synthesize(&speech, None),
        )
        .instrument(tracing::info_span!(SPAN_STAGE, stage = "tts"))
        .await
        .map_err(|e| (Stage::Tts, VoiceFailure::Upstream(e)))?;
        metrics.checkpoint(labels::TTS_END);
        metrics.set_synthesized_chars(speech.chars().count());

        let citations = retrieved.documents.iter().map(Citation::from).collect();
        tracing::debug!(found = retrieved.found, audio_bytes = audio_bytes.len(), "voice answer ready");

        Ok(VoiceChatResponse {
            transcription: query.text,
            response_text: answer,
            audio: base64::engine::general_purpose::STANDARD.encode(&audio_bytes),
            citations,
            metrics: VoiceMetricsSummary {
                session_id: metrics.session_id().to_string(),
                total_duration: metrics.elapsed_ms(),
                normalization_changes: normalized.changes,
            },
        })
    }

    /// Collect a whole completion.
    async fn generate_full(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, ProviderError> {
        let mut stream = self.open_generation(request).await?;
        let mut answer = String::new();
        loop {
            match tokio::time::timeout(self.request_timeout(), stream.next()).await {
                Ok(Some(Ok(fragment))) => answer.push_str(&fragment),
                Ok(Some(Err(error))) => return Err(error),
                Ok(None) => return Ok(answer),
                Err(_) => {
                    return Err(ProviderError::Timeout(
                        "generation stalled between fragments".into(),
                    ));
                }
            }
        }
    }

    fn filler_rng(&self) -> StdRng {
        match self.config.normalization.filler_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn require_transcriber(&self) -> Result<Arc<dyn Transcriber>> {
        self.transcriber
            .clone()
            .ok_or_else(|| PipelineError::Config("speech-to-text is not configured".into()))
    }

    fn require_synthesizer(&self) -> Result<Arc<dyn Synthesizer>> {
        self.synthesizer
            .clone()
            .ok_or_else(|| PipelineError::Config("speech synthesis is not configured".into()))
    }

    /// Transcribe uploaded audio without answering it.
    ///
    /// # Errors
    ///
    /// Fails on invalid audio or a transcription failure.
    pub async fn transcribe(&self, audio: Option<AudioInput>) -> Result<Transcription> {
        let audio = intake::validate_audio(audio, self.config.server.max_audio_bytes)?;
        let transcriber = self.require_transcriber()?;
        let language = &self.config.openai.transcription_language;
        let transcription = with_retry(
            &self.config.retry.policy,
            self.request_timeout(),
            "transcription",
            || transcriber.transcribe(&audio, language),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "transcription failed");
            PipelineError::upstream(Stage::Stt, e)
        })?;
        Ok(Transcription {
            text: transcription.text.trim().to_string(),
            language: transcription.language,
        })
    }

    /// Synthesize speech for `text`, optionally with another voice.
    ///
    /// # Errors
    ///
    /// Fails on empty or oversized text or a synthesis failure.
    pub async fn synthesize(&self, text: &str, voice_override: Option<&str>) -> Result<Bytes> {
        let text = intake::validate_synthesis_text(text, &self.config.limits)?;
        let synthesizer = self.require_synthesizer()?;
        with_timeout(
            self.request_timeout(),
            "synthesis",
            synthesizer.synthesize(&text, voice_override),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "synthesis failed");
            PipelineError::upstream(Stage::Tts, e)
        })
    }
}

enum VoiceFailure {
    Upstream(ProviderError),
    Invalid(ValidationError),
}

fn record_disconnect(metrics: &mut RequestMetrics) {
    tracing::info!("client disconnected, stopping generation");
    let _ = metrics.set_metric("client_disconnected", true);
}

/// Validates and forwards frames to the response body.
struct FrameSink {
    encoder: FrameEncoder,
    tx: mpsc::Sender<Bytes>,
}

impl FrameSink {
    fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            encoder: FrameEncoder::new(),
            tx,
        }
    }

    /// Returns false once the receiver is gone.
    async fn send(&mut self, frame: ChatFrame) -> bool {
        match self.encoder.encode(&frame) {
            Ok(line) => self.tx.send(line).await.is_ok(),
            Err(error) => {
                tracing::error!(error = %error, "frame rejected by encoder");
                !self.tx.is_closed()
            }
        }
    }
}

enum Forwarded {
    Complete,
    Failed(ProviderError),
    Disconnected,
}

/// Forward each non-empty fragment as a content frame, accumulating the answer.
async fn forward_fragments(
    mut stream: TextStream,
    sink: &mut FrameSink,
    answer: &mut String,
    idle_timeout: Duration,
) -> Forwarded {
    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(fragment))) => {
                if fragment.is_empty() {
                    continue;
                }
                answer.push_str(&fragment);
                if !sink.send(ChatFrame::Content { data: fragment }).await {
                    return Forwarded::Disconnected;
                }
            }
            Ok(Some(Err(error))) => return Forwarded::Failed(error),
            Ok(None) => return Forwarded::Complete,
            Err(_) => {
                return Forwarded::Failed(ProviderError::Timeout(
                    "generation stalled between fragments".into(),
                ));
            }
        }
    }
}
