//! HTTP surface for the chat pipeline.
//!
//! ## Endpoints
//!
//! - `POST /api/chat` (JSON question, newline-delimited JSON frames back)
//! - `POST /api/voice/chat` (multipart `audio` plus optional `history`)
//! - `POST /api/voice/transcribe` (multipart `audio`)
//! - `POST /api/voice/synthesize` (JSON `{text, voice_id?}`, `audio/mpeg` back)
//! - `GET /api/metrics?range=&group_by=&limit=`
//!
//! Failures answer `{"error": "<message>"}` with 400 for rejected input and
//! 500 otherwise. Internal detail goes to the log only.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{PipelineError, ValidationError};
use crate::pipeline::ChatPipeline;
use crate::pipeline::messages::{AudioInput, ChatRequest, Turn, VoiceRequest};
use crate::protocol;
use crate::telemetry::TelemetryError;
use crate::telemetry::stats::{GroupBy, TimeRange, load_report};

/// Form field carrying the recording.
const AUDIO_FIELD: &str = "audio";

/// Form field carrying prior turns as a JSON array.
const HISTORY_FIELD: &str = "history";

/// Upper bound on `limit` for the metrics endpoint.
const MAX_METRICS_LIMIT: usize = 1000;

/// Headroom over the audio limit for multipart framing and the history field.
const FORM_OVERHEAD_BYTES: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// A failed request, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        let status = if error.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(code = error.code(), error = %error, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: error.user_message(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        PipelineError::from(error).into()
    }
}

impl From<TelemetryError> for ApiError {
    fn from(error: TelemetryError) -> Self {
        tracing::error!(code = error.code(), error = %error, "metrics query failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "메트릭을 불러오는 중 오류가 발생했습니다.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    pipeline: ChatPipeline,
}

/// Build the router for `pipeline`.
pub fn router(pipeline: ChatPipeline) -> Router {
    let body_limit = pipeline
        .config()
        .server
        .max_audio_bytes
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/voice/chat", post(handle_voice_chat))
        .route("/api/voice/transcribe", post(handle_transcribe))
        .route("/api/voice/synthesize", post(handle_synthesize))
        .route("/api/metrics", get(handle_metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState { pipeline })
}

// ---------------------------------------------------------------------------
// ChatServer
// ---------------------------------------------------------------------------

/// A running HTTP server. Aborted when dropped.
pub struct ChatServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ChatServer {
    /// Bind `bind_addr` (port `0` picks a free port) and serve in the background.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the listener cannot bind.
    pub async fn start(pipeline: ChatPipeline, bind_addr: &str) -> crate::error::Result<Self> {
        let app = router(pipeline);
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        info!("chat server listening on http://{addr}");

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                tracing::error!("chat server error: {e}");
            }
        });

        Ok(Self {
            addr,
            handle,
            cancel,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections; in-flight responses finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait until the server task ends.
    pub async fn stopped(&mut self) {
        let _ = (&mut self.handle).await;
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ValidationError::MalformedBody(e.to_string()).into())
}

/// Fields of an audio upload form.
#[derive(Default)]
struct AudioForm {
    audio: Option<AudioInput>,
    history: Vec<Turn>,
}

async fn read_audio_form(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<AudioForm> {
    let malformed = |e: &dyn std::fmt::Display| ValidationError::MalformedBody(e.to_string());
    let mut multipart = multipart.map_err(|e| malformed(&e))?;
    let mut form = AudioForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| malformed(&e))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            AUDIO_FIELD => {
                let filename = field.file_name().unwrap_or("recording.webm").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| malformed(&e))?;
                let mut audio = AudioInput::new(bytes, filename);
                if let Some(content_type) = content_type {
                    audio = audio.with_content_type(content_type);
                }
                form.audio = Some(audio);
            }
            HISTORY_FIELD => {
                let text = field.text().await.map_err(|e| malformed(&e))?;
                if !text.trim().is_empty() {
                    form.history =
                        serde_json::from_str(&text).map_err(|e| malformed(&e))?;
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// `POST /api/chat`
async fn handle_chat(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let request: ChatRequest = parse_json(&body)?;
    let stream = state.pipeline.stream_chat(request).await?;
    let session_id = stream.session_id().to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, protocol::CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-session-id", session_id)
        .body(Body::from_stream(stream.map(Ok::<_, Infallible>)))
        .map_err(|e| PipelineError::Stream(e.to_string()).into())
}

/// `POST /api/voice/chat`
async fn handle_voice_chat(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let form = read_audio_form(multipart).await?;
    let audio = form.audio.ok_or(ValidationError::MissingAudio)?;
    let response = state
        .pipeline
        .voice_chat(VoiceRequest {
            audio,
            history: form.history,
        })
        .await?;
    Ok(Json(response).into_response())
}

/// `POST /api/voice/transcribe`
async fn handle_transcribe(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let form = read_audio_form(multipart).await?;
    let transcription = state.pipeline.transcribe(form.audio).await?;
    Ok(Json(transcription).into_response())
}

#[derive(Debug, Deserialize)]
struct SynthesizeBody {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "voiceId")]
    voice_id: Option<String>,
}

/// `POST /api/voice/synthesize`
async fn handle_synthesize(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let request: SynthesizeBody = parse_json(&body)?;
    let voice = request.voice_id.as_deref().filter(|v| !v.trim().is_empty());
    let audio = state.pipeline.synthesize(&request.text, voice).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        audio,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
struct MetricsParams {
    range: Option<String>,
    group_by: Option<String>,
    limit: Option<String>,
}

/// `GET /api/metrics`
async fn handle_metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> ApiResult<Response> {
    let range = params
        .range
        .as_deref()
        .map(TimeRange::parse)
        .unwrap_or_default();
    let group_by = params
        .group_by
        .as_deref()
        .map(GroupBy::parse)
        .unwrap_or_default();
    let default_limit = state.pipeline.config().telemetry.default_query_limit;
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(default_limit)
        .clamp(1, MAX_METRICS_LIMIT);

    let store = state.pipeline.telemetry_store();
    let report = load_report(store.as_ref(), range, group_by, limit, chrono::Utc::now()).await?;
    Ok(Json(report).into_response())
}
