//! Parley: a retrieval-augmented answer pipeline for a personal website.
//!
//! A visitor asks a question by text or by voice. The pipeline answers in
//! the site owner's voice, grounded in documents retrieved from a vector
//! store:
//!
//! ```text
//! text:  question ─> embed ─> retrieve ─> rerank ─> prompt ─> streamed answer
//! voice: audio ─> transcribe ─> ... ─> answer ─> normalize ─> synthesized speech
//! ```
//!
//! # Architecture
//!
//! - **Providers** (`providers`): embedding, vector search, reranking,
//!   generation, transcription and synthesis behind async traits
//! - **Pipeline** (`pipeline`): intake validation, retrieval with rerank
//!   fallback, context assembly, and the orchestrated text and voice paths
//! - **Protocol** (`protocol`): newline-delimited JSON frames for streamed answers
//! - **Telemetry** (`telemetry`): per-request stage timings, quality counters,
//!   cost estimates, persistence and aggregated statistics
//! - **Server** (`server`): the axum HTTP surface

pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod providers;
pub mod server;
pub mod stage;
pub mod telemetry;

pub use config::ParleyConfig;
pub use error::{PipelineError, Result, ValidationError};
pub use pipeline::{ChatPipeline, ChatStream};
pub use protocol::ChatFrame;
pub use server::ChatServer;
pub use stage::{Channel, Stage};
