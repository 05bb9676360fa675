//! The response pipeline: intake, retrieval, context assembly, generation,
//! and the voice-only speech stages.

pub mod cache;
pub mod context;
pub mod intake;
pub mod messages;
pub mod orchestrator;
pub mod retrieval;
pub mod retry;

pub use orchestrator::{ChatPipeline, ChatPipelineBuilder, ChatStream, FALLBACK_ANSWER};
