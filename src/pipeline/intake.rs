//! Request intake: validation and trimming before any remote stage runs.

use crate::config::LimitsConfig;
use crate::error::ValidationError;
use crate::pipeline::messages::{AudioInput, ChatRequest, PageContext, Query, Role, Turn};

/// Validate a chat request and shape it into a [`Query`].
///
/// The message is trimmed and measured in characters. History keeps only
/// user and assistant turns, then the most recent `max_history_turns` of
/// those. Page context content is cut to `max_page_context_chars`.
pub fn validate_chat(request: ChatRequest, limits: &LimitsConfig) -> Result<Query, ValidationError> {
    let text = validate_message(&request.message, limits)?;
    Ok(Query {
        text,
        history: trim_history(request.history, limits.max_history_turns),
        page_context: request
            .page_context
            .map(|page| truncate_page_context(page, limits.max_page_context_chars)),
    })
}

/// Trim `message` and check it against the length limit.
pub fn validate_message(message: &str, limits: &LimitsConfig) -> Result<String, ValidationError> {
    let text = message.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    let actual = text.chars().count();
    if actual > limits.max_message_chars {
        return Err(ValidationError::MessageTooLong {
            max: limits.max_message_chars,
            actual,
        });
    }
    Ok(text.to_string())
}

/// Keep the last `max_turns` user/assistant turns. Client-supplied system
/// turns and empty turns are dropped.
pub fn trim_history(history: Vec<Turn>, max_turns: usize) -> Vec<Turn> {
    let mut kept: Vec<Turn> = history
        .into_iter()
        .filter(|t| t.role != Role::System && !t.content.trim().is_empty())
        .collect();
    let skip = kept.len().saturating_sub(max_turns);
    kept.drain(..skip);
    kept
}

fn truncate_page_context(mut page: PageContext, max_chars: usize) -> PageContext {
    if page.content.chars().count() > max_chars {
        page.content = page.content.chars().take(max_chars).collect();
    }
    page
}

/// Check uploaded audio is present and within the size limit.
pub fn validate_audio(audio: Option<AudioInput>, max_bytes: usize) -> Result<AudioInput, ValidationError> {
    let audio = audio.ok_or(ValidationError::MissingAudio)?;
    if audio.bytes.is_empty() {
        return Err(ValidationError::MissingAudio);
    }
    if audio.bytes.len() > max_bytes {
        return Err(ValidationError::AudioTooLarge {
            max: max_bytes,
            actual: audio.bytes.len(),
        });
    }
    Ok(audio)
}

/// Trimmed transcript, or an error when nothing was recognized.
pub fn validate_transcript(text: &str) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyTranscript);
    }
    Ok(text.to_string())
}

/// Trimmed text for synthesis, within the message length limit.
pub fn validate_synthesis_text(text: &str, limits: &LimitsConfig) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptySynthesisText);
    }
    let actual = text.chars().count();
    if actual > limits.max_message_chars {
        return Err(ValidationError::MessageTooLong {
            max: limits.max_message_chars,
            actual,
        });
    }
    Ok(text.to_string())
}
