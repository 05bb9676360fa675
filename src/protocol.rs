//! Newline-delimited JSON framing for the streamed text answer.
//!
//! A response body is a sequence of frames, one JSON object per line:
//!
//! ```text
//! {"type":"sources","data":[...]}
//! {"type":"content","data":"블로그에"}
//! {"type":"content","data":" 쓴 글이"}
//! {"type":"done"}
//! ```
//!
//! Exactly one `sources` frame comes first, then zero or more non-empty
//! `content` deltas, then exactly one terminal `done` or `error`.
//! [`FrameEncoder`] enforces that order on the server side and
//! [`FrameDecoder`] reassembles frames from arbitrary byte chunks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::pipeline::messages::SourcePreview;

/// Content type of a framed response body.
pub const CONTENT_TYPE: &str = "application/x-ndjson";

/// One line of the response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatFrame {
    Sources { data: Vec<SourcePreview> },
    Content { data: String },
    Done,
    Error { message: String },
}

impl ChatFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Frame ordering and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{0} frame before sources")]
    SourcesMissing(&'static str),

    #[error("sources frame sent twice")]
    DuplicateSources,

    #[error("{0} frame after the stream ended")]
    AfterTerminal(&'static str),

    #[error("empty content frame")]
    EmptyContent,

    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    AwaitingSources,
    Streaming,
    Terminated,
}

/// Serializes frames in protocol order.
#[derive(Debug)]
pub struct FrameEncoder {
    state: EncoderState,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_name(frame: &ChatFrame) -> &'static str {
    match frame {
        ChatFrame::Sources { .. } => "sources",
        ChatFrame::Content { .. } => "content",
        ChatFrame::Done => "done",
        ChatFrame::Error { .. } => "error",
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            state: EncoderState::AwaitingSources,
        }
    }

    /// Whether a terminal frame has been encoded.
    pub fn is_terminated(&self) -> bool {
        self.state == EncoderState::Terminated
    }

    /// Check `frame` against the current state and advance.
    pub fn accept(&mut self, frame: &ChatFrame) -> Result<(), ProtocolError> {
        let next = match (self.state, frame) {
            (EncoderState::Terminated, f) => return Err(ProtocolError::AfterTerminal(frame_name(f))),
            (EncoderState::AwaitingSources, ChatFrame::Sources { .. }) => EncoderState::Streaming,
            (EncoderState::AwaitingSources, ChatFrame::Error { .. }) => EncoderState::Terminated,
            (EncoderState::AwaitingSources, f) => {
                return Err(ProtocolError::SourcesMissing(frame_name(f)));
            }
            (EncoderState::Streaming, ChatFrame::Sources { .. }) => {
                return Err(ProtocolError::DuplicateSources);
            }
            (EncoderState::Streaming, ChatFrame::Content { data }) => {
                if data.is_empty() {
                    return Err(ProtocolError::EmptyContent);
                }
                EncoderState::Streaming
            }
            (EncoderState::Streaming, ChatFrame::Done | ChatFrame::Error { .. }) => {
                EncoderState::Terminated
            }
        };
        self.state = next;
        Ok(())
    }

    /// Validate and serialize `frame` as one line.
    pub fn encode(&mut self, frame: &ChatFrame) -> Result<Bytes, ProtocolError> {
        let mut line =
            serde_json::to_vec(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        self.accept(frame)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Reassembles frames from byte chunks split at arbitrary points.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every frame completed by it. Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ChatFrame>, ProtocolError> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line[..line.len() - 1])? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Parse whatever remains after the body ends.
    pub fn finish(&mut self) -> Result<Option<ChatFrame>, ProtocolError> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Result<Option<ChatFrame>, ProtocolError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a complete body.
pub fn decode_all(body: &[u8]) -> Result<Vec<ChatFrame>, ProtocolError> {
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.push(body)?;
    frames.extend(decoder.finish()?);
    Ok(frames)
}
