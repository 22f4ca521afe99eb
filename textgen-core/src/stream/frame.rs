//! Line classification for the event-stream wire format. No I/O happens here.

use serde::de::DeserializeOwned;

use crate::error::{CoreResult, TextGenError};

/// Prefix that marks an error object, with or without a `data:` field.
const ERROR_MARKER: &[u8] = br#"{"error""#;
const DONE_MARKER: &[u8] = b"[DONE]";

/// What the current event's payload is expected to carry, taken from the most
/// recent `event:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentHint {
    #[default]
    Data,
    Error,
    Keepalive,
}

impl ContentHint {
    pub fn from_event(name: &[u8]) -> Self {
        match name {
            b"error" => Self::Error,
            b"ping" => Self::Keepalive,
            _ => Self::Data,
        }
    }
}

/// One classified line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// JSON payload for the caller's type.
    Data(&'a [u8]),
    /// Bytes belonging to an error object; may be a fragment.
    Error(&'a [u8]),
    /// `event:` field naming the next payload.
    Event(&'a [u8]),
    /// Blank line ending the current event.
    Boundary,
    /// `data: [DONE]`.
    Done,
    /// Comment, keepalive, unknown field or empty payload.
    Empty,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn classify<'a>(&self, line: &'a [u8], hint: ContentHint) -> Frame<'a> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Frame::Boundary;
        }
        if let Some(name) = field_value(line, b"event") {
            return Frame::Event(name);
        }
        let payload = field_value(line, b"data");

        match hint {
            // continuation lines of an error object may arrive without a field name
            ContentHint::Error => return Frame::Error(payload.unwrap_or(line)),
            ContentHint::Keepalive => return Frame::Empty,
            ContentHint::Data => {}
        }

        match payload {
            Some([]) => Frame::Empty,
            Some(p) if p == DONE_MARKER => Frame::Done,
            Some(p) if is_error_start(p) => Frame::Error(p),
            Some(p) => Frame::Data(p),
            None if is_error_start(line) => Frame::Error(line),
            None => Frame::Empty,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> CoreResult<T> {
        serde_json::from_slice(payload).map_err(TextGenError::Decode)
    }
}

/// Error objects are recognised however much whitespace follows the field name.
fn is_error_start(payload: &[u8]) -> bool {
    payload.trim_ascii_start().starts_with(ERROR_MARKER)
}

/// Value of an SSE field (`name:value`, one optional leading space), if `line` is that field.
fn field_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(name)?.strip_prefix(b":")?;
    Some(rest.strip_prefix(b" ").unwrap_or(rest))
}
