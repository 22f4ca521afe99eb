use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error returned by the remote service, either as the body of a
/// failed request or in-band on an open stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: String,
    /// Filled from the HTTP response when known; never part of the wire shape.
    #[serde(skip)]
    pub http_status_code: Option<u16>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("api error")?;
        if let Some(code) = self.http_status_code {
            write!(f, " (status {code})")?;
        }
        if let Some(kind) = &self.kind {
            write!(f, " {kind}")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ApiError {}

/// Envelope the service wraps errors in: `{"type":"error","error":{...}}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// Core error type for textgen.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("max_tokens_to_sample must be set")]
    MissingMaxTokens,

    #[error("streaming is not supported with this method, use create_complete_stream")]
    StreamNotSupported,

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Non-2xx response whose body was not a structured error.
    #[error("request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("failed to decode stream payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("stream has sent too many empty messages (limit {limit})")]
    TooManyEmptyMessages { limit: u32 },

    #[error("stream is closed")]
    StreamClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TextGenError {
    /// Short stable label, used for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPrompt | Self::MissingMaxTokens | Self::StreamNotSupported => "validation",
            Self::Api(_) => "api",
            Self::Request { .. } => "request",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::TooManyEmptyMessages { .. } => "stall",
            Self::StreamClosed => "closed",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => e.http_status_code,
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, TextGenError>;
