//! Collects an in-band error payload that may span several lines.

use bytes::BytesMut;

use crate::error::{ApiError, ErrorResponse};

/// Growable buffer for error bytes; re-parsed in full after every append.
///
/// A parse failure is treated as "not complete yet": truncated and malformed
/// payloads look the same until the stream ends.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    buf: BytesMut,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempt to parse the buffered bytes as `{"error": {...}}`.
    pub fn try_parse(&self) -> Option<ApiError> {
        if self.buf.is_empty() {
            return None;
        }
        serde_json::from_slice::<ErrorResponse>(&self.buf)
            .ok()
            .and_then(|r| r.error)
    }

    /// Final answer once the body has ended: the parsed error, or the raw
    /// bytes as the message when they never formed a complete object.
    pub fn finish(&self) -> Option<ApiError> {
        if !self.is_pending() {
            return None;
        }
        self.try_parse().or_else(|| {
            Some(ApiError {
                kind: None,
                message: self.raw(),
                http_status_code: None,
            })
        })
    }

    /// True once any error bytes have been buffered.
    pub fn is_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Buffered bytes as lossy UTF-8, for diagnostics.
    pub fn raw(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_not_an_error() {
        let acc = ErrorAccumulator::new();
        assert!(!acc.is_pending());
        assert!(acc.try_parse().is_none());
    }

    #[test]
    fn completes_across_appends() {
        let mut acc = ErrorAccumulator::new();
        acc.append(br#"{"error":"#);
        assert!(acc.is_pending());
        assert!(acc.try_parse().is_none());

        acc.append(br#"{"message":"x"}}"#);
        let err = acc.try_parse().expect("complete payload");
        assert_eq!(err.message, "x");
        assert_eq!(err.kind, None);
        assert_eq!(err.http_status_code, None);
    }

    #[test]
    fn typed_envelope_parses() {
        let mut acc = ErrorAccumulator::new();
        acc.append(
            br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        let err = acc.try_parse().unwrap();
        assert_eq!(err.kind.as_deref(), Some("overloaded_error"));
        assert_eq!(err.message, "Overloaded");
    }

    #[test]
    fn json_without_error_field_is_incomplete() {
        let mut acc = ErrorAccumulator::new();
        acc.append(br#"{"completion":"hi"}"#);
        assert!(acc.try_parse().is_none());
        assert_eq!(acc.raw(), r#"{"completion":"hi"}"#);
    }

    #[test]
    fn finish_falls_back_to_raw_bytes() {
        let mut acc = ErrorAccumulator::new();
        assert!(acc.finish().is_none());
        acc.append(br#"{"error":{"message":"cut"#);
        let err = acc.finish().unwrap();
        assert_eq!(err.message, r#"{"error":{"message":"cut"#);
    }

    #[test]
    fn parse_is_idempotent() {
        let mut acc = ErrorAccumulator::new();
        acc.append(br#"{"error":{"message":"boom"}}"#);
        assert_eq!(acc.try_parse(), acc.try_parse());
        assert_eq!(acc.raw().len(), 28);
    }
}
