use serde::{Deserialize, Serialize};

/// Structured log of one non-streaming completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionLog {
    pub model: Option<String>,
    pub log_id: Option<String>,
    /// Request id header returned by the service.
    pub request_id: Option<String>,
    pub created_at_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub stop_reason: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub status: Option<u16>,
    pub text: Option<String>,
}

impl CompletionLog {
    pub fn new() -> Self { Self::default() }
    pub fn model(mut self, v: &str) -> Self { self.model = Some(v.to_string()); self }
    pub fn log_id_opt(mut self, v: Option<&str>) -> Self { self.log_id = v.map(|s| s.to_string()); self }
    pub fn request_id_opt(mut self, v: Option<&str>) -> Self { self.request_id = v.map(|s| s.to_string()); self }
    pub fn created_at_ms(mut self, v: u64) -> Self { self.created_at_ms = Some(v); self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = Some(v); self }
    pub fn stop_reason_opt(mut self, v: Option<&str>) -> Self { self.stop_reason = v.map(|s| s.to_string()); self }
    pub fn text_opt(mut self, v: Option<&str>) -> Self { self.text = v.map(|s| s.to_string()); self }
    pub fn error(mut self, kind: &str, message: &str, status: Option<u16>) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self.status = status;
        self
    }
}

/// Summary of one stream session, emitted once when it ends or is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLog {
    pub model: Option<String>,
    /// "eof", "done", "closed" or "error".
    pub outcome: Option<String>,
    pub frames: Option<u64>,
    pub empty_frames: Option<u64>,
    pub latency_ms: Option<u64>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl StreamLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn model_opt(mut self, v: Option<&str>) -> Self {
        self.model = v.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, v: &str) -> Self {
        self.outcome = Some(v.to_string());
        self
    }
    pub fn frames(mut self, n: u64) -> Self {
        self.frames = Some(n);
        self
    }
    pub fn empty_frames(mut self, n: u64) -> Self {
        self.empty_frames = Some(n);
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
}
