use serde::{Deserialize, Serialize};

pub const CLAUDE_V2_1: &str = "claude-2.1";
pub const CLAUDE_V2: &str = "claude-2";
pub const CLAUDE_V2_0: &str = "claude-2.0";
pub const CLAUDE_INSTANT_V1: &str = "claude-instant-v1";
pub const CLAUDE_INSTANT_V1_2: &str = "claude-instant-1.2";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CompleteMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl CompleteMetadata {
    fn is_empty(&self) -> bool {
        self.user_id.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CompleteRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens_to_sample: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "CompleteMetadata::is_empty")]
    pub metadata: CompleteMetadata,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl CompleteRequest {
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens_to_sample: u32,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens_to_sample,
            ..Default::default()
        }
    }
}

/// One completion body; streamed responses carry the delta in `completion`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CompleteResponse {
    #[serde(default)]
    pub completion: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub log_id: String,
}
