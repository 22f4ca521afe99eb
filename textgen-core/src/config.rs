use std::{fs, path::Path};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, TextGenError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_EMPTY_MESSAGES_LIMIT: u32 = 300;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_version() -> String {
    DEFAULT_API_VERSION.to_string()
}
fn default_empty_messages_limit() -> u32 {
    DEFAULT_EMPTY_MESSAGES_LIMIT
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout for non-streaming requests in milliseconds (default 60000ms).
    /// Streams are not bounded by it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Runtime configuration for `Client`.
#[derive(Debug)]
pub struct ClientConfig {
    pub api_key: SecretString,
    /// Value of the `anthropic-version` header.
    pub version: String,
    pub base_url: String,
    /// Consecutive empty frames a stream may send before it is declared stalled.
    pub empty_messages_limit: u32,
    pub http: HttpCfg,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            version: default_version(),
            base_url: default_base_url(),
            empty_messages_limit: default_empty_messages_limit(),
            http: HttpCfg::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_empty_messages_limit(mut self, limit: u32) -> Self {
        self.empty_messages_limit = limit;
        self
    }
}

/// On-disk form of `ClientConfig`. The key itself never lives in the file,
/// only the name of the environment variable holding it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_empty_messages_limit")]
    pub empty_messages_limit: u32,
    #[serde(default)]
    pub http: HttpCfg,
}

impl FileConfig {
    /// Load a FileConfig from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(TextGenError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| TextGenError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| TextGenError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| TextGenError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| TextGenError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| TextGenError::Other(e.into())))?,
        };
        if cfg.empty_messages_limit == 0 {
            return Err(TextGenError::Other(anyhow::anyhow!(
                "empty_messages_limit must be positive"
            )));
        }
        Ok(cfg)
    }

    /// Resolve the API key from the environment and build a `ClientConfig`.
    pub fn into_client_config(self) -> CoreResult<ClientConfig> {
        let key = std::env::var(&self.api_key_env).map_err(|_| {
            TextGenError::Other(anyhow::anyhow!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })?;
        Ok(ClientConfig {
            api_key: SecretString::from(key),
            version: self.version,
            base_url: self.base_url,
            empty_messages_limit: self.empty_messages_limit,
            http: self.http,
        })
    }
}
