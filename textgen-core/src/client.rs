use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{CoreResult, TextGenError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{CompleteRequest, CompleteResponse};
use crate::stream::{CompletionStream, LineSource, StreamReader};
use crate::telemetry::CompletionLog;

/// Client for the text-completion API.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    http: HttpClient,
}

impl Client {
    pub fn new(api_key: impl Into<String>) -> CoreResult<Self> {
        Self::with_config(ClientConfig::new(api_key))
    }

    pub fn with_config(config: ClientConfig) -> CoreResult<Self> {
        let http = HttpClient::new(&config.http)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [
            ("x-api-key", self.config.api_key.expose_secret()),
            ("anthropic-version", self.config.version.as_str()),
        ]
    }

    fn full_url(&self, suffix: &str) -> String {
        format!("{}{}", self.config.base_url, suffix)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Single-shot completion. Rejects requests with `stream` set.
    pub async fn create_complete(
        &self,
        req: CompleteRequest,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<CompleteResponse> {
        if req.stream {
            return Err(TextGenError::StreamNotSupported);
        }
        validate(&req)?;

        let started = Self::now_ms();
        debug!(model = %req.model, "sending completion request");
        let result = self
            .http
            .post_json::<_, CompleteResponse>(
                &self.full_url("/complete"),
                &req,
                &self.headers(),
                ctx,
            )
            .await;

        let log = CompletionLog::new().model(&req.model).created_at_ms(started);
        match &result {
            Ok((resp, request_id, latency_ms)) => {
                crate::telemetry::emit_completion(
                    log.log_id_opt(Some(resp.log_id.as_str()).filter(|s| !s.is_empty()))
                        .request_id_opt(request_id.as_deref())
                        .latency_ms(*latency_ms as u64)
                        .stop_reason_opt(resp.stop_reason.as_deref())
                        .text_opt(Some(resp.completion.as_str())),
                );
            }
            Err(e) => {
                crate::telemetry::emit_completion(log.error(e.kind(), &e.to_string(), e.status()));
            }
        }
        result.map(|(resp, _, _)| resp)
    }

    /// Open a completion stream. `stream` is forced on; the stall limit comes
    /// from the client configuration and the context's cancellation token is
    /// carried into the returned stream.
    pub async fn create_complete_stream(
        &self,
        mut req: CompleteRequest,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<CompletionStream> {
        req.stream = true;
        validate(&req)?;

        debug!(model = %req.model, "opening completion stream");
        let body = self
            .http
            .post_stream(&self.full_url("/complete"), &req, &self.headers(), ctx)
            .await?;

        let mut stream = StreamReader::new(LineSource::new(body), self.config.empty_messages_limit)
            .with_model(req.model);
        if let Some(token) = ctx.cancel {
            stream = stream.with_cancel(token.clone());
        }
        Ok(stream)
    }
}

fn validate(req: &CompleteRequest) -> CoreResult<()> {
    if req.prompt.is_empty() {
        return Err(TextGenError::EmptyPrompt);
    }
    if req.max_tokens_to_sample == 0 {
        return Err(TextGenError::MissingMaxTokens);
    }
    Ok(())
}
