use std::io;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use http::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HttpCfg;
use crate::error::{CoreResult, ErrorResponse, TextGenError};
use crate::stream::ByteStream;

/// Per-call context: correlation id and an optional cancellation token that
/// covers both the request and, for streams, every later body read.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub cancel: Option<&'a CancellationToken>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| TextGenError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("textgen/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST JSON and decode a JSON body. Returns the body, the service's
    /// request id header (if any) and the latency in milliseconds.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let req = self
            .request(url, body, headers, ctx)
            .header(ACCEPT, "application/json; charset=utf-8")
            .timeout(self.request_timeout);

        let resp = send(req, ctx).await?;
        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let request_id = extract_request_id(resp.headers());

        let text = resp.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }
        let parsed = serde_json::from_str::<R>(&text).map_err(TextGenError::Decode)?;
        Ok((parsed, request_id, latency))
    }

    /// POST JSON and return the raw event-stream body of a successful response.
    /// Non-2xx responses are mapped to errors here, so a returned body is always
    /// from a 2xx response.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ByteStream> {
        let req = self
            .request(url, body, headers, ctx)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive");

        let resp = send(req, ctx).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text));
        }
        debug!(
            request_id = extract_request_id(resp.headers()).as_deref(),
            "event stream opened"
        );

        let bytes = resp.bytes_stream().map(|r| r.map_err(io::Error::other));
        Ok(Box::pin(bytes))
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }
}

async fn send(req: RequestBuilder, ctx: &RequestCtx<'_>) -> CoreResult<Response> {
    let fut = req.send();
    let res = match ctx.cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(TextGenError::Transport(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "request cancelled",
                )));
            }
            res = fut => res,
        },
        None => fut.await,
    };
    res.map_err(transport)
}

fn transport(e: reqwest::Error) -> TextGenError {
    TextGenError::Transport(io::Error::other(e))
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 2] = ["request-id", "x-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

/// Map a non-2xx response: a structured `{"error": {...}}` body becomes
/// `Api` carrying the status, anything else becomes `Request`.
pub(crate) fn map_http_error(status: StatusCode, body: &str) -> TextGenError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error: Some(mut e) }) => {
            e.http_status_code = Some(status.as_u16());
            warn!(status = status.as_u16(), kind = e.kind.as_deref(), "api error response");
            TextGenError::Api(e)
        }
        _ => {
            warn!(status = status.as_u16(), "unstructured error response");
            TextGenError::Request {
                status: status.as_u16(),
                message: truncate(body, 300),
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}
