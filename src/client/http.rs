//! HTTP Backend
//!
//! OpenAI-compatible chat completions backend with retry and backoff for
//! transient transport errors.

use crate::api::{BackendFailure, GenerationRequest, GenerationResponse};
use crate::client::BackendClient;
use crate::config::HttpClientConfig;
use crate::error::{RouterError, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_BACKOFF_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

/// Outcome of a single HTTP round trip
enum CallError {
    /// Worth retrying against the same backend, optionally after a server hint
    Transient(BackendFailure, Option<Duration>),

    Permanent(BackendFailure),
}

/// Backend speaking the OpenAI chat completions protocol
pub struct HttpBackend {
    id: String,
    config: HttpClientConfig,
    client: Client,
    headers: HeaderMap,
    endpoint: String,
    models_url: String,
}

impl HttpBackend {
    /// Create a new HTTP backend
    pub fn new(id: impl Into<String>, config: HttpClientConfig) -> Result<Self> {
        let id = id.into();

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RouterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.get_api_key() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                    RouterError::Config(format!("Invalid API key format for '{}': {}", id, e))
                })?,
            );
        }
        for (key, value) in &config.headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| RouterError::Config(format!("Invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RouterError::Config(format!("Invalid header value for '{}': {}", key, e)))?;
            headers.insert(name, value);
        }

        let base_url = config.get_base_url();
        let base_url = base_url.trim_end_matches('/');

        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url),
            models_url: format!("{}/models", base_url),
            id,
            config,
            client,
            headers,
        })
    }

    /// Get the backend id
    pub fn id(&self) -> &str {
        &self.id
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.retry_initial_interval_ms))
            .with_multiplier(2.0)
            .with_max_interval(MAX_BACKOFF_INTERVAL)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .build()
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.params.max_tokens,
            "temperature": request.params.temperature,
        })
    }

    async fn send_once(&self, body: &serde_json::Value) -> std::result::Result<ChatResponse, CallError> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| CallError::Transient(BackendFailure::Transport(e.to_string()), None))?;
            return serde_json::from_str(&text).map_err(|e| {
                CallError::Permanent(BackendFailure::Transport(format!(
                    "Failed to parse response: {}. Body: {}",
                    e,
                    snippet(&text)
                )))
            });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(MAX_BACKOFF_INTERVAL));
        let body = response.text().await.unwrap_or_default();
        let detail = format!("status {}: {}", status, snippet(&body));

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => {
                CallError::Transient(BackendFailure::Transport(detail), retry_after)
            }
            s if s.is_server_error() => CallError::Transient(BackendFailure::Transport(detail), retry_after),
            StatusCode::BAD_REQUEST
            | StatusCode::NOT_FOUND
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNPROCESSABLE_ENTITY => CallError::Permanent(BackendFailure::Rejected(detail)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CallError::Permanent(
                BackendFailure::Transport(format!("authentication failed, {}", detail)),
            ),
            _ => CallError::Permanent(BackendFailure::Transport(detail)),
        })
    }

    fn to_response(&self, chat: ChatResponse, latency: Duration) -> GenerationResponse {
        let (content, finish_reason) = chat
            .choices
            .into_iter()
            .next()
            .map(|c| (c.message.content.unwrap_or_default(), c.finish_reason))
            .unwrap_or_default();

        let units = chat
            .usage
            .map(|u| u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens))
            .unwrap_or(0);

        let confidence = if content.trim().is_empty() {
            0.0
        } else if finish_reason.as_deref() == Some("length") {
            self.config.base_confidence / 2.0
        } else {
            self.config.base_confidence
        };

        GenerationResponse::success(
            &self.id,
            content,
            units,
            latency,
            units as f64 * self.config.cost_per_unit,
            confidence,
        )
    }
}

/// Leading part of a response body for error details, cut on a char boundary
fn snippet(body: &str) -> &str {
    match body.char_indices().nth(ERROR_SNIPPET_CHARS) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

fn classify_transport_error(err: reqwest::Error) -> CallError {
    let failure = BackendFailure::Transport(err.to_string());
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CallError::Transient(failure, None)
    } else {
        CallError::Permanent(failure)
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn execute(&self, request: &GenerationRequest) -> GenerationResponse {
        let started = Instant::now();
        let body = self.build_body(request);
        let mut backoff = self.backoff_policy();
        let mut retries = 0;

        loop {
            match self.send_once(&body).await {
                Ok(chat) => return self.to_response(chat, started.elapsed()),
                Err(CallError::Permanent(failure)) => {
                    debug!(backend = %self.id, error = %failure, "request failed permanently");
                    return GenerationResponse::failure(&self.id, failure, started.elapsed());
                }
                Err(CallError::Transient(failure, retry_after)) => {
                    retries += 1;
                    let wait = match retry_after.or_else(|| backoff.next_backoff()) {
                        Some(wait) if retries <= self.config.max_retries => wait,
                        _ => return GenerationResponse::failure(&self.id, failure, started.elapsed()),
                    };
                    warn!(
                        backend = %self.id,
                        attempt = retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %failure,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.models_url)
            .headers(self.headers.clone())
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn cost_per_unit(&self) -> f64 {
        self.config.cost_per_unit
    }
}
