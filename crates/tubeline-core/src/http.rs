//! Blocking HTTP helpers over a shared async client.
//!
//! Uses async reqwest on a shared tokio runtime but presents a sync
//! interface, since the batch runner is strictly sequential.

use std::sync::LazyLock;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout; LLM completions can take a while
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Failure of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Server answered with a non-success status
    Http {
        status: u16,
        /// Machine-readable reason from the error body (`quotaExceeded`, `insufficient_quota`)
        reason: Option<String>,
        message: String,
    },
    /// Connection, TLS or timeout failure; no status received
    Network(String),
    /// Response arrived but could not be decoded
    Decode(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status,
                reason: Some(reason),
                message,
            } => write!(f, "HTTP {status} {reason}: {message}"),
            Self::Http {
                status,
                reason: None,
                message,
            } => write!(f, "HTTP {status}: {message}"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Decode(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Convert a reqwest error, stripping the URL (it may carry an API key)
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let is_decode = e.is_decode();
        let message = e.without_url().to_string();
        match status {
            Some(status) => Self::Http {
                status,
                reason: None,
                message,
            },
            None if is_decode => Self::Decode(message),
            None => Self::Network(message),
        }
    }

    /// Build from a non-success response body.
    ///
    /// Understands the Google (`error.errors[].reason`) and OpenAI
    /// (`error.code` / `error.type`) error envelopes; anything else keeps
    /// a truncated copy of the body as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let reason = error.and_then(|e| {
            e.pointer("/errors/0/reason")
                .and_then(|r| r.as_str())
                .or_else(|| e.get("code").and_then(|c| c.as_str()))
                .or_else(|| e.get("type").and_then(|t| t.as_str()))
                .map(String::from)
        });
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| truncate(body.trim(), 200).to_string());

        Self::Http {
            status,
            reason,
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Http { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// Worth retrying without any change: throttling, server errors, network
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Network(_) => true,
            Self::Decode(_) => false,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(4)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("HTTP client builder failed ({e}), using defaults");
            reqwest::Client::new()
        })
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

async fn read_body(resp: reqwest::Response) -> Result<String, ApiError> {
    let status = resp.status();
    let body = resp.text().await.map_err(ApiError::from_reqwest)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ApiError::from_response(status.as_u16(), &body))
    }
}

/// GET `url` with query parameters and extra headers; returns the body text.
pub fn get_text(
    url: &str,
    query: &[(&str, &str)],
    headers: &[(&str, &str)],
) -> Result<String, ApiError> {
    SHARED_RUNTIME.handle().block_on(async {
        let mut req = http_client().get(url).query(query);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let resp = req.send().await.map_err(ApiError::from_reqwest)?;
        read_body(resp).await
    })
}

/// POST a JSON body with bearer auth; returns the response body text.
pub fn post_json(url: &str, bearer: &str, body: &serde_json::Value) -> Result<String, ApiError> {
    let payload = serde_json::to_vec(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    SHARED_RUNTIME.handle().block_on(async {
        let resp = http_client()
            .post(url)
            .bearer_auth(bearer)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        read_body(resp).await
    })
}
