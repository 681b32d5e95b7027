//! OpenAI chat-completions client

use serde::Deserialize;
use serde_json::{Value, json};
use tubeline_core::{ApiError, ItemError, post_json};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Bearer-authenticated chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// POST `/chat/completions` with a fully built request body.
    pub fn chat(&self, request: &Value) -> Result<ChatCompletion, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = post_json(&url, &self.api_key, request)?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("chat completion: {e}")))
    }

    /// Send `request` and return the first choice's text, classified for the runner.
    pub fn complete(&self, request: &Value) -> Result<String, ItemError> {
        self.chat(request).map_err(classify)?.into_text()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
    /// Set instead of `content` when the model declines a structured request
    #[serde(default)]
    pub refusal: Option<String>,
}

impl ChatCompletion {
    /// Text of the first choice.
    ///
    /// A refusal means the model will not answer for this input: `Absent`.
    /// A missing or blank answer may not repeat: `Transient`.
    pub fn into_text(self) -> Result<String, ItemError> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(ItemError::Transient("completion has no choices".into()));
        };
        if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(ItemError::Absent(format!("model refused: {}", refusal.trim())));
        }
        match choice.message.content.map(|c| c.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(ItemError::Transient(format!(
                "empty completion (finish_reason: {})",
                choice.finish_reason.as_deref().unwrap_or("none")
            ))),
        }
    }
}

/// Map an OpenAI failure onto an item outcome.
///
/// Bad credentials, an exhausted account and an unknown model stop the run;
/// throttling, timeouts, server and network errors are retried; any other
/// 4xx rejects only this item.
pub fn classify(err: ApiError) -> ItemError {
    let message = err.to_string();
    match &err {
        ApiError::Http { status, reason, .. } => match (*status, reason.as_deref()) {
            (401 | 403, _) => {
                ItemError::Fatal(format!("OpenAI rejected the credentials: {message}"))
            }
            (429, Some("insufficient_quota")) => {
                ItemError::Fatal(format!("OpenAI quota exhausted: {message}"))
            }
            (404, Some("model_not_found")) => ItemError::Fatal(message),
            _ if err.is_retryable() => ItemError::Transient(message),
            _ => ItemError::Permanent(message),
        },
        ApiError::Network(_) | ApiError::Decode(_) => ItemError::Transient(message),
    }
}

/// Chat request with one system and one user message.
pub fn chat_request(model: &str, system: &str, user: Value) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, reason: Option<&str>) -> ApiError {
        ApiError::Http {
            status,
            reason: reason.map(String::from),
            message: "boom".into(),
        }
    }

    fn completion(body: &str) -> ChatCompletion {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn credential_and_quota_errors_are_fatal() {
        assert!(classify(http(401, Some("invalid_api_key"))).is_fatal());
        assert!(classify(http(403, None)).is_fatal());
        assert!(classify(http(429, Some("insufficient_quota"))).is_fatal());
        assert!(classify(http(404, Some("model_not_found"))).is_fatal());
    }

    #[test]
    fn throttling_and_outages_are_transient() {
        for err in [
            http(429, Some("rate_limit_exceeded")),
            http(408, None),
            http(500, None),
            http(503, Some("server_error")),
            ApiError::Network("reset".into()),
            ApiError::Decode("eof".into()),
        ] {
            assert!(classify(err).is_retryable());
        }
    }

    #[test]
    fn other_client_errors_are_permanent() {
        assert!(matches!(
            classify(http(400, Some("context_length_exceeded"))),
            ItemError::Permanent(_)
        ));
        assert!(matches!(classify(http(404, None)), ItemError::Permanent(_)));
    }

    #[test]
    fn first_choice_text_trimmed() {
        let c = completion(
            r#"{"choices":[{"message":{"role":"assistant","content":"  A summary.\n"},"finish_reason":"stop"}]}"#,
        );
        assert_eq!(c.into_text().unwrap(), "A summary.");
    }

    #[test]
    fn refusal_is_absent() {
        let c = completion(
            r#"{"choices":[{"message":{"content":null,"refusal":"I can't help with that."}}]}"#,
        );
        match c.into_text() {
            Err(ItemError::Absent(reason)) => assert!(reason.contains("can't help")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_answer_is_transient() {
        let c = completion(r#"{"choices":[{"message":{"content":""},"finish_reason":"length"}]}"#);
        let err = c.into_text().unwrap_err();
        assert!(err.is_retryable());
        assert!(err.reason().contains("length"));
        assert!(completion(r#"{"choices":[]}"#).into_text().unwrap_err().is_retryable());
    }

    #[test]
    fn request_shape() {
        let req = chat_request("gpt-4o-mini", "sys", json!("hello"));
        assert_eq!(req["model"], "gpt-4o-mini");
        assert_eq!(req["messages"][0]["role"], "system");
        assert_eq!(req["messages"][1]["content"], "hello");
    }
}
