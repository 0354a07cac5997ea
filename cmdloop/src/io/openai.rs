//! OpenAI-compatible chat completions backend.
//!
//! Works with OpenAI and with local servers that speak the same API
//! (vLLM, Ollama, llama.cpp) via `base_url`.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::io::backend::{BackendError, ModelBackend, status_error};
use crate::io::config::BackendConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    client: Client,
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl OpenAiBackend {
    pub fn new(cfg: &BackendConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("build openai http client")?;
        Ok(Self {
            client,
            name: format!("openai/{}", cfg.model),
            model: cfg.model.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            api_key_env: cfg.api_key_env.clone(),
        })
    }
}

impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(backend = %self.name, prompt_chars = prompt.chars().count()))]
    fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BackendError::MissingApiKey {
                backend: self.name.clone(),
                env: self.api_key_env.clone(),
            });
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .map_err(|e| BackendError::Network {
                backend: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(&self.name, status.as_u16(), body));
        }

        let body: ChatResponse = response.json().map_err(|e| BackendError::Malformed {
            backend: self.name.clone(),
            message: e.to_string(),
        })?;
        let text = reply_text(&self.name, body)?;
        debug!(reply_chars = text.chars().count(), "openai reply received");
        Ok(text)
    }
}

fn reply_text(backend: &str, body: ChatResponse) -> Result<String, BackendError> {
    let Some(choice) = body.choices.into_iter().next() else {
        return Err(BackendError::Malformed {
            backend: backend.to_string(),
            message: "no choices in response".to_string(),
        });
    };

    match choice.finish_reason.as_deref() {
        Some("stop") | None => {}
        Some("content_filter") => {
            return Err(BackendError::SafetyBlocked {
                backend: backend.to_string(),
                reason: "content_filter".to_string(),
            });
        }
        Some(other) => {
            return Err(BackendError::Incomplete {
                backend: backend.to_string(),
                reason: other.to_string(),
            });
        }
    }

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(BackendError::SafetyBlocked {
            backend: backend.to_string(),
            reason: refusal,
        });
    }

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(BackendError::Malformed {
            backend: backend.to_string(),
            message: "empty reply text".to_string(),
        }),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<String, BackendError> {
        let body: ChatResponse = serde_json::from_str(json).expect("parse fixture");
        reply_text("openai", body)
    }

    #[test]
    fn returns_content_on_stop() {
        let text = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":"DONE"},"finish_reason":"stop"}]}"#,
        )
        .expect("text");
        assert_eq!(text, "DONE");
    }

    #[test]
    fn length_finish_is_incomplete() {
        let err = parse(
            r#"{"choices":[{"message":{"content":"half"},"finish_reason":"length"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::Incomplete { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn content_filter_and_refusal_are_safety_errors() {
        let filtered = parse(
            r#"{"choices":[{"message":{"content":null},"finish_reason":"content_filter"}]}"#,
        )
        .unwrap_err();
        assert!(filtered.is_fatal());

        let refused = parse(
            r#"{"choices":[{"message":{"content":null,"refusal":"I can't help"},"finish_reason":"stop"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(refused, BackendError::SafetyBlocked { .. }));
    }

    #[test]
    fn empty_choices_is_malformed() {
        let err = parse(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, BackendError::Malformed { .. }));
    }
}
