//! Google Gemini backend over the `generateContent` REST endpoint.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::io::backend::{BackendError, ModelBackend, status_error};
use crate::io::config::BackendConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const NORMAL_STOP: &str = "STOP";
const SAFETY_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

pub struct GeminiBackend {
    client: Client,
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiBackend {
    pub fn new(cfg: &BackendConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("build gemini http client")?;
        Ok(Self {
            client,
            name: format!("gemini/{}", cfg.model),
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

impl ModelBackend for GeminiBackend {
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

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 1.0,
                top_p: 1.0,
                max_output_tokens: 32_768,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
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

        let body: GenerateResponse = response.json().map_err(|e| BackendError::Malformed {
            backend: self.name.clone(),
            message: e.to_string(),
        })?;
        let text = reply_text(&self.name, body)?;
        debug!(reply_chars = text.chars().count(), "gemini reply received");
        Ok(text)
    }
}

/// Extract the reply text, classifying blocked or truncated generations.
fn reply_text(backend: &str, body: GenerateResponse) -> Result<String, BackendError> {
    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(BackendError::SafetyBlocked {
            backend: backend.to_string(),
            reason,
        });
    }

    let Some(candidate) = body.candidates.into_iter().next() else {
        return Err(BackendError::Malformed {
            backend: backend.to_string(),
            message: "no candidates in response".to_string(),
        });
    };

    let reason = candidate
        .finish_reason
        .unwrap_or_else(|| "UNSPECIFIED".to_string());
    if SAFETY_REASONS.contains(&reason.as_str()) {
        return Err(BackendError::SafetyBlocked {
            backend: backend.to_string(),
            reason,
        });
    }
    if reason != NORMAL_STOP {
        return Err(BackendError::Incomplete {
            backend: backend.to_string(),
            reason,
        });
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(BackendError::Malformed {
            backend: backend.to_string(),
            message: "empty reply text".to_string(),
        });
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
