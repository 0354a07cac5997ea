//! Model backend abstraction and error taxonomy.
//!
//! Backends receive one opaque prompt per request and return the generated
//! text. Anything other than a normal stop is an error; the session decides
//! whether to fall back to another backend or abort.

use anyhow::Result;
use thiserror::Error;

use crate::io::config::{BackendConfig, BackendKind};
use crate::io::gemini::GeminiBackend;
use crate::io::openai::OpenAiBackend;

/// Errors a single backend request can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{backend}: network error: {message}")]
    Network { backend: String, message: String },

    #[error("{backend}: rate limit or quota exceeded: {message}")]
    RateLimited { backend: String, message: String },

    #[error("{backend}: API key missing (set {env})")]
    MissingApiKey { backend: String, env: String },

    #[error("{backend}: reply blocked by safety filter ({reason})")]
    SafetyBlocked { backend: String, reason: String },

    #[error("{backend}: generation did not finish normally ({reason})")]
    Incomplete { backend: String, reason: String },

    #[error("{backend}: API error {status}: {message}")]
    Api {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend}: unexpected response: {message}")]
    Malformed { backend: String, message: String },

    #[error("no model backend left to try: {last}")]
    Exhausted { last: String },
}

impl BackendError {
    /// The backend cannot serve any more requests this run.
    pub fn disables_backend(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. } | BackendError::MissingApiKey { .. }
        )
    }

    /// The prompt itself is rejected; retrying elsewhere is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackendError::SafetyBlocked { .. } | BackendError::Exhausted { .. }
        )
    }
}

/// A hosted generative model.
pub trait ModelBackend {
    /// Short label for logs and errors.
    fn name(&self) -> &str;

    /// Generate a reply for `prompt`.
    fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Build a backend from config. API keys are read from the environment.
pub fn backend_from_config(cfg: &BackendConfig) -> Result<Box<dyn ModelBackend>> {
    let api_key = std::env::var(&cfg.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());
    let backend: Box<dyn ModelBackend> = match cfg.kind {
        BackendKind::Gemini => Box::new(GeminiBackend::new(cfg, api_key)?),
        BackendKind::Openai => Box::new(OpenAiBackend::new(cfg, api_key)?),
    };
    Ok(backend)
}

/// Map a non-success HTTP status to a backend error.
pub(crate) fn status_error(backend: &str, status: u16, body: String) -> BackendError {
    let backend = backend.to_string();
    match status {
        429 => BackendError::RateLimited {
            backend,
            message: body,
        },
        403 if body.contains("RESOURCE_EXHAUSTED") || body.contains("insufficient_quota") => {
            BackendError::RateLimited {
                backend,
                message: body,
            }
        }
        _ => BackendError::Api {
            backend,
            status,
            message: body,
        },
    }
}
