//! Backend selection for one run.
//!
//! The session owns every configured backend in priority order and routes each
//! prompt to the active one. On a transient error it falls back to the next
//! usable backend; each backend can be fallen back into at most once per run.
//! Rate-limit and missing-key errors disable a backend for the rest of the run.
//! Safety blocks are returned immediately.

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::io::backend::{BackendError, ModelBackend, backend_from_config};
use crate::io::config::BackendConfig;

struct Slot {
    backend: Box<dyn ModelBackend>,
    disabled: bool,
    fallback_used: bool,
}

pub struct BackendSession {
    slots: Vec<Slot>,
    active: usize,
}

impl BackendSession {
    pub fn new(backends: Vec<Box<dyn ModelBackend>>) -> Result<Self> {
        if backends.is_empty() {
            bail!("at least one model backend is required");
        }
        let slots = backends
            .into_iter()
            .map(|backend| Slot {
                backend,
                disabled: false,
                fallback_used: false,
            })
            .collect();
        Ok(Self { slots, active: 0 })
    }

    /// Build a session from config entries, primary first.
    pub fn from_config(configs: &[BackendConfig]) -> Result<Self> {
        let backends = configs
            .iter()
            .map(backend_from_config)
            .collect::<Result<Vec<_>>>()?;
        Self::new(backends)
    }

    /// Name of the backend the next prompt goes to.
    pub fn active_name(&self) -> &str {
        self.slots[self.active].backend.name()
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.disabled && slot.backend.name() == name)
    }

    /// Send `prompt` to the active backend, falling back on transient errors.
    pub fn generate(&mut self, prompt: &str) -> Result<String, BackendError> {
        if self.slots[self.active].disabled {
            self.fall_back(None)?;
        }

        loop {
            let slot = &mut self.slots[self.active];
            let err = match slot.backend.generate(prompt) {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            if err.is_fatal() {
                return Err(err);
            }
            if err.disables_backend() {
                warn!(backend = slot.backend.name(), error = %err, "disabling backend for this run");
                slot.disabled = true;
            } else {
                warn!(backend = slot.backend.name(), error = %err, "backend request failed");
            }
            self.fall_back(Some(err))?;
        }
    }

    fn fall_back(&mut self, cause: Option<BackendError>) -> Result<(), BackendError> {
        let count = self.slots.len();
        let next = (1..count)
            .map(|offset| (self.active + offset) % count)
            .find(|&idx| !self.slots[idx].disabled && !self.slots[idx].fallback_used);
        let Some(next) = next else {
            let last = cause
                .map(|err| err.to_string())
                .unwrap_or_else(|| "every backend is disabled".to_string());
            return Err(BackendError::Exhausted { last });
        };
        info!(
            from = self.slots[self.active].backend.name(),
            to = self.slots[next].backend.name(),
            "falling back to next backend"
        );
        self.slots[next].fallback_used = true;
        self.active = next;
        Ok(())
    }
}
