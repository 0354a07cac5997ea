//! Agent configuration stored under `.cmdloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::atomic::write_atomic;

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the defaults
/// below. API keys are never stored here; `api_key_env` names the variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on request → execute iterations per run.
    pub max_iterations: u32,

    /// Reply prefix that signals the task is complete.
    pub completion_marker: String,

    /// Programs the loop may run without operator approval.
    pub allowed_commands: Vec<String>,

    /// Wall-clock limit for one command block in seconds. `0` waits forever.
    pub shell_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Send a desktop notification when the run ends.
    pub notify: bool,

    pub context: ContextConfig,

    /// Model backends in fallback order; the first is the primary.
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Command that regenerates the context file (e.g. `["python3","AskGpt.py"]`).
    pub command: Vec<String>,
    /// File the command writes, relative to the project root.
    pub file: PathBuf,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "AskGpt.py".to_string()],
            file: PathBuf::from("message_1.txt"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gemini,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            completion_marker: "DONE".to_string(),
            allowed_commands: [
                "sed", "rm", "mv", "cp", "touch", "mkdir", "npm", "npx", "yarn", "pnpm", "git",
                "echo", "cat", "./",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            shell_timeout_secs: 0,
            output_limit_bytes: 100_000,
            notify: true,
            context: ContextConfig::default(),
            backends: vec![
                BackendConfig {
                    kind: BackendKind::Gemini,
                    model: "gemini-2.5-pro".to_string(),
                    api_key_env: "GEMINI_API_KEY".to_string(),
                    base_url: None,
                    timeout_secs: default_request_timeout_secs(),
                },
                BackendConfig {
                    kind: BackendKind::Openai,
                    model: "gpt-4o".to_string(),
                    api_key_env: "OPENAI_API_KEY".to_string(),
                    base_url: None,
                    timeout_secs: default_request_timeout_secs(),
                },
            ],
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.completion_marker.trim().is_empty() {
            return Err(anyhow!("completion_marker must not be empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.context.command.is_empty() || self.context.command[0].trim().is_empty() {
            return Err(anyhow!("context.command must be a non-empty array"));
        }
        if self.context.file.as_os_str().is_empty() {
            return Err(anyhow!("context.file must not be empty"));
        }
        if self.backends.is_empty() {
            return Err(anyhow!("at least one backend must be configured"));
        }
        for (idx, backend) in self.backends.iter().enumerate() {
            if backend.model.trim().is_empty() {
                return Err(anyhow!("backends[{idx}].model must not be empty"));
            }
            if backend.api_key_env.trim().is_empty() {
                return Err(anyhow!("backends[{idx}].api_key_env must not be empty"));
            }
            if backend.timeout_secs == 0 {
                return Err(anyhow!("backends[{idx}].timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    /// Shell timeout, or `None` to wait until the commands finish.
    pub fn shell_timeout(&self) -> Option<Duration> {
        (self.shell_timeout_secs > 0).then(|| Duration::from_secs(self.shell_timeout_secs))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = AgentConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_iterations = 4\n\n[[backends]]\nkind = \"openai\"\nmodel = \"local\"\napi_key_env = \"LOCAL_KEY\"\nbase_url = \"http://localhost:8080/v1\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 4);
        assert_eq!(cfg.completion_marker, "DONE");
        assert_eq!(cfg.backends.len(), 1);
        assert_eq!(cfg.backends[0].kind, BackendKind::Openai);
        assert_eq!(cfg.backends[0].timeout_secs, 600);
        assert!(cfg.shell_timeout().is_none());
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let cfg = AgentConfig {
            max_iterations: 0,
            ..AgentConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn empty_backend_list_is_rejected() {
        let cfg = AgentConfig {
            backends: Vec::new(),
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
