//! Canonical paths within `.cmdloop/` and scaffolding for `cmdloop init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{AgentConfig, write_config};

/// All canonical paths within `.cmdloop/` for a project root.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub history_path: PathBuf,
    pub bad_reply_path: PathBuf,
}

impl AgentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".cmdloop");
        Self {
            root: root.clone(),
            iterations_dir: state_dir.join("iterations"),
            gitignore_path: state_dir.join(".gitignore"),
            config_path: state_dir.join("config.toml"),
            history_path: state_dir.join("history.json"),
            bad_reply_path: state_dir.join("bad_reply.txt"),
            state_dir,
        }
    }
}

/// Options for `init_agent`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config with defaults.
    pub force: bool,
}

/// Create `.cmdloop/` with a default config in `root`.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_agent(root: &Path, options: &InitOptions) -> Result<AgentPaths> {
    let paths = AgentPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!("init: .cmdloop exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.iterations_dir)
        .with_context(|| format!("create directory {}", paths.iterations_dir.display()))?;
    fs::write(&paths.gitignore_path, STATE_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &AgentConfig::default())?;

    Ok(paths)
}

const STATE_GITIGNORE: &str = "iterations/\nbad_reply.txt\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_agent(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.state_dir.is_dir());
        assert!(paths.iterations_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read gitignore"),
            STATE_GITIGNORE
        );
        let cfg = load_config(&paths.config_path).expect("load config");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_agent(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_agent(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_agent(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "max_iterations = 2\n").expect("customize");

        init_agent(temp.path(), &InitOptions { force: true }).expect("re-init");

        let cfg = load_config(&paths.config_path).expect("load config");
        assert_eq!(cfg.max_iterations, AgentConfig::default().max_iterations);
    }
}
