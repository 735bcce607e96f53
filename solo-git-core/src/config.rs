//! Runtime configuration for the Solo Git engines.
//!
//! Resolution order: **env var > `<state_dir>/config` file > hardcoded default**,
//! matching the teacher's `WorkerConfig::load` precedence.
//!
//! ```text
//! Field                  Env Var                        Config Key              Default
//! ────────────────────── ────────────────────────────── ──────────────────────── ───────────────────
//! execution_mode         SOLOGIT_EXECUTION_MODE         tests.execution_mode     auto
//! sandbox_image           SOLOGIT_SANDBOX_IMAGE         tests.sandbox_image      python:3.11-slim
//! timeout_seconds         SOLOGIT_TIMEOUT_SECONDS       tests.timeout_seconds    120
//! parallel_max            SOLOGIT_PARALLEL_MAX          tests.parallel_max       0 (unbounded)
//! log_dir                 SOLOGIT_LOG_DIR               tests.log_dir            <state_dir>/test_logs
//! ci_auto_run             SOLOGIT_CI_AUTO_RUN           ci.auto_run              false
//! ci_command              SOLOGIT_CI_COMMAND            ci.command               unset
//! ci_webhook              SOLOGIT_CI_WEBHOOK            ci.webhook               unset
//! ci_webhook_timeout      SOLOGIT_CI_WEBHOOK_TIMEOUT    ci.webhook_timeout       10
//! promote_on_green        SOLOGIT_PROMOTE_ON_GREEN      promote_on_green         true
//! rollback_on_ci_red      SOLOGIT_ROLLBACK_ON_CI_RED    rollback_on_ci_red       true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::Result;

/// Test execution mode selection (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModePreference {
    Auto,
    Docker,
    Subprocess,
}

impl ExecutionModePreference {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "docker" => Some(Self::Docker),
            "subprocess" => Some(Self::Subprocess),
            _ => None,
        }
    }
}

pub const DEFAULT_SANDBOX_IMAGE: &str = "python:3.11-slim";

/// Resolved configuration for one Solo Git session (§6 "Configuration").
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub execution_mode: ExecutionModePreference,
    pub sandbox_image: String,
    pub timeout_seconds: u64,
    pub parallel_max: usize,
    pub log_dir: PathBuf,
    pub ci_auto_run: bool,
    pub ci_command: Option<String>,
    pub ci_webhook: Option<String>,
    pub ci_webhook_timeout: Duration,
    pub promote_on_green: bool,
    pub rollback_on_ci_red: bool,
}

impl Config {
    pub fn load(state_dir: &Path) -> Result<Self> {
        Self::load_with_env(state_dir, |k| env::var(k).ok())
    }

    fn load_with_env(state_dir: &Path, get_env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::defaults(state_dir);

        let config_file = state_dir.join("config");
        if config_file.exists() {
            parse_config_file(&config_file, |key, value| {
                cfg.apply_file_entry(key, value);
            })?;
        }

        cfg.apply_env_overrides(&get_env);
        Ok(cfg)
    }

    fn defaults(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            execution_mode: ExecutionModePreference::Auto,
            sandbox_image: DEFAULT_SANDBOX_IMAGE.to_string(),
            timeout_seconds: 120,
            parallel_max: 0,
            log_dir: state_dir.join("test_logs"),
            ci_auto_run: false,
            ci_command: None,
            ci_webhook: None,
            ci_webhook_timeout: Duration::from_secs(10),
            promote_on_green: true,
            rollback_on_ci_red: true,
        }
    }

    fn apply_file_entry(&mut self, key: &str, value: &str) {
        match key {
            "tests.execution_mode" => {
                if let Some(mode) = ExecutionModePreference::parse(value) {
                    self.execution_mode = mode;
                }
            }
            "tests.sandbox_image" => self.sandbox_image = value.to_string(),
            "tests.timeout_seconds" => {
                if let Ok(n) = value.parse() {
                    self.timeout_seconds = n;
                }
            }
            "tests.parallel_max" => {
                if let Ok(n) = value.parse() {
                    self.parallel_max = n;
                }
            }
            "tests.log_dir" => self.log_dir = PathBuf::from(value),
            "ci.auto_run" => self.ci_auto_run = value == "true",
            "ci.command" => self.ci_command = Some(value.to_string()),
            "ci.webhook" => self.ci_webhook = Some(value.to_string()),
            "ci.webhook_timeout" => {
                if let Ok(n) = value.parse() {
                    self.ci_webhook_timeout = Duration::from_secs(n);
                }
            }
            "promote_on_green" => self.promote_on_green = value == "true",
            "rollback_on_ci_red" => self.rollback_on_ci_red = value == "true",
            _ => {}
        }
    }

    fn apply_env_overrides(&mut self, get_env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = get_env("SOLOGIT_EXECUTION_MODE") {
            if let Some(mode) = ExecutionModePreference::parse(&v) {
                self.execution_mode = mode;
            }
        }
        if let Some(v) = get_env("SOLOGIT_SANDBOX_IMAGE") {
            self.sandbox_image = v;
        }
        if let Some(v) = get_env("SOLOGIT_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse() {
                self.timeout_seconds = n;
            }
        }
        if let Some(v) = get_env("SOLOGIT_PARALLEL_MAX") {
            if let Ok(n) = v.parse() {
                self.parallel_max = n;
            }
        }
        if let Some(v) = get_env("SOLOGIT_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = get_env("SOLOGIT_CI_AUTO_RUN") {
            self.ci_auto_run = v == "true";
        }
        if let Some(v) = get_env("SOLOGIT_CI_COMMAND") {
            self.ci_command = Some(v);
        }
        if let Some(v) = get_env("SOLOGIT_CI_WEBHOOK") {
            self.ci_webhook = Some(v);
        }
        if let Some(v) = get_env("SOLOGIT_CI_WEBHOOK_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.ci_webhook_timeout = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("SOLOGIT_PROMOTE_ON_GREEN") {
            self.promote_on_green = v == "true";
        }
        if let Some(v) = get_env("SOLOGIT_ROLLBACK_ON_CI_RED") {
            self.rollback_on_ci_red = v == "true";
        }
    }
}

/// Parse a `key=value` config file, calling `f` for each entry.
///
/// Lines starting with `#` and empty lines are skipped.
fn parse_config_file(path: &Path, mut f: impl FnMut(&str, &str)) -> Result<()> {
    let content = fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            f(k.trim(), v.trim());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn config_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(cfg.execution_mode, ExecutionModePreference::Auto);
        assert_eq!(cfg.sandbox_image, DEFAULT_SANDBOX_IMAGE);
        assert_eq!(cfg.timeout_seconds, 120);
        assert_eq!(cfg.parallel_max, 0);
        assert!(!cfg.ci_auto_run);
        assert!(cfg.promote_on_green);
        assert!(cfg.rollback_on_ci_red);
    }

    #[test]
    fn config_file_override() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config"),
            "tests.execution_mode=docker\ntests.sandbox_image=custom:latest\ntests.timeout_seconds=60\nci.auto_run=true\nci.command=./smoke.sh\n",
        )
        .unwrap();

        let cfg = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(cfg.execution_mode, ExecutionModePreference::Docker);
        assert_eq!(cfg.sandbox_image, "custom:latest");
        assert_eq!(cfg.timeout_seconds, 60);
        assert!(cfg.ci_auto_run);
        assert_eq!(cfg.ci_command.as_deref(), Some("./smoke.sh"));
    }

    #[test]
    fn env_overrides_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config"), "tests.execution_mode=docker\n").unwrap();

        let cfg = Config::load_with_env(dir.path(), |k| {
            if k == "SOLOGIT_EXECUTION_MODE" {
                Some("subprocess".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(cfg.execution_mode, ExecutionModePreference::Subprocess);
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config"),
            "# comment\n\n  # indented\ntests.timeout_seconds=30\n",
        )
        .unwrap();
        let cfg = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(cfg.timeout_seconds, 30);
        assert_eq!(cfg.sandbox_image, DEFAULT_SANDBOX_IMAGE);
    }

    #[test]
    fn unknown_keys_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config"), "unknown=1\ntests.timeout_seconds=45\n").unwrap();
        let cfg = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(cfg.timeout_seconds, 45);
    }

    #[test]
    fn invalid_numeric_values_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config"), "tests.timeout_seconds=not-a-number\n").unwrap();
        let cfg = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(cfg.timeout_seconds, 120);
    }
}
