//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::diagnostics::DiagnosticLevel;
use crate::{AppError, Result};

/// Model identifier meaning "let the CLI pick"; never forwarded as a flag.
pub const DEFAULT_MODEL_SENTINEL: &str = "default";

/// Directory name used under the system temp dir when no root is configured.
const DEFAULT_ARTIFACT_DIR: &str = "agent-relay";

/// Credential injection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SecretsConfig {
    /// Master switch for injecting the stored API key into matching servers.
    pub inject_enabled: bool,
    /// OS keychain service name.
    pub service: String,
    /// OS keychain account holding the API key.
    pub account: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            inject_enabled: false,
            service: "agent-relay".into(),
            account: "gemini-api-key".into(),
        }
    }
}

/// Subprocess tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ProcessConfig {
    /// Seconds between the graceful stop signal and the forced kill.
    pub stop_grace_seconds: u64,
    /// Capacity of the per-turn event channel.
    pub event_buffer: usize,
    /// Milliseconds to wait for the output readers once the process has
    /// exited. Output held open past this by a leftover process in the
    /// group is cut off so the turn can close.
    pub stream_drain_millis: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: 5,
            event_buffer: 256,
            stream_drain_millis: 2_000,
        }
    }
}

/// Cleanup behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct JanitorConfig {
    /// Sweep workspace scratch files when the binary starts.
    pub scratch_cleanup_on_start: bool,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            scratch_cleanup_on_start: true,
        }
    }
}

fn default_valid_models() -> Vec<String> {
    ["opus", "sonnet", "haiku", DEFAULT_MODEL_SENTINEL]
        .iter()
        .map(|m| (*m).to_owned())
        .collect()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// CLI binary name looked up on `PATH`.
    pub cli_command: String,
    /// Explicit CLI executable; skips the `PATH` lookup.
    pub cli_path: Option<PathBuf>,
    /// Root under which per-turn config artifacts are created.
    pub artifact_root: Option<PathBuf>,
    /// Models that may be forwarded with `--model`.
    pub valid_models: Vec<String>,
    /// Credential injection.
    pub secrets: SecretsConfig,
    /// Subprocess tuning.
    pub process: ProcessConfig,
    /// Cleanup behaviour.
    pub janitor: JanitorConfig,
    /// Directory for JSONL diagnostics; disabled when absent.
    pub diagnostics_dir: Option<PathBuf>,
    /// Least severe level persisted to the JSONL files.
    pub diagnostics_min_level: DiagnosticLevel,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            cli_command: "claude".into(),
            cli_path: None,
            artifact_root: None,
            valid_models: default_valid_models(),
            secrets: SecretsConfig::default(),
            process: ProcessConfig::default(),
            janitor: JanitorConfig::default(),
            diagnostics_dir: None,
            diagnostics_min_level: DiagnosticLevel::Info,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Root directory for config artifacts.
    #[must_use]
    pub fn artifact_root(&self) -> PathBuf {
        self.artifact_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_ARTIFACT_DIR))
    }

    /// Grace period between graceful stop and forced kill.
    #[must_use]
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.process.stop_grace_seconds)
    }

    /// How long output may keep draining after the process exits.
    #[must_use]
    pub fn stream_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.process.stream_drain_millis)
    }

    /// Whether `model` may be forwarded to the CLI.
    ///
    /// The default sentinel is never forwarded even if listed.
    #[must_use]
    pub fn accepts_model(&self, model: &str) -> bool {
        model != DEFAULT_MODEL_SENTINEL && self.valid_models.iter().any(|m| m == model)
    }

    fn validate(&self) -> Result<()> {
        if self.cli_command.trim().is_empty() && self.cli_path.is_none() {
            return Err(AppError::Config(
                "cli_command must not be empty when cli_path is unset".into(),
            ));
        }

        if self.valid_models.is_empty() {
            return Err(AppError::Config("valid_models must not be empty".into()));
        }

        if self.process.event_buffer == 0 {
            return Err(AppError::Config(
                "process.event_buffer must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
