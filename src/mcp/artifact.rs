//! Materialization of the merged server set into the JSON config artifact
//! handed to the CLI with `--mcp-config`.
//!
//! The artifact lives in a fresh `mcp-config-*` directory under the
//! artifact root, one per turn:
//!
//! ```json
//! { "servers": { "<name>": { "command": "...", "args": [], "env": {} } } }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::diagnostics::{Component, Diagnostic, DiagnosticSink};
use crate::mcp::expand::expand;
use crate::mcp::janitor::{ArtifactJanitor, ARTIFACT_DIR_PREFIX};
use crate::mcp::secrets::SecretInjector;
use crate::models::server::{EnvSpec, MergedServerSet, ServerEntry, ServerTransport, TransportKind};
use crate::platform::process_env;
use crate::{AppError, Result};

/// File name of the artifact inside its per-turn directory.
pub const ARTIFACT_FILE_NAME: &str = "mcp-servers.json";

/// Commands that need `cmd /c` on Windows when spawned without a shell.
const WINDOWS_SHELL_COMMANDS: &[&str] = &["npx", "npm", "node"];

/// Target platform for command and path normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Windows: shell-resolved launchers are wrapped, paths use `\`.
    Windows,
    /// Any Unix-like system.
    Unix,
}

impl Platform {
    /// Platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// One server in the artifact's wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireServer {
    /// Present for `http` and `sse` servers only.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    /// Expanded executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Expanded arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Expanded environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Endpoint for remote servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Headers for remote servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// The artifact document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigArtifact {
    /// Servers keyed by name.
    pub servers: BTreeMap<String, WireServer>,
}

/// A written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    /// Document as written.
    pub artifact: ConfigArtifact,
    /// Path of the JSON file.
    pub path: PathBuf,
}

/// Turns a [`MergedServerSet`] into an on-disk artifact.
pub struct ArtifactBuilder {
    root: PathBuf,
    platform: Platform,
    env: HashMap<String, String>,
    injector: SecretInjector,
    janitor: Arc<ArtifactJanitor>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ArtifactBuilder {
    /// Builder writing under `root`, expanding against the current process
    /// environment on the current platform.
    #[must_use]
    pub fn new(
        root: PathBuf,
        injector: SecretInjector,
        janitor: Arc<ArtifactJanitor>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            root,
            platform: Platform::current(),
            env: process_env(),
            injector,
            janitor,
            diagnostics,
        }
    }

    /// Override the target platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Override the expansion environment.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Artifact root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Janitor that owns artifact removal for this root.
    #[must_use]
    pub fn janitor(&self) -> &Arc<ArtifactJanitor> {
        &self.janitor
    }

    /// Convert one validated entry into its wire form.
    #[must_use]
    pub fn to_wire(&self, entry: &ServerEntry) -> WireServer {
        match &entry.transport {
            ServerTransport::Http { url, headers } | ServerTransport::Sse { url, headers } => {
                WireServer {
                    transport: Some(entry.transport.kind()),
                    url: Some(url.clone()),
                    headers: (!headers.is_empty()).then(|| headers.clone()),
                    ..WireServer::default()
                }
            }
            ServerTransport::Stdio { command, args, env } => {
                let command = expand(command, &self.env);
                let args: Vec<String> = args
                    .normalized()
                    .iter()
                    .map(|arg| expand(arg, &self.env))
                    .collect();
                let (command, args) = self.wrap_for_platform(command, args);

                WireServer {
                    command: Some(command),
                    args,
                    env: env.as_ref().map(|spec| self.expand_env(spec)),
                    ..WireServer::default()
                }
            }
        }
    }

    /// Wire form of `merged` without secret injection or any file I/O.
    #[must_use]
    pub fn preview(&self, merged: &MergedServerSet) -> ConfigArtifact {
        ConfigArtifact {
            servers: merged
                .iter()
                .map(|entry| (entry.name.clone(), self.to_wire(entry)))
                .collect(),
        }
    }

    /// Build and write the artifact for this turn.
    ///
    /// Artifacts left by earlier turns are swept first, so at most one
    /// artifact (and one copy of any injected secret) exists under the root
    /// at a time. Returns `Ok(None)` when MCP is disabled or nothing is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Artifact`] if the directory or file cannot be
    /// written, or the written file does not parse back to the same document.
    pub async fn build(
        &self,
        merged: &MergedServerSet,
        enabled: bool,
    ) -> Result<Option<BuiltArtifact>> {
        self.janitor.cleanup_stale(&self.root);
        if !enabled || merged.is_empty() {
            debug!(enabled, servers = merged.len(), "no mcp servers to configure");
            return Ok(None);
        }

        let mut artifact = self.preview(merged);
        self.injector.inject_if_needed(&mut artifact.servers).await;

        let path = self.write(&artifact)?;

        info!(
            path = %path.display(),
            servers = artifact.servers.len(),
            "mcp config artifact written"
        );
        self.diagnostics.record(
            Diagnostic::info(Component::Artifact, "artifact written")
                .with_subject(path.display().to_string()),
        );

        Ok(Some(BuiltArtifact { artifact, path }))
    }

    fn wrap_for_platform(&self, command: String, args: Vec<String>) -> (String, Vec<String>) {
        let needs_shell = self.platform == Platform::Windows
            && WINDOWS_SHELL_COMMANDS
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&command));
        if !needs_shell {
            return (command, args);
        }

        let mut wrapped = Vec::with_capacity(args.len() + 2);
        wrapped.push("/c".to_owned());
        wrapped.push(command);
        wrapped.extend(args);
        ("cmd".to_owned(), wrapped)
    }

    fn expand_env(&self, spec: &EnvSpec) -> BTreeMap<String, String> {
        spec.pairs()
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Value::Null => return None,
                    Value::String(text) => self.normalize_path(expand(&text, &self.env)),
                    other => other.to_string(),
                };
                Some((key, value))
            })
            .collect()
    }

    fn normalize_path(&self, value: String) -> String {
        if self.platform == Platform::Windows && !value.contains("://") {
            value.replace('/', "\\")
        } else {
            value
        }
    }

    fn write(&self, artifact: &ConfigArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|err| {
            AppError::Artifact(format!(
                "failed to create artifact root {}: {err}",
                self.root.display()
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(ARTIFACT_DIR_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|err| AppError::Artifact(format!("failed to create artifact dir: {err}")))?
            .keep();

        let path = dir.join(ARTIFACT_FILE_NAME);
        let result = write_and_verify(&path, artifact);
        if result.is_err() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                debug!(%err, dir = %dir.display(), "could not remove incomplete artifact dir");
            }
        }
        result.map(|()| path)
    }
}

fn write_and_verify(path: &Path, artifact: &ConfigArtifact) -> Result<()> {
    let body = serde_json::to_string_pretty(artifact)
        .map_err(|err| AppError::Artifact(format!("failed to serialize artifact: {err}")))?;

    fs::write(path, body)
        .map_err(|err| AppError::Artifact(format!("failed to write {}: {err}", path.display())))?;

    let written = fs::read_to_string(path)
        .map_err(|err| AppError::Artifact(format!("failed to re-read {}: {err}", path.display())))?;
    let parsed: ConfigArtifact = serde_json::from_str(&written)
        .map_err(|err| AppError::Artifact(format!("written artifact does not parse: {err}")))?;

    if &parsed != artifact {
        return Err(AppError::Artifact(
            "written artifact differs from the built document".into(),
        ));
    }
    Ok(())
}
