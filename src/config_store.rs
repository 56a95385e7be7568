//! Scoped settings storage for MCP server entries and the enabled flag.
//!
//! Each scope is one JSON settings file:
//!
//! | Scope            | File                                        |
//! |------------------|---------------------------------------------|
//! | Global           | `<config dir>/agent-relay/settings.json`    |
//! | Workspace        | `<workspace>/.agent-relay/settings.json`    |
//! | Workspace folder | `<folder>/.agent-relay/settings.json`       |
//!
//! Values live under `mcp.enabled` and `mcp.servers`, either nested
//! (`{"mcp": {"servers": [...]}}`) or as flat dotted keys
//! (`{"mcp.servers": [...]}`). A missing file is an empty scope. A file
//! that cannot be read or parsed is reported and treated as empty.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::diagnostics::{Component, Diagnostic, DiagnosticSink};
use crate::models::scope::{ScopeKind, ScopedValue};
use crate::{AppError, Result};

/// Application directory under the user config dir.
pub const APP_DIR: &str = "agent-relay";

/// Per-directory settings directory.
pub const SETTINGS_DIR: &str = ".agent-relay";

/// Settings file name.
pub const SETTINGS_FILE: &str = "settings.json";

const SECTION: &str = "mcp";
const SERVERS_KEY: &str = "servers";
const ENABLED_KEY: &str = "enabled";

/// Boxed future returned by [`ConfigStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Scoped read/write access to MCP settings.
pub trait ConfigStore: Send + Sync {
    /// Raw `mcp.servers` value at every scope.
    fn inspect_servers(&self) -> StoreFuture<'_, ScopedValue<Value>>;

    /// `mcp.enabled` at every scope.
    fn inspect_enabled(&self) -> StoreFuture<'_, ScopedValue<bool>>;

    /// Replace `mcp.servers` at `scope`.
    fn write_servers(&self, scope: ScopeKind, servers: Value) -> StoreFuture<'_, ()>;
}

/// [`ConfigStore`] over JSON settings files.
pub struct FileConfigStore {
    global: Option<PathBuf>,
    workspace: Option<PathBuf>,
    folder: Option<PathBuf>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl FileConfigStore {
    /// Store with the global scope under the user config directory and no
    /// workspace or folder scope.
    #[must_use]
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            global: dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE)),
            workspace: None,
            folder: None,
            diagnostics,
        }
    }

    /// Use `path` as the global settings file.
    #[must_use]
    pub fn with_global_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.global = Some(path.into());
        self
    }

    /// Read workspace settings from `root`.
    #[must_use]
    pub fn with_workspace(mut self, root: &Path) -> Self {
        self.workspace = Some(scope_file(root));
        self
    }

    /// Read workspace-folder settings from `folder`.
    #[must_use]
    pub fn with_folder(mut self, folder: &Path) -> Self {
        self.folder = Some(scope_file(folder));
        self
    }

    /// Settings file backing `scope`, if that scope is configured.
    #[must_use]
    pub fn settings_path(&self, scope: ScopeKind) -> Option<&Path> {
        match scope {
            ScopeKind::Global => self.global.as_deref(),
            ScopeKind::Workspace => self.workspace.as_deref(),
            ScopeKind::WorkspaceFolder => self.folder.as_deref(),
        }
    }

    fn inspect<T>(&self, key: &str, convert: impl Fn(&Value) -> Option<T>) -> ScopedValue<T> {
        let mut scoped = ScopedValue::default();
        for scope in ScopeKind::ASCENDING {
            let value = self
                .settings_path(scope)
                .and_then(|path| self.read_settings(path))
                .and_then(|settings| lookup(&settings, key).cloned())
                .and_then(|value| {
                    let converted = convert(&value);
                    if converted.is_none() {
                        self.report(format!("{SECTION}.{key} has an unexpected type"), scope);
                    }
                    converted
                });
            scoped.set(scope, value);
        }
        scoped
    }

    fn read_settings(&self, path: &Path) -> Option<Value> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                self.report_path(format!("failed to read settings file: {err}"), path);
                return None;
            }
        };

        if raw.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => {
                self.report_path("settings file is not a JSON object".into(), path);
                None
            }
            Err(err) => {
                self.report_path(format!("malformed settings file: {err}"), path);
                None
            }
        }
    }

    fn report(&self, message: String, scope: ScopeKind) {
        let subject = self
            .settings_path(scope)
            .map_or_else(|| format!("{scope:?}"), |p| p.display().to_string());
        warn!(?scope, "{message}");
        self.diagnostics
            .record(Diagnostic::warning(Component::ConfigStore, message).with_subject(subject));
    }

    fn report_path(&self, message: String, path: &Path) {
        warn!(path = %path.display(), "{message}");
        self.diagnostics.record(
            Diagnostic::warning(Component::ConfigStore, message)
                .with_subject(path.display().to_string()),
        );
    }
}

impl ConfigStore for FileConfigStore {
    fn inspect_servers(&self) -> StoreFuture<'_, ScopedValue<Value>> {
        Box::pin(async move {
            Ok(self.inspect(SERVERS_KEY, |value| {
                (!value.is_null()).then(|| value.clone())
            }))
        })
    }

    fn inspect_enabled(&self) -> StoreFuture<'_, ScopedValue<bool>> {
        Box::pin(async move {
            let mut scoped = self.inspect(ENABLED_KEY, Value::as_bool);
            scoped.default_value = Some(false);
            Ok(scoped)
        })
    }

    fn write_servers(&self, scope: ScopeKind, servers: Value) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let path = self
                .settings_path(scope)
                .ok_or_else(|| AppError::NotFound(format!("no settings file for {scope:?} scope")))?
                .to_path_buf();

            let mut settings = match fs::read_to_string(&path) {
                Ok(raw) if !raw.trim().is_empty() => serde_json::from_str::<Value>(&raw)?,
                Ok(_) => Value::Object(Map::new()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "failed to read {}: {err}",
                        path.display()
                    )))
                }
            };

            let Value::Object(root) = &mut settings else {
                return Err(AppError::Config(format!(
                    "{} is not a JSON object",
                    path.display()
                )));
            };
            store(root, SERVERS_KEY, servers)?;

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| {
                    AppError::Io(format!("failed to create {}: {err}", parent.display()))
                })?;
            }
            let body = serde_json::to_string_pretty(&settings)?;
            fs::write(&path, body)
                .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))?;

            info!(?scope, path = %path.display(), "mcp servers written");
            Ok(())
        })
    }
}

fn scope_file(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

fn lookup<'a>(settings: &'a Value, key: &str) -> Option<&'a Value> {
    settings
        .get(format!("{SECTION}.{key}"))
        .or_else(|| settings.get(SECTION).and_then(|section| section.get(key)))
}

fn store(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<()> {
    let flat = format!("{SECTION}.{key}");
    if root.contains_key(&flat) {
        root.insert(flat, value);
        return Ok(());
    }

    let section = root
        .entry(SECTION)
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(section) = section else {
        return Err(AppError::Config(format!("`{SECTION}` setting is not an object")));
    };
    debug!(key, "updating nested setting");
    section.insert(key.to_owned(), value);
    Ok(())
}
