//! Resolution of the CLI executable and the environment it runs in.

use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, warn};

use crate::config::GlobalConfig;
use crate::models::options::ExecutionEnvironment;
use crate::{AppError, Result};

/// Boxed future returned by [`EnvironmentResolver::resolve`].
pub type EnvironmentFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ExecutionEnvironment>> + Send + 'a>>;

/// Produces the launch environment for one turn.
pub trait EnvironmentResolver: Send + Sync {
    /// Resolve the executable and environment for a turn run in `cwd`.
    ///
    /// A missing executable is an error; nothing is spawned in that case.
    fn resolve<'a>(&'a self, cwd: &'a Path) -> EnvironmentFuture<'a>;
}

/// [`EnvironmentResolver`] for the host system.
///
/// Uses the configured `cli_path` when set, otherwise searches `PATH` for
/// `cli_command`. The child inherits this process's environment.
#[derive(Debug, Clone)]
pub struct SystemEnvironmentResolver {
    command: String,
    explicit_path: Option<PathBuf>,
}

impl SystemEnvironmentResolver {
    /// Resolver for `command`, preferring `explicit_path` when given.
    #[must_use]
    pub fn new(command: impl Into<String>, explicit_path: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            explicit_path,
        }
    }

    /// Resolver configured from [`GlobalConfig`].
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.cli_command.clone(), config.cli_path.clone())
    }

    /// Locate the executable.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the configured path is not a file or
    /// the command is not on `PATH`.
    pub fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = &self.explicit_path {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(AppError::Spawn(format!(
                    "configured cli_path {} is not a file",
                    path.display()
                )))
            };
        }

        which::which(&self.command).map_err(|err| {
            AppError::Spawn(format!("`{}` not found on PATH: {err}", self.command))
        })
    }
}

impl EnvironmentResolver for SystemEnvironmentResolver {
    fn resolve<'a>(&'a self, cwd: &'a Path) -> EnvironmentFuture<'a> {
        Box::pin(async move {
            if !cwd.is_dir() {
                return Err(AppError::Spawn(format!(
                    "working directory {} does not exist",
                    cwd.display()
                )));
            }

            let executable = self.locate()?;
            let shell = needs_shell(&executable);
            debug!(executable = %executable.display(), shell, "cli executable resolved");

            Ok(ExecutionEnvironment {
                executable,
                cwd: cwd.to_path_buf(),
                env: process_env(),
                shell,
            })
        })
    }
}

/// This process's environment, keeping only variables whose name and value
/// are valid Unicode.
#[must_use]
pub fn process_env() -> HashMap<String, String> {
    unicode_env(std::env::vars_os())
}

/// Collect `vars` into a string map, dropping entries that are not valid
/// Unicode instead of failing.
pub fn unicode_env<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut dropped = 0_usize;
    let env = vars
        .into_iter()
        .filter_map(|(key, value)| {
            let pair = key.into_string().ok().zip(value.into_string().ok());
            if pair.is_none() {
                dropped += 1;
            }
            pair
        })
        .collect();
    if dropped > 0 {
        warn!(dropped, "environment variables with non-unicode content ignored");
    }
    env
}

/// Batch-file launchers cannot be spawned directly on Windows.
fn needs_shell(executable: &Path) -> bool {
    cfg!(windows)
        && executable
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("cmd") || ext.eq_ignore_ascii_case("bat"))
}
