//! Cleanup of orphaned config artifacts and per-turn scratch files.
//!
//! The artifact root is shared by every turn of a relay, and each build
//! sweeps what earlier turns left behind. There is no lock around it, so
//! deletion relies on naming alone: only directories carrying
//! [`ARTIFACT_DIR_PREFIX`] and files whose name matches the strict scratch
//! pattern are ever removed, and a file that is already gone is not an
//! error.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::diagnostics::{Component, Diagnostic, DiagnosticSink};
use crate::{AppError, Result};

/// Name prefix of per-turn artifact directories.
pub const ARTIFACT_DIR_PREFIX: &str = "mcp-config-";

/// Glob used to search workspaces for scratch files.
pub const SCRATCH_GLOB: &str = "**/relay-scratch-*";

/// Directories never searched or cleaned.
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", "target", ".git"];

static SCRATCH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^relay-scratch-[A-Za-z0-9_-]+\.(?:png|jpe?g|gif|webp|txt|json)$")
        .unwrap_or_else(|_| unreachable!("scratch name pattern is a valid regex"))
});

// ── Workspace search ────────────────────────────────────────────

/// Boxed future returned by [`WorkspaceSearch::find`].
pub type SearchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<PathBuf>>> + Send + 'a>>;

/// File search over a workspace tree.
pub trait WorkspaceSearch: Send + Sync {
    /// Files under `root` matching the relative glob `pattern`, excluding
    /// [`EXCLUDED_DIRS`].
    fn find<'a>(&'a self, root: &'a Path, pattern: &'a str) -> SearchFuture<'a>;
}

/// [`WorkspaceSearch`] backed by the `glob` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobWorkspaceSearch;

impl WorkspaceSearch for GlobWorkspaceSearch {
    fn find<'a>(&'a self, root: &'a Path, pattern: &'a str) -> SearchFuture<'a> {
        let root = root.to_path_buf();
        let pattern = pattern.to_owned();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || glob_files(&root, &pattern))
                .await
                .map_err(|err| AppError::Io(format!("workspace search task panicked: {err}")))?
        })
    }
}

fn glob_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!(
        "{}/{pattern}",
        glob::Pattern::escape(&root.to_string_lossy())
    );
    let paths = glob::glob(&full)
        .map_err(|err| AppError::Io(format!("invalid search pattern {full}: {err}")))?;

    Ok(paths
        .filter_map(std::result::Result::ok)
        .filter(|path| path.is_file() && !in_excluded_dir(root, path))
        .collect())
}

fn in_excluded_dir(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| matches!(c, PathComponent::Normal(part) if EXCLUDED_DIRS.iter().any(|d| part == *d)))
}

/// Whether `path`'s file name is a scratch file name.
#[must_use]
pub fn is_scratch_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| SCRATCH_NAME.is_match(name))
}

// ── Janitor ─────────────────────────────────────────────────────

/// Outcome counts of a cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// Items deleted.
    pub removed: usize,
    /// Candidates rejected by re-validation or already gone.
    pub skipped: usize,
    /// Deletions that failed.
    pub failed: usize,
}

/// Deletes stale artifacts and scratch files.
pub struct ArtifactJanitor {
    search: Arc<dyn WorkspaceSearch>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ArtifactJanitor {
    /// Janitor using `search` for the recursive pass.
    #[must_use]
    pub fn new(search: Arc<dyn WorkspaceSearch>, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            search,
            diagnostics,
        }
    }

    /// Remove every artifact directory directly under `root`.
    ///
    /// Runs synchronously; the root holds a handful of entries at most.
    /// A missing root is a no-op. Each failure is recorded and the
    /// remaining entries are still attempted.
    pub fn cleanup_stale(&self, root: &Path) -> CleanupReport {
        let mut report = CleanupReport::default();

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return report,
            Err(err) => {
                self.failure(format!("cannot list artifact root: {err}"), root);
                report.failed += 1;
                return report;
            }
        };

        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(ARTIFACT_DIR_PREFIX) {
                continue;
            }

            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match result {
                Ok(()) => {
                    debug!(path = %path.display(), "removed stale artifact");
                    report.removed += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => report.skipped += 1,
                Err(err) => {
                    self.failure(format!("failed to remove stale artifact: {err}"), &path);
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            info!(removed = report.removed, root = %root.display(), "stale artifacts removed");
        }
        report
    }

    /// Remove the artifact directory holding `artifact_path` once its turn
    /// is over.
    ///
    /// Only a parent directory named with [`ARTIFACT_DIR_PREFIX`] is touched;
    /// anything else is skipped. A directory that is already gone counts as
    /// skipped.
    pub fn remove_artifact(&self, artifact_path: &Path) -> CleanupReport {
        let mut report = CleanupReport::default();

        let Some(dir) = artifact_path.parent().filter(|dir| {
            dir.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(ARTIFACT_DIR_PREFIX))
        }) else {
            debug!(path = %artifact_path.display(), "not inside an artifact dir, left alone");
            report.skipped += 1;
            return report;
        };

        match fs::remove_dir_all(dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "turn artifact removed");
                report.removed += 1;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => report.skipped += 1,
            Err(err) => {
                self.failure(format!("failed to remove turn artifact: {err}"), dir);
                report.failed += 1;
            }
        }
        report
    }

    /// Search each workspace root for scratch files and delete them
    /// concurrently.
    ///
    /// Every search hit is re-checked against the strict scratch name
    /// pattern and the excluded directories before it is deleted, so a
    /// search that returns too much can never widen what gets removed.
    /// Search failures for one root are recorded and the other roots are
    /// still processed.
    pub async fn cleanup_recursive(&self, workspace_roots: &[PathBuf]) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut deletions = JoinSet::new();

        for root in workspace_roots {
            let candidates = match self.search.find(root, SCRATCH_GLOB).await {
                Ok(found) => found,
                Err(err) => {
                    self.failure(format!("workspace search failed: {err}"), root);
                    report.failed += 1;
                    continue;
                }
            };

            for path in candidates {
                if !is_scratch_file(&path) || in_excluded_dir(root, &path) {
                    debug!(path = %path.display(), "search result rejected by scratch pattern");
                    report.skipped += 1;
                    continue;
                }
                deletions.spawn(async move {
                    let result = tokio::fs::remove_file(&path).await;
                    (path, result)
                });
            }
        }

        while let Some(joined) = deletions.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.removed += 1,
                Ok((_, Err(err))) if err.kind() == io::ErrorKind::NotFound => report.skipped += 1,
                Ok((path, Err(err))) => {
                    self.failure(format!("failed to remove scratch file: {err}"), &path);
                    report.failed += 1;
                }
                Err(err) => {
                    warn!(%err, "scratch deletion task failed");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            info!(removed = report.removed, "scratch files removed");
        }
        report
    }

    fn failure(&self, message: String, path: &Path) {
        warn!(path = %path.display(), "{message}");
        self.diagnostics.record(
            Diagnostic::warning(Component::Janitor, message).with_subject(path.display().to_string()),
        );
    }
}
