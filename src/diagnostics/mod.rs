//! Structured diagnostics for configuration resolution and process turns.
//!
//! Components never log configuration warnings straight to the console.
//! They receive an `Arc<dyn DiagnosticSink>` at construction and record
//! [`Diagnostic`] entries through it, so embedders and tests can observe
//! exactly what was skipped, dropped, or degraded during a turn.
//!
//! Implementations:
//! - [`TracingSink`] forwards every entry to `tracing`.
//! - [`MemorySink`] collects entries in memory.
//! - [`JsonlDiagnosticWriter`] appends JSONL records to daily files.
//! - [`FanoutSink`] forwards to several sinks.

pub mod writer;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Severity of a diagnostic entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    /// Verbose detail useful while debugging a turn.
    Debug,
    /// Normal lifecycle information.
    Info,
    /// Something was skipped or degraded but the turn continues.
    Warning,
}

/// Component that emitted a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Scope merge and entry validation.
    Resolver,
    /// Credential injection.
    Secrets,
    /// Config artifact materialization.
    Artifact,
    /// Stale artifact and scratch file cleanup.
    Janitor,
    /// Subprocess lifecycle.
    Supervisor,
    /// Settings file loading.
    ConfigStore,
}

/// A single structured diagnostic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: DiagnosticLevel,
    /// Emitting component.
    pub component: Component,
    /// Human-readable message.
    pub message: String,
    /// Server entry name, path, or other subject the message is about.
    pub subject: Option<String>,
}

impl Diagnostic {
    /// Construct a diagnostic stamped with the current time.
    #[must_use]
    pub fn new(level: DiagnosticLevel, component: Component, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component,
            message: message.into(),
            subject: None,
        }
    }

    /// Shorthand for a [`DiagnosticLevel::Warning`] entry.
    #[must_use]
    pub fn warning(component: Component, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, component, message)
    }

    /// Shorthand for a [`DiagnosticLevel::Info`] entry.
    #[must_use]
    pub fn info(component: Component, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, component, message)
    }

    /// Set the subject of this entry.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Receives structured diagnostics.
///
/// Recording never fails from the caller's point of view: a sink that
/// cannot persist an entry reports the problem through `tracing` instead.
pub trait DiagnosticSink: Send + Sync {
    /// Record a single entry.
    fn record(&self, entry: Diagnostic);
}

/// Sink that forwards entries to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, entry: Diagnostic) {
        let subject = entry.subject.as_deref().unwrap_or("");
        match entry.level {
            DiagnosticLevel::Debug => {
                debug!(component = ?entry.component, subject, "{}", entry.message);
            }
            DiagnosticLevel::Info => {
                info!(component = ?entry.component, subject, "{}", entry.message);
            }
            DiagnosticLevel::Warning => {
                warn!(component = ?entry.component, subject, "{}", entry.message);
            }
        }
    }
}

/// Sink that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Entries at [`DiagnosticLevel::Warning`] emitted by `component`.
    #[must_use]
    pub fn warnings_for(&self, component: Component) -> Vec<Diagnostic> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == DiagnosticLevel::Warning && e.component == component)
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, entry: Diagnostic) {
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(_) => warn!("diagnostic memory sink mutex poisoned, dropping entry"),
        }
    }
}

/// Sink that forwards each entry to every inner sink.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    /// Build a fan-out over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }
}

impl DiagnosticSink for FanoutSink {
    fn record(&self, entry: Diagnostic) {
        for sink in &self.sinks {
            sink.record(entry.clone());
        }
    }
}

pub use writer::JsonlDiagnosticWriter;
