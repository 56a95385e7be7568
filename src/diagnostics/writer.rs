//! Persistent diagnostics: one JSON object per line, one file per UTC day.
//!
//! Files are named `diagnostics-YYYY-MM-DD.jsonl` inside the configured
//! directory, dated by each entry's own timestamp. Entries below the writer's minimum level never reach disk.
//! Write failures are logged through `tracing` and never surface to the
//! component that recorded the entry.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{Diagnostic, DiagnosticLevel, DiagnosticSink};
use crate::{AppError, Result};

/// File currently receiving entries.
struct DayFile {
    date: NaiveDate,
    path: PathBuf,
    out: BufWriter<File>,
}

/// [`DiagnosticSink`] appending entries to daily JSONL files.
pub struct JsonlDiagnosticWriter {
    dir: PathBuf,
    min_level: DiagnosticLevel,
    current: Mutex<Option<DayFile>>,
}

impl JsonlDiagnosticWriter {
    /// Writer storing files in `dir`, which is created if missing.
    ///
    /// Every level is persisted until [`Self::with_min_level`] narrows it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Config(format!(
                "failed to create diagnostics directory {}: {err}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            min_level: DiagnosticLevel::Debug,
            current: Mutex::new(None),
        })
    }

    /// Drop entries less severe than `level`.
    #[must_use]
    pub fn with_min_level(mut self, level: DiagnosticLevel) -> Self {
        self.min_level = level;
        self
    }

    /// File that entries recorded on `date` go to.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("diagnostics-{date}.jsonl"))
    }

    fn open(&self, date: NaiveDate) -> Result<DayFile> {
        let path = self.path_for(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| AppError::Io(format!("failed to open {}: {err}", path.display())))?;
        debug!(path = %path.display(), "diagnostics file opened");
        Ok(DayFile {
            date,
            path,
            out: BufWriter::new(file),
        })
    }

    fn append(&self, entry: &Diagnostic) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|err| AppError::Io(format!("failed to serialize diagnostic: {err}")))?;
        let date = entry.timestamp.date_naive();

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let file = match current.take() {
            Some(file) if file.date == date => file,
            _ => self.open(date)?,
        };
        let file = current.insert(file);

        writeln!(file.out, "{line}")
            .and_then(|()| file.out.flush())
            .map_err(|err| {
                AppError::Io(format!("failed to write {}: {err}", file.path.display()))
            })
    }
}

impl DiagnosticSink for JsonlDiagnosticWriter {
    fn record(&self, entry: Diagnostic) {
        if entry.level < self.min_level {
            return;
        }
        if let Err(err) = self.append(&entry) {
            warn!(%err, "failed to persist diagnostic entry");
        }
    }
}
