//! Inconsistency detection side-channel.
//!
//! When undoing an activity shows that the stored state never matched what the
//! activity claims to have produced, the disagreement is:
//!
//! 1. appended as one JSON line to the run's [`InconsistencyLog`], and
//! 2. copied into the derived version's `corrupted` map, so the mismatch stays
//!    visible in the reconstructed data.
//!
//! Neither step aborts reconstruction.
//!
//! The log is an explicit handle owned by one reconstruction run. Workers share
//! it by reference; appends are serialized behind a mutex and every entry is a
//! complete line, so concurrent chunks never interleave partial records. The
//! buffer is flushed by [`InconsistencyLog::finish`] and, as a fallback, on
//! drop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ErrorCode;
use crate::model::{Activity, Instant, Oid, VersionDocument, json_type_name};

/// One recorded disagreement between an activity and the document state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub oid: Oid,
    pub when: Instant,
    pub field: String,
    pub removed: Value,
    pub removed_type: String,
    pub added: Value,
    pub added_type: String,
    /// The value the document actually held after the activity.
    pub current: Value,
    pub current_type: String,
}

impl Inconsistency {
    /// Describe the mismatch between `activity` and the observed `current`.
    #[must_use]
    pub fn new(activity: &Activity, current: &Value) -> Self {
        Self {
            oid: activity.oid.clone(),
            when: activity.when,
            field: activity.field.clone(),
            removed: activity.removed.clone(),
            removed_type: json_type_name(&activity.removed).to_string(),
            added: activity.added.clone(),
            added_type: json_type_name(&activity.added).to_string(),
            current: current.clone(),
            current_type: json_type_name(current).to_string(),
        }
    }
}

/// Failure to persist inconsistency entries.
#[derive(Debug, thiserror::Error)]
pub enum InconsistencyLogError {
    #[error("{}: cannot open inconsistency log {}: {source}", ErrorCode::InconsistencyLogWriteFailed.code(), .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("{}: {failed} inconsistency entries could not be written", ErrorCode::InconsistencyLogWriteFailed.code())]
    DroppedEntries { failed: usize },
    #[error("{}: flushing inconsistency log failed: {0}", ErrorCode::InconsistencyLogWriteFailed.code())]
    Flush(#[source] io::Error),
}

impl InconsistencyLogError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InconsistencyLogWriteFailed
    }
}

/// Totals reported once the log is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub recorded: usize,
    pub path: Option<PathBuf>,
}

enum Sink {
    File(BufWriter<File>),
    Memory(Vec<Inconsistency>),
    Discard,
}

/// Append-only inconsistency log scoped to one reconstruction run.
pub struct InconsistencyLog {
    sink: Mutex<Sink>,
    path: Option<PathBuf>,
    recorded: AtomicUsize,
    failed: AtomicUsize,
}

impl InconsistencyLog {
    /// Open (or create) a JSON-lines log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be created.
    pub fn open(path: &Path) -> Result<Self, InconsistencyLogError> {
        let open_err = |source| InconsistencyLogError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(open_err)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        Ok(Self::with_sink(
            Sink::File(BufWriter::new(file)),
            Some(path.to_path_buf()),
        ))
    }

    /// Keep entries in memory; read them back with [`Self::entries`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_sink(Sink::Memory(Vec::new()), None)
    }

    /// Count entries without persisting them.
    #[must_use]
    pub fn discard() -> Self {
        Self::with_sink(Sink::Discard, None)
    }

    fn with_sink(sink: Sink, path: Option<PathBuf>) -> Self {
        Self {
            sink: Mutex::new(sink),
            path,
            recorded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Append one entry.
    ///
    /// Write failures are counted and surfaced by [`Self::finish`] instead of
    /// interrupting the chunk that found the inconsistency.
    pub fn record(&self, entry: &Inconsistency) {
        tracing::debug!(
            target: "timeline::inconsistency",
            oid = %entry.oid,
            when = entry.when,
            field = %entry.field,
            added_type = %entry.added_type,
            current_type = %entry.current_type,
            "activity disagrees with document state"
        );

        let written = match self.sink.lock() {
            Ok(mut sink) => match &mut *sink {
                Sink::File(writer) => write_line(writer, entry),
                Sink::Memory(entries) => {
                    entries.push(entry.clone());
                    Ok(())
                }
                Sink::Discard => Ok(()),
            },
            Err(_) => Err(io::Error::other("inconsistency log mutex poisoned")),
        };

        match written {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(oid = %entry.oid, field = %entry.field, %error, "failed to write inconsistency entry");
            }
        }
    }

    /// Number of entries successfully recorded so far.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Log file path, when backed by a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of in-memory entries (empty for file and discard sinks).
    #[must_use]
    pub fn entries(&self) -> Vec<Inconsistency> {
        match self.sink.lock() {
            Ok(sink) => match &*sink {
                Sink::Memory(entries) => entries.clone(),
                Sink::File(_) | Sink::Discard => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    /// Flush buffered entries to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying file cannot be flushed.
    pub fn flush(&self) -> Result<(), InconsistencyLogError> {
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| InconsistencyLogError::Flush(io::Error::other("mutex poisoned")))?;
        if let Sink::File(writer) = &mut *sink {
            writer.flush().map_err(InconsistencyLogError::Flush)?;
        }
        drop(sink);
        Ok(())
    }

    /// Flush and close the log, reporting what was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails or any entry was dropped.
    pub fn finish(self) -> Result<LogSummary, InconsistencyLogError> {
        self.flush()?;
        let failed = self.failed.load(Ordering::Relaxed);
        if failed > 0 {
            return Err(InconsistencyLogError::DroppedEntries { failed });
        }
        Ok(LogSummary {
            recorded: self.recorded(),
            path: self.path.clone(),
        })
    }
}

impl Drop for InconsistencyLog {
    fn drop(&mut self) {
        if let Ok(sink) = self.sink.get_mut() {
            if let Sink::File(writer) = sink {
                let _ = writer.flush();
            }
        }
    }
}

impl std::fmt::Debug for InconsistencyLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InconsistencyLog")
            .field("path", &self.path)
            .field("recorded", &self.recorded())
            .finish_non_exhaustive()
    }
}

fn write_line(writer: &mut BufWriter<File>, entry: &Inconsistency) -> io::Result<()> {
    let mut line = serde_json::to_vec(entry).map_err(io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line)
}

/// Record a mismatch for `activity` and annotate the derived version.
///
/// `older` is the version holding the pre-change value; `current` is the
/// post-change value the undo operated on.
pub fn flag_inconsistency(
    log: &InconsistencyLog,
    older: &mut VersionDocument,
    activity: &Activity,
    current: &Value,
) {
    log.record(&Inconsistency::new(activity, current));
    older
        .corrupted
        .insert(activity.field.clone(), activity.added.clone());
}
