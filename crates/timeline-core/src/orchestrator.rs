//! Chunked, concurrent reconstruction runs.
//!
//! A run sorts and de-duplicates the entity ids, cuts them into contiguous
//! chunks and hands each chunk to a fixed pool of scoped worker threads over a
//! bounded job channel. A worker owns its chunk end to end:
//!
//! | Step        | What happens                                              |
//! |-------------|-----------------------------------------------------------|
//! | load        | [`load_chunk`] fetches anchors, activities and creations  |
//! | rebuild     | [`rebuild_history`] per entity, sequentially              |
//! | swap        | one [`Store::swap_versions`] for the whole chunk          |
//!
//! Chunks commit independently. Once any chunk fails no further chunk is
//! started: in-flight chunks finish, queued ones are reported as skipped, and
//! the run returns [`ReconstructError::ChunksFailed`] naming every failure,
//! lowest chunk index first.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam::channel;
use serde::Serialize;

use crate::error::ErrorCode;
use crate::history::rebuild_history;
use crate::inconsistency::{InconsistencyLog, InconsistencyLogError};
use crate::loader::load_chunk;
use crate::model::Oid;
use crate::store::{Store, StoreError, SwapStats};

/// Default number of entities per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Worker count used when none is configured.
#[must_use]
pub fn default_max_workers() -> usize {
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Parameters of one reconstruction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructOptions {
    /// Entities to process. `None` means every entity the store knows.
    pub oids: Option<Vec<Oid>>,
    pub chunk_size: usize,
    pub max_workers: usize,
    /// JSON-lines file receiving inconsistency entries. `None` only counts them.
    pub inconsistency_log: Option<PathBuf>,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            oids: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: default_max_workers(),
            inconsistency_log: None,
        }
    }
}

impl ReconstructOptions {
    /// Restrict the run to these entities.
    #[must_use]
    pub fn with_oids(mut self, oids: impl IntoIterator<Item = impl Into<Oid>>) -> Self {
        self.oids = Some(oids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn with_inconsistency_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.inconsistency_log = Some(path.into());
        self
    }

    /// Reject option values the run cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructError::InvalidOptions`] for a zero chunk size or
    /// worker count.
    pub fn validate(&self) -> Result<(), ReconstructError> {
        if self.chunk_size == 0 {
            return Err(ReconstructError::InvalidOptions(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ReconstructError::InvalidOptions(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of one committed chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    pub index: usize,
    pub oids: usize,
    /// Entities whose version chain changed.
    pub rebuilt: usize,
    pub removed: usize,
    pub inserted: usize,
    pub inconsistencies: usize,
}

/// A chunk that could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub first_oid: Oid,
    pub len: usize,
    pub code: &'static str,
    pub error: String,
}

impl ChunkFailure {
    fn new(index: usize, chunk: &[Oid], code: ErrorCode, error: String) -> Self {
        Self {
            index,
            first_oid: chunk.first().cloned().unwrap_or_else(|| Oid::new("")),
            len: chunk.len(),
            code: code.code(),
            error,
        }
    }
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} ({} ids from {}): {}",
            self.index, self.len, self.first_oid, self.error
        )
    }
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub oids: usize,
    pub chunks_total: usize,
    pub chunks_committed: usize,
    pub chunks_failed: usize,
    pub chunks_skipped: usize,
    pub entities_rebuilt: usize,
    pub versions_removed: usize,
    pub versions_inserted: usize,
    pub inconsistencies: usize,
    pub inconsistency_log: Option<PathBuf>,
    /// Failed chunks ordered by chunk index.
    pub failures: Vec<ChunkFailure>,
}

impl RunReport {
    fn absorb(&mut self, outcome: &ChunkOutcome) {
        self.chunks_committed += 1;
        self.entities_rebuilt += outcome.rebuilt;
        self.versions_removed += outcome.removed;
        self.versions_inserted += outcome.inserted;
        self.inconsistencies += outcome.inconsistencies;
    }

    /// True when every chunk committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.chunks_committed == self.chunks_total
    }
}

/// Run-level failure.
#[derive(Debug, thiserror::Error)]
pub enum ReconstructError {
    #[error("{}: {0}", ErrorCode::InvalidOptions.code())]
    InvalidOptions(String),
    #[error("{}: cannot list entities: {0}", ErrorCode::StoreUnavailable.code())]
    ListOids(#[source] StoreError),
    #[error(
        "{}: {} of {} chunks failed, first {first}",
        ErrorCode::ChunkFailed.code(),
        .report.chunks_failed,
        .report.chunks_total
    )]
    ChunksFailed {
        first: ChunkFailure,
        report: Box<RunReport>,
    },
    #[error(transparent)]
    InconsistencyLog(#[from] InconsistencyLogError),
}

impl ReconstructError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOptions(_) => ErrorCode::InvalidOptions,
            Self::ListOids(error) => error.code(),
            Self::ChunksFailed { .. } => ErrorCode::ChunkFailed,
            Self::InconsistencyLog(error) => error.code(),
        }
    }

    /// Partial report of a run that failed after dispatching chunks.
    #[must_use]
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::ChunksFailed { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

/// Reconstruct version history for the entities selected by `options`.
///
/// Opens the inconsistency log named in the options (or a counting-only log),
/// runs [`reconstruct_with_log`] and closes the log on every exit path.
///
/// # Errors
///
/// See [`ReconstructError`]. A chunk failure takes precedence over a failure
/// to close the inconsistency log, which is then only logged.
pub fn reconstruct<S: Store + ?Sized>(
    store: &S,
    options: &ReconstructOptions,
) -> Result<RunReport, ReconstructError> {
    options.validate()?;
    let log = match &options.inconsistency_log {
        Some(path) => InconsistencyLog::open(path)?,
        None => InconsistencyLog::discard(),
    };

    let result = reconstruct_with_log(store, options, &log);
    match log.finish() {
        Ok(summary) => {
            tracing::debug!(recorded = summary.recorded, "inconsistency log closed");
            result
        }
        Err(log_error) => match result {
            Ok(_) => Err(log_error.into()),
            Err(error) => {
                tracing::warn!(error = %log_error, "inconsistency log incomplete");
                Err(error)
            }
        },
    }
}

enum ChunkResult {
    Committed(ChunkOutcome),
    Failed(ChunkFailure),
    Skipped,
}

/// Like [`reconstruct`], recording inconsistencies into a caller-owned log.
///
/// # Errors
///
/// See [`ReconstructError`].
pub fn reconstruct_with_log<S: Store + ?Sized>(
    store: &S,
    options: &ReconstructOptions,
    log: &InconsistencyLog,
) -> Result<RunReport, ReconstructError> {
    options.validate()?;

    let mut oids = match &options.oids {
        Some(oids) => oids.clone(),
        None => store.all_oids().map_err(ReconstructError::ListOids)?,
    };
    oids.sort();
    oids.dedup();

    let chunks: Vec<&[Oid]> = oids.chunks(options.chunk_size).collect();
    let mut report = RunReport {
        oids: oids.len(),
        chunks_total: chunks.len(),
        inconsistency_log: log.path().map(Path::to_path_buf),
        ..RunReport::default()
    };
    if chunks.is_empty() {
        tracing::info!("no entities to reconstruct");
        return Ok(report);
    }

    let workers = options.max_workers.min(chunks.len());
    tracing::info!(
        oids = report.oids,
        chunks = report.chunks_total,
        workers,
        "reconstruction started"
    );

    let halted = AtomicBool::new(false);
    let (job_tx, job_rx) = channel::bounded::<(usize, &[Oid])>(workers);
    let (done_tx, done_rx) = channel::unbounded::<(usize, ChunkResult)>();

    let mut results: Vec<(usize, ChunkResult)> = thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let halted = &halted;
            scope.spawn(move || {
                for (index, chunk) in job_rx {
                    let result = if halted.load(Ordering::Acquire) {
                        ChunkResult::Skipped
                    } else {
                        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                            process_chunk(store, index, chunk, log)
                        }));
                        let settled = match attempt {
                            Ok(Ok(outcome)) => Ok(outcome),
                            Ok(Err(error)) => Err((error.code(), error.to_string())),
                            Err(_) => Err((
                                ErrorCode::InternalUnexpected,
                                "worker panicked while processing the chunk".to_string(),
                            )),
                        };
                        match settled {
                            Ok(outcome) => ChunkResult::Committed(outcome),
                            Err((code, error)) => {
                                halted.store(true, Ordering::Release);
                                tracing::error!(
                                    chunk = index,
                                    first_oid = %chunk.first().map_or("", |oid| oid.as_str()),
                                    code = code.code(),
                                    %error,
                                    "chunk failed"
                                );
                                ChunkResult::Failed(ChunkFailure::new(index, chunk, code, error))
                            }
                        }
                    };
                    if done_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(done_tx);

        for (index, chunk) in chunks.iter().enumerate() {
            if halted.load(Ordering::Acquire) {
                break;
            }
            if job_tx.send((index, *chunk)).is_err() {
                break;
            }
        }
        drop(job_tx);

        done_rx.iter().collect()
    });
    results.sort_by_key(|(index, _)| *index);

    for (_, result) in results {
        match result {
            ChunkResult::Committed(outcome) => report.absorb(&outcome),
            ChunkResult::Failed(failure) => report.failures.push(failure),
            ChunkResult::Skipped => {}
        }
    }
    report.chunks_failed = report.failures.len();
    report.chunks_skipped = report.chunks_total - report.chunks_committed - report.chunks_failed;

    tracing::info!(
        committed = report.chunks_committed,
        failed = report.chunks_failed,
        skipped = report.chunks_skipped,
        inserted = report.versions_inserted,
        removed = report.versions_removed,
        inconsistencies = report.inconsistencies,
        "reconstruction finished"
    );

    match report.failures.first().cloned() {
        Some(first) => Err(ReconstructError::ChunksFailed {
            first,
            report: Box::new(report),
        }),
        None => Ok(report),
    }
}

/// Load, rebuild and commit one chunk.
///
/// Entities are rebuilt one after another; their reconstructed chains are
/// committed together with a single swap. A chunk where nothing changed
/// performs no write.
///
/// # Errors
///
/// Returns the [`StoreError`] that stopped the load or the swap. Nothing of
/// the chunk is committed in that case.
pub fn process_chunk<S: Store + ?Sized>(
    store: &S,
    index: usize,
    oids: &[Oid],
    log: &InconsistencyLog,
) -> Result<ChunkOutcome, StoreError> {
    let snapshots = load_chunk(store, oids)?;

    let mut outcome = ChunkOutcome {
        index,
        oids: oids.len(),
        ..ChunkOutcome::default()
    };
    let mut remove = Vec::new();
    let mut insert = Vec::new();
    for snapshot in &snapshots {
        let rebuilt = rebuild_history(
            &snapshot.anchor,
            &snapshot.activities,
            snapshot.creation,
            log,
        );
        outcome.inconsistencies += rebuilt.inconsistencies;
        if rebuilt.is_unchanged() {
            continue;
        }
        outcome.rebuilt += 1;
        remove.extend(snapshot.anchor.id);
        insert.extend(rebuilt.versions);
    }

    let stats = if insert.is_empty() {
        SwapStats::default()
    } else {
        store.swap_versions(&remove, &insert)?
    };
    outcome.removed = stats.removed;
    outcome.inserted = stats.inserted;

    tracing::debug!(
        chunk = index,
        oids = outcome.oids,
        rebuilt = outcome.rebuilt,
        removed = outcome.removed,
        inserted = outcome.inserted,
        inconsistencies = outcome.inconsistencies,
        "chunk committed"
    );
    Ok(outcome)
}
