use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use timeline_core::config::EffectiveConfig;
use timeline_core::lock::{DEFAULT_LOCK_TIMEOUT, RunLock};
use timeline_core::model::{Activity, VersionDocument};
use timeline_core::store::Store;

use crate::output::{OutputMode, pretty_kv, render_mode};

#[derive(Args, Debug)]
#[group(required = true, multiple = true)]
pub struct LoadArgs {
    /// JSON-lines file of version documents.
    #[arg(long)]
    pub versions: Option<PathBuf>,

    /// JSON-lines file of activity records.
    #[arg(long)]
    pub activities: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
struct LoadReport {
    versions: usize,
    activities: usize,
}

/// Parse one JSON value per non-blank line.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), index + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Execute `tl load`: import version documents and activities into the store.
///
/// Both files are parsed before anything is written, so a malformed line
/// leaves the store untouched.
///
/// # Errors
///
/// Returns an error if the project is not initialized, a file cannot be
/// parsed, the run lock is held, or the store rejects the records.
pub fn run_load(
    args: &LoadArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let store = super::open_store(project_root, config)?;

    let versions: Vec<VersionDocument> = match &args.versions {
        Some(path) => read_jsonl(path)?,
        None => Vec::new(),
    };
    let activities: Vec<Activity> = match &args.activities {
        Some(path) => read_jsonl(path)?,
        None => Vec::new(),
    };

    let _lock = RunLock::for_store(store.path(), DEFAULT_LOCK_TIMEOUT)?;
    let mut report = LoadReport::default();
    if !versions.is_empty() {
        report.versions = store.insert_versions(&versions)?.len();
    }
    if !activities.is_empty() {
        report.activities = store.append_activities(&activities)?;
    }
    tracing::info!(
        versions = report.versions,
        activities = report.activities,
        "records loaded"
    );

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "versions {}", r.versions)?;
            writeln!(w, "activities {}", r.activities)
        },
        |r, w| {
            writeln!(w, "✓ Loaded records")?;
            pretty_kv(w, "Versions", r.versions.to_string())?;
            pretty_kv(w, "Activities", r.activities.to_string())
        },
    )
}
