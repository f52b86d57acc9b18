use anyhow::Result;
use clap::Args;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use timeline_core::config::EffectiveConfig;
use timeline_core::lock::{DEFAULT_LOCK_TIMEOUT, RunLock};
use timeline_core::model::Oid;
use timeline_core::{ReconstructError, ReconstructOptions, RunReport, reconstruct};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ReconstructArgs {
    /// Only rebuild these entities (repeatable). Defaults to every entity.
    #[arg(long = "oid", value_name = "ID")]
    pub oids: Vec<String>,

    /// Entities per chunk; each chunk commits on its own.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: Option<u64>,

    /// Worker threads processing chunks.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_workers: Option<u64>,

    /// JSON-lines file receiving inconsistency entries.
    #[arg(long, value_name = "PATH")]
    pub inconsistency_log: Option<PathBuf>,
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Combine flags with the effective config; flags win.
fn build_options(
    args: &ReconstructArgs,
    config: &EffectiveConfig,
    project_root: &Path,
) -> ReconstructOptions {
    ReconstructOptions {
        oids: (!args.oids.is_empty())
            .then(|| args.oids.iter().map(|oid| Oid::from(oid.as_str())).collect()),
        chunk_size: args
            .chunk_size
            .map_or(config.project.reconstruct.chunk_size, to_usize),
        max_workers: args.max_workers.map_or_else(|| config.max_workers(), to_usize),
        inconsistency_log: Some(
            args.inconsistency_log.as_ref().map_or_else(
                || config.inconsistency_log_path(project_root),
                |path| project_root.join(path),
            ),
        ),
    }
}

fn write_text(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "oids {}", report.oids)?;
    writeln!(w, "chunks {}", report.chunks_total)?;
    writeln!(w, "committed {}", report.chunks_committed)?;
    writeln!(w, "failed {}", report.chunks_failed)?;
    writeln!(w, "skipped {}", report.chunks_skipped)?;
    writeln!(w, "rebuilt {}", report.entities_rebuilt)?;
    writeln!(w, "removed {}", report.versions_removed)?;
    writeln!(w, "inserted {}", report.versions_inserted)?;
    writeln!(w, "inconsistencies {}", report.inconsistencies)?;
    if let Some(path) = &report.inconsistency_log {
        writeln!(w, "inconsistency_log {}", path.display())?;
    }
    for failure in &report.failures {
        writeln!(w, "failure {failure}")?;
    }
    Ok(())
}

fn write_pretty(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Reconstruction")?;
    pretty_kv(w, "Entities", report.oids.to_string())?;
    pretty_kv(
        w,
        "Chunks",
        format!(
            "{} total, {} committed, {} failed, {} skipped",
            report.chunks_total,
            report.chunks_committed,
            report.chunks_failed,
            report.chunks_skipped
        ),
    )?;
    pretty_kv(w, "Rebuilt", report.entities_rebuilt.to_string())?;
    pretty_kv(
        w,
        "Versions",
        format!(
            "{} removed, {} inserted",
            report.versions_removed, report.versions_inserted
        ),
    )?;
    pretty_kv(w, "Inconsistencies", report.inconsistencies.to_string())?;
    if let Some(path) = &report.inconsistency_log {
        pretty_kv(w, "Inconsistency log", path.display().to_string())?;
    }
    if !report.failures.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Failed chunks")?;
        for failure in &report.failures {
            writeln!(w, "✗ {failure}")?;
        }
    }
    Ok(())
}

fn render_report(report: &RunReport, output: OutputMode) -> Result<()> {
    render_mode(output, report, write_text, write_pretty)
}

/// Execute `tl reconstruct`.
///
/// The run report is printed even when chunks fail; the command then exits
/// with the chunk failure so scripts see a non-zero status.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the run lock is held,
/// the options are invalid, or any chunk fails.
pub fn run_reconstruct(
    args: &ReconstructArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let store = super::open_store(project_root, config)?;
    let options = build_options(args, config, project_root);
    let _lock = RunLock::for_store(store.path(), DEFAULT_LOCK_TIMEOUT)?;

    match reconstruct(&store, &options) {
        Ok(report) => render_report(&report, output),
        Err(error @ ReconstructError::ChunksFailed { .. }) => {
            if let Some(report) = error.report() {
                render_report(report, output)?;
            }
            Err(error.into())
        }
        Err(error) => Err(error.into()),
    }
}
