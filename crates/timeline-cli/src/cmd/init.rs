use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use timeline_core::config::{self, PROJECT_DIR};
use timeline_core::store::SqliteStore;

use crate::output::{OutputMode, pretty_kv, render_mode};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.timeline/config.toml` with the defaults.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "*.sqlite3\n*.sqlite3-*\n*.lock\n*.jsonl\n";

#[derive(Debug, Serialize)]
struct InitReport {
    config: PathBuf,
    store: PathBuf,
}

/// Execute `tl init`. Creates the project skeleton:
///
/// ```text
/// .timeline/
///   config.toml        (default project config)
///   timeline.sqlite3   (migrated version store)
///   .gitignore         (database, lock and log files)
/// ```
///
/// # Errors
///
/// Returns an error if `.timeline/config.toml` already exists and `--force`
/// is not set, or if any filesystem or database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project_dir = project_root.join(PROJECT_DIR);
    let config_path = config::project_config_path(project_root);

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use `tl init --force` to reset it.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;
    std::fs::write(&config_path, config::default_project_toml()?)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = project_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    let project = config::load_project_config(project_root)?;
    let store_path = project_root.join(&project.store.path);
    SqliteStore::open(&store_path)
        .with_context(|| format!("Failed to create store {}", store_path.display()))?;

    let report = InitReport {
        config: config_path,
        store: store_path,
    };
    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "config {}", r.config.display())?;
            writeln!(w, "store {}", r.store.display())
        },
        |r, w| {
            writeln!(w, "✓ Initialized {PROJECT_DIR}/")?;
            writeln!(w)?;
            pretty_kv(w, "Config", r.config.display().to_string())?;
            pretty_kv(w, "Store", r.store.display().to_string())?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(
                w,
                "  tl load --versions versions.jsonl --activities activities.jsonl"
            )?;
            writeln!(w, "  tl reconstruct")
        },
    )
}
