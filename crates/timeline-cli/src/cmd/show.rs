use anyhow::Result;
use clap::Args;
use std::io::{self, Write};
use std::path::Path;
use timeline_core::config::EffectiveConfig;
use timeline_core::model::{Instant, Oid, VersionDocument};
use timeline_core::store::Store;

use crate::output::{OutputMode, format_instant, pretty_kv, pretty_rule, render_mode};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Entity id.
    pub oid: String,
}

fn interval(version: &VersionDocument) -> String {
    let end = version.end.map_or_else(|| "∞".to_string(), format_instant);
    format!("[{}, {end})", format_instant(version.start))
}

fn write_text(versions: &Vec<VersionDocument>, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "id\tstart\tend\tfields\tcorrupted")?;
    for version in versions {
        let id = version.id.map_or_else(String::new, |id| id.to_string());
        let end = version.end.map_or_else(String::new, |end| end.to_string());
        let fields = serde_json::to_string(&version.fields).map_err(io::Error::other)?;
        let corrupted = serde_json::to_string(&version.corrupted).map_err(io::Error::other)?;
        writeln!(w, "{id}\t{}\t{end}\t{fields}\t{corrupted}", version.start)?;
    }
    Ok(())
}

fn write_pretty(versions: &Vec<VersionDocument>, w: &mut dyn Write) -> io::Result<()> {
    for version in versions {
        let id = version.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        writeln!(w, "#{id}  {}", interval(version))?;
        pretty_rule(w)?;
        for (field, value) in &version.fields {
            let marker = if version.corrupted.contains_key(field) {
                "  ⚠ inconsistent"
            } else {
                ""
            };
            pretty_kv(w, field, format!("{value}{marker}"))?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Execute `tl show OID`: print an entity's versions, oldest first.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the store cannot be
/// read, or the entity has no versions.
pub fn run_show(
    args: &ShowArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let store = super::open_store(project_root, config)?;
    let oid = Oid::from(args.oid.as_str());
    let mut versions = store.get_versions(std::slice::from_ref(&oid))?;
    if versions.is_empty() {
        anyhow::bail!("no versions stored for {oid}");
    }
    versions.sort_by_key(|v| (v.start, v.end.unwrap_or(Instant::MAX)));

    render_mode(output, &versions, write_text, write_pretty)
}
