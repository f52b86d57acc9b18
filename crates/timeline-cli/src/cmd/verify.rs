use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write as _;
use timeline_core::config::EffectiveConfig;
use timeline_core::history::{PartitionViolation, check_partition};
use timeline_core::model::{Oid, VersionDocument};
use timeline_core::store::Store;

use crate::output::{OutputMode, pretty_kv, render_mode};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Only check these entities (repeatable). Defaults to every entity.
    #[arg(long = "oid", value_name = "ID")]
    pub oids: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct VerifyReport {
    checked: usize,
    violations: Vec<String>,
    #[serde(skip)]
    first: Option<PartitionViolation>,
}

impl VerifyReport {
    fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check every entity's chain separately so one bad entity does not hide others.
fn check_versions(versions: Vec<VersionDocument>) -> VerifyReport {
    let mut by_oid: BTreeMap<Oid, Vec<VersionDocument>> = BTreeMap::new();
    for version in versions {
        by_oid.entry(version.oid.clone()).or_default().push(version);
    }

    let mut report = VerifyReport {
        checked: by_oid.len(),
        ..VerifyReport::default()
    };
    for chain in by_oid.values() {
        if let Err(violation) = check_partition(chain) {
            tracing::warn!(%violation, "partition violated");
            report.violations.push(violation.to_string());
            if report.first.is_none() {
                report.first = Some(violation);
            }
        }
    }
    report
}

/// Execute `tl verify`: check that stored versions tile time per entity.
///
/// # Errors
///
/// Returns an error if the project is not initialized, the store cannot be
/// read, or any entity violates the partition invariant.
pub fn run_verify(
    args: &VerifyArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let store = super::open_store(project_root, config)?;
    let oids = if args.oids.is_empty() {
        store.all_oids()?
    } else {
        args.oids.iter().map(|oid| Oid::from(oid.as_str())).collect()
    };
    let report = check_versions(store.get_versions(&oids)?);

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "checked {}", r.checked)?;
            for violation in &r.violations {
                writeln!(w, "FAIL {violation}")?;
            }
            writeln!(w, "verify: {}", if r.is_ok() { "success" } else { "failed" })
        },
        |r, w| {
            pretty_kv(w, "Entities checked", r.checked.to_string())?;
            for violation in &r.violations {
                writeln!(w, "✗ {violation}")?;
            }
            if r.is_ok() {
                writeln!(w, "✓ every version chain is a partition")
            } else {
                Ok(())
            }
        },
    )?;

    match report.first {
        None => Ok(()),
        Some(first) => Err(anyhow::Error::new(first).context(format!(
            "{} of {} entities have broken version chains",
            report.violations.len(),
            report.checked
        ))),
    }
}
