pub mod init;
pub mod load;
pub mod reconstruct;
pub mod show;
pub mod verify;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use timeline_core::ErrorCode;
use timeline_core::config::{EffectiveConfig, PROJECT_DIR};
use timeline_core::store::SqliteStore;

/// The working directory has no `.timeline/` project.
#[derive(Debug)]
pub struct NotInitialized(pub PathBuf);

impl fmt::Display for NotInitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: no {PROJECT_DIR}/ directory in {}",
            ErrorCode::NotInitialized.code(),
            self.0.display()
        )
    }
}

impl std::error::Error for NotInitialized {}

/// Context attached when the project or user config cannot be loaded.
#[derive(Debug)]
pub struct ConfigInvalid;

impl fmt::Display for ConfigInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: invalid configuration", ErrorCode::ConfigParseError.code())
    }
}

/// Open the project's version store, configured from `config`.
///
/// # Errors
///
/// Returns [`NotInitialized`] when `tl init` has not been run, or the store
/// error if the database cannot be opened.
pub fn open_store(project_root: &Path, config: &EffectiveConfig) -> Result<SqliteStore> {
    if !project_root.join(PROJECT_DIR).is_dir() {
        return Err(NotInitialized(project_root.to_path_buf()).into());
    }
    let path = config.store_path(project_root);
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open store {}", path.display()))?;
    Ok(match &config.project.store.creation_field {
        Some(field) => store.with_creation_field(field.clone()),
        None => store,
    })
}
