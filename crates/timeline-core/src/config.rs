use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::orchestrator::{DEFAULT_CHUNK_SIZE, default_max_workers};

/// Directory holding a project's config, database and logs.
pub const PROJECT_DIR: &str = ".timeline";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub reconstruct: ReconstructConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Relative paths resolve against the project root.
    #[serde(default = "default_inconsistency_log")]
    pub inconsistency_log: PathBuf,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_workers: None,
            inconsistency_log: default_inconsistency_log(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Relative paths resolve against the project root.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Version field holding the entity's creation instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_field: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            creation_field: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

impl EffectiveConfig {
    /// Worker count: project file, then user file, then available parallelism.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.project
            .reconstruct
            .max_workers
            .or(self.user.max_workers)
            .unwrap_or_else(default_max_workers)
    }

    #[must_use]
    pub fn store_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.project.store.path)
    }

    #[must_use]
    pub fn inconsistency_log_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.project.reconstruct.inconsistency_log)
    }
}

/// Path of the project config file under `project_root`.
#[must_use]
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR).join("config.toml")
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("timeline/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Render the default project config, written by `tl init`.
pub fn default_project_toml() -> Result<String> {
    toml::to_string_pretty(&ProjectConfig::default()).context("Failed to render default config")
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        project,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_inconsistency_log() -> PathBuf {
    Path::new(PROJECT_DIR).join("activity_inconsistencies.jsonl")
}

fn default_store_path() -> PathBuf {
    Path::new(PROJECT_DIR).join("timeline.sqlite3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert_eq!(cfg.reconstruct.chunk_size, 1000);
        assert_eq!(cfg.reconstruct.max_workers, None);
        assert_eq!(
            cfg.reconstruct.inconsistency_log,
            PathBuf::from(".timeline/activity_inconsistencies.jsonl")
        );
        assert_eq!(cfg.store.path, PathBuf::from(".timeline/timeline.sqlite3"));
        assert_eq!(cfg.store.creation_field, None);
    }

    #[test]
    fn partial_project_config_keeps_other_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(PROJECT_DIR)).expect("create dir");
        std::fs::write(
            project_config_path(root.path()),
            "[reconstruct]\nchunk_size = 25\n\n[store]\ncreation_field = \"created_at\"\n",
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("load");
        assert_eq!(cfg.reconstruct.chunk_size, 25);
        assert_eq!(cfg.store.creation_field.as_deref(), Some("created_at"));
        assert_eq!(cfg.store.path, PathBuf::from(".timeline/timeline.sqlite3"));
    }

    #[test]
    fn malformed_project_config_names_the_file() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(PROJECT_DIR)).expect("create dir");
        std::fs::write(project_config_path(root.path()), "[reconstruct\n").expect("write");

        let err = load_project_config(root.path()).expect_err("parse must fail");
        assert!(format!("{err}").contains("config.toml"));
    }

    #[test]
    fn default_toml_parses_back_to_defaults() {
        let rendered = default_project_toml().expect("render");
        let parsed: ProjectConfig = toml::from_str(&rendered).expect("parse");
        assert_eq!(parsed, ProjectConfig::default());
    }

    #[test]
    fn project_workers_override_user_workers() {
        let mut cfg = EffectiveConfig {
            project: ProjectConfig::default(),
            user: UserConfig {
                output: None,
                max_workers: Some(3),
            },
            resolved_output: "text".to_string(),
        };
        assert_eq!(cfg.max_workers(), 3);

        cfg.project.reconstruct.max_workers = Some(7);
        assert_eq!(cfg.max_workers(), 7);
    }

    #[test]
    fn relative_paths_resolve_against_project_root() {
        let cfg = EffectiveConfig {
            project: ProjectConfig::default(),
            user: UserConfig::default(),
            resolved_output: "text".to_string(),
        };
        let root = Path::new("/srv/project");
        assert_eq!(
            cfg.store_path(root),
            PathBuf::from("/srv/project/.timeline/timeline.sqlite3")
        );
        assert_eq!(
            cfg.inconsistency_log_path(root),
            PathBuf::from("/srv/project/.timeline/activity_inconsistencies.jsonl")
        );
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        assert_eq!(resolve_output(true, Some("pretty"), Some("text")), "json");
    }

    #[test]
    fn env_format_beats_user_output() {
        assert_eq!(resolve_output(false, Some("json"), Some("plain")), "text");
        assert_eq!(resolve_output(false, Some("human"), Some("bogus")), "pretty");
    }

    #[test]
    fn user_config_parses_output_and_workers() {
        let cfg: UserConfig = toml::from_str("output = \"json\"\nmax_workers = 4\n").expect("parse");
        assert_eq!(cfg.output.as_deref(), Some("json"));
        assert_eq!(cfg.max_workers, Some(4));
    }
}
