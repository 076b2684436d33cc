//! Configuration loader with tier-based merging.
//!
//! Loads settings from multiple tiers and merges them field-by-field.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::merge::deep_merge_all;
use super::types::Settings;
use crate::error::{Error, Result};

/// File name looked up in the project directory.
pub const PROJECT_FILE: &str = "consulator.yaml";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults (lowest priority)
    Defaults = 0,
    /// `./consulator.yaml`
    Project = 1,
    /// `<config dir>/consulator/config.yaml`
    User = 2,
    /// `CONSULATOR_*` environment variables
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Files consulted for each tier.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub project_file: Option<PathBuf>,
    pub user_file: Option<PathBuf>,
    /// Replaces the project and user files when set.
    pub explicit_file: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover the project and user files, honouring `CONSULATOR_CONFIG_PATH`.
    pub fn discover() -> Self {
        let project_dir = std::env::var("CONSULATOR_PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let project_file = Some(project_dir.join(PROJECT_FILE));

        let user_file = std::env::var("CONSULATOR_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("consulator")))
            .map(|dir| dir.join("config.yaml"));

        let explicit_file = std::env::var("CONSULATOR_CONFIG_PATH").ok().map(PathBuf::from);

        Self {
            project_file,
            user_file,
            explicit_file,
        }
    }

    pub fn with_files(project_file: Option<PathBuf>, user_file: Option<PathBuf>) -> Self {
        Self {
            project_file,
            user_file,
            explicit_file: None,
        }
    }

    /// Use a single explicit file instead of the discovered ones.
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }
}

/// Configuration loader that handles tier-based merging.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    settings: Settings,
    /// Files that contributed, lowest priority first.
    loaded_files: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        Self::load_with(paths, |name| std::env::var(name).ok())
    }

    /// Load with an injectable environment lookup.
    pub fn load_with(paths: ConfigPaths, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut tiers: Vec<Value> = vec![serde_json::to_value(Settings::default())?];
        let mut loaded_files = Vec::new();

        if let Some(ref explicit) = paths.explicit_file {
            let value = read_yaml(explicit)?;
            tiers.push(value);
            loaded_files.push(explicit.clone());
        } else {
            for (tier, file) in [
                (ConfigTier::Project, &paths.project_file),
                (ConfigTier::User, &paths.user_file),
            ] {
                let Some(file) = file else { continue };
                if !file.exists() {
                    continue;
                }
                match read_yaml(file) {
                    Ok(value) => {
                        debug!(tier = %tier, path = %file.display(), "Loaded config file");
                        tiers.push(value);
                        loaded_files.push(file.clone());
                    }
                    Err(e) => warn!(tier = %tier, error = %e, "Ignoring unreadable config file"),
                }
            }
        }

        tiers.push(env_overrides(&env));

        let merged = deep_merge_all(tiers);
        let settings: Settings = serde_json::from_value(merged).map_err(|e| {
            let at = loaded_files
                .last()
                .cloned()
                .unwrap_or_else(|| PathBuf::from(ConfigTier::Environment.to_string()));
            Error::config(at, e)
        })?;

        Ok(Self {
            settings,
            loaded_files,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }

    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.loaded_files
    }
}

fn read_yaml(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::access(path, e))?;
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str::<Value>(&content).map_err(|e| Error::config(path, e))
}

/// Environment tier as a partial settings object.
fn env_overrides(env: &impl Fn(&str) -> Option<String>) -> Value {
    let mut overrides = serde_json::Map::new();

    if let Some(prefix) = env("CONSULATOR_PREFIX") {
        overrides.insert("prefix".into(), Value::String(prefix));
    }
    if let Some(glue) = env("CONSULATOR_GLUE") {
        overrides.insert("glue".into(), Value::String(glue));
    }
    if let Some(raw) = env("CONSULATOR_CONCURRENCY") {
        match raw.trim().parse::<usize>() {
            Ok(n) => {
                overrides.insert("concurrency".into(), Value::from(n));
            }
            Err(_) => warn!(value = %raw, "Ignoring non-numeric CONSULATOR_CONCURRENCY"),
        }
    }

    Value::Object(overrides)
}
