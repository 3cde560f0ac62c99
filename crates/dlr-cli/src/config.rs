use anyhow::{bail, Context, Result};
use dlr_recovery::{JobRegistry, RecoverySettings, RecoveryThresholds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "DLR_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub database_path: PathBuf,
    pub listener_failure_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub thresholds: RecoveryThresholds,
    pub chunk_sizes: BTreeMap<String, usize>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("dlr.sqlite3"),
            listener_failure_dir: PathBuf::from("listener-failure-storage"),
            lock_dir: std::env::temp_dir().join("dlr-locks"),
            log_level: None,
            log_dir: None,
            thresholds: RecoveryThresholds::default(),
            chunk_sizes: BTreeMap::new(),
        }
    }
}

impl RecoveryConfig {
    pub fn settings(&self) -> RecoverySettings {
        let mut settings =
            RecoverySettings::new(self.listener_failure_dir.clone(), self.lock_dir.clone());
        settings.thresholds = self.thresholds.clone();
        settings.chunk_sizes = self.chunk_sizes.clone();
        settings
    }

    fn validate(&self) -> Result<()> {
        let registry = JobRegistry::standard();
        for (job, size) in &self.chunk_sizes {
            if registry.get(job).is_none() {
                bail!("chunk_sizes names unknown job '{job}'");
            }
            if *size == 0 {
                bail!("chunk_sizes.{job} must be at least 1");
            }
        }
        Ok(())
    }
}

/// Where the config comes from, in order: the `--config` flag, `$DLR_CONFIG`,
/// then `<config_dir>/dlr/config.toml`. An explicit path must exist.
pub fn load(explicit: Option<&Path>) -> Result<RecoveryConfig> {
    if let Some(path) = explicit {
        return read(path);
    }
    if let Ok(value) = std::env::var(CONFIG_ENV) {
        if !value.trim().is_empty() {
            return read(Path::new(value.trim()));
        }
    }
    match default_path() {
        Some(path) if path.exists() => read(&path),
        _ => Ok(RecoveryConfig::default()),
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dlr").join("config.toml"))
}

fn read(path: &Path) -> Result<RecoveryConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: RecoveryConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
