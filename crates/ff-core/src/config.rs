//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! settings for the worker loop and parameter sources.
//! Every section defaults sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service definition to load when none is given on the command line.
    pub service_file: Option<PathBuf>,
    /// Directory that `secret` parameter sources are read from.
    pub secrets_dir: PathBuf,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_file: None,
            secrets_dir: PathBuf::from("/run/secrets"),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.worker.interval_secs == 0 {
            warnings.push("worker.interval_secs is 0; the worker will run back-to-back".into());
        }

        if let Some(ref path) = self.service_file {
            if !path.exists() {
                warnings.push(format!("service_file {} does not exist", path.display()));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// How a pipeline run drives its stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Every stage runs as its own worker, overlapping with its neighbours.
    #[default]
    Concurrent,
    /// Stages run one after another over the whole batch.
    Sequential,
}

/// Long-running worker loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    pub mode: RunMode,
}

fn default_interval() -> u64 {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            mode: RunMode::default(),
        }
    }
}
