use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::calculations::SummaryThresholds;
use crate::persistence::LocalPersistenceConfig;
use crate::reconcile::DEFAULT_TOLERANCE;
use crate::remote::ProjectId;

pub const CONFIG_PATH_VAR: &str = "MASSING_TOOL_CONFIG";
pub const THRESHOLDS_VAR: &str = "MASSING_TOOL_THRESHOLDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown threshold preset '{0}' (expected 'standard' or 'lenient')")]
    UnknownPreset(String),
    #[error("invalid value '{value}' for {var}")]
    InvalidVar { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub summary: SummaryThresholds,
    pub local: LocalPersistenceConfig,
    pub reconcile_tolerance: f64,
    /// Run the non-rentable reconciler after every mutation that feeds it.
    pub auto_reconcile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            summary: SummaryThresholds::default(),
            local: LocalPersistenceConfig::default(),
            reconcile_tolerance: DEFAULT_TOLERANCE,
            auto_reconcile: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File named by `MASSING_TOOL_CONFIG` (defaults otherwise), then the
    /// `MASSING_TOOL_THRESHOLDS` preset on top.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var_os(CONFIG_PATH_VAR) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        if let Ok(preset) = env::var(THRESHOLDS_VAR) {
            config.summary = SummaryThresholds::from_preset(&preset)
                .ok_or(ConfigError::UnknownPreset(preset))?;
        }
        Ok(config)
    }

    pub fn with_thresholds(mut self, thresholds: SummaryThresholds) -> Self {
        self.summary = thresholds;
        self
    }

    pub fn without_auto_reconcile(mut self) -> Self {
        self.auto_reconcile = false;
        self
    }
}

pub const DB_PATH_VAR: &str = "MASSING_TOOL_DB";
pub const PROJECT_VAR: &str = "MASSING_TOOL_PROJECT";
pub const HTTP_ADDR_VAR: &str = "MASSING_TOOL_HTTP_ADDR";

/// Process-level settings read by the binaries.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// SQLite file for the record store; in-memory store when unset.
    pub db_path: Option<PathBuf>,
    /// Existing project to open; a fresh one is created when unset.
    pub project_id: Option<ProjectId>,
    pub http_addr: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            project_id: None,
            http_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.db_path = env::var_os(DB_PATH_VAR).map(PathBuf::from);
        if let Ok(raw) = env::var(PROJECT_VAR) {
            let id = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar {
                    var: PROJECT_VAR,
                    value: raw.clone(),
                })?;
            settings.project_id = Some(id);
        }
        if let Ok(addr) = env::var(HTTP_ADDR_VAR) {
            settings.http_addr = addr;
        }
        Ok(settings)
    }

    /// Local mirror file kept next to the database, if there is one.
    pub fn local_store_path(&self) -> Option<PathBuf> {
        self.db_path.as_ref().map(|db| db.with_extension("local.json"))
    }
}
