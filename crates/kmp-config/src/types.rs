//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [database]     # SQLite location and connection tuning
//! [engine]       # traversal limits
//! [sweep]        # deadline sweep schedule
//! [logging]      # log file output
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Application name used for data directory resolution.
const APP_NAME: &str = "kmp";

/// Default database filename inside the data directory.
const DEFAULT_DATABASE_FILE: &str = "workflows.db";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmpConfig {
    /// Workflow database configuration.
    pub database: Option<DatabaseSection>,

    /// Engine traversal configuration.
    pub engine: Option<EngineSection>,

    /// Deadline sweep configuration.
    pub sweep: Option<SweepSection>,

    /// Log output configuration.
    pub logging: Option<LoggingSection>,
}

impl KmpConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: KmpConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: KmpConfig) {
        if other.database.is_some() {
            self.database = other.database;
        }

        if other.engine.is_some() {
            self.engine = other.engine;
        }

        if other.sweep.is_some() {
            self.sweep = other.sweep;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(ref engine) = self.engine
            && engine.max_steps_per_call == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_steps_per_call".into(),
                reason: "must be at least 1".into(),
            });
        }

        if let Some(ref sweep) = self.sweep {
            if sweep.interval_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "sweep.interval_secs".into(),
                    reason: "must be at least 1".into(),
                });
            }
            if sweep.batch_size == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "sweep.batch_size".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }

        Ok(())
    }

    /// Effective database section (defaults when absent).
    pub fn database(&self) -> DatabaseSection {
        self.database.clone().unwrap_or_default()
    }

    /// Effective engine section (defaults when absent).
    pub fn engine(&self) -> EngineSection {
        self.engine.clone().unwrap_or_default()
    }

    /// Effective sweep section (defaults when absent).
    pub fn sweep(&self) -> SweepSection {
        self.sweep.clone().unwrap_or_default()
    }

    /// Effective logging section (defaults when absent).
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow database configuration.
///
/// ```toml
/// [database]
/// path = "/var/lib/kmp/workflows.db"
/// busy_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Path to the SQLite database. Defaults to `<data dir>/kmp/workflows.db`.
    pub path: Option<PathBuf>,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseSection {
    /// Resolve the database path, falling back to the platform data directory.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(ref path) = self.path {
            return path.clone();
        }
        dirs::data_dir()
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DATABASE_FILE)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Engine traversal configuration.
///
/// ```toml
/// [engine]
/// max_steps_per_call = 500
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Ceiling on nodes visited by a single start/resume call.
    pub max_steps_per_call: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps_per_call: 500,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweep
// ─────────────────────────────────────────────────────────────────────────────

/// Deadline sweep schedule.
///
/// ```toml
/// [sweep]
/// enabled = true
/// interval_secs = 60
/// batch_size = 100
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    /// Whether the worker runs the sweep at all.
    pub enabled: bool,
    /// Seconds between sweep runs.
    pub interval_secs: u64,
    /// Maximum rows handled per run.
    pub batch_size: usize,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Log output configuration.
///
/// ```toml
/// [logging]
/// directory = "/var/log/kmp"
/// json = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for the rolling log file. Defaults to `<config dir>/logs`.
    pub directory: Option<PathBuf>,
    /// Write the log file as JSON lines.
    pub json: bool,
    /// Filter directive for the file layer.
    pub file_filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            directory: None,
            json: true,
            file_filter: "kmp=trace,kmp_workflow=trace,kmp_config=debug,info".to_string(),
        }
    }
}
