//! Configuration system for the KMP workflow engine.
//!
//! Provides TOML-based configuration with:
//! - Database location and connection tuning (`[database]`)
//! - Engine traversal limits (`[engine]`)
//! - Deadline sweep scheduling (`[sweep]`)
//! - Log output (`[logging]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    load_config, load_config_file, load_config_with_options, save_config, xdg_config_dir,
    xdg_config_path, ConfigSource, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use types::*;
