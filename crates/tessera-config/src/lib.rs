//! Configuration system for the Tessera session manager.
//!
//! Provides TOML-based configuration with:
//! - `[manager]`, `[id_generator]`, `[store]`, `[persistence]` and
//!   `[logging]` sections, each optional with defaults
//! - Config file layering (user config dir + project-local overrides)
//! - Conversion into [`tessera_session::ManagerConfig`] and
//!   [`tessera_session::SqliteConfig`]

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_FILE_ENV, ConfigSource, LoadedConfig, discover, load_config, load_config_file,
    load_config_with_options, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
