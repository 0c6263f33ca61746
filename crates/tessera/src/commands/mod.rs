//! CLI command handlers.

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tessera_config::{LoadedConfig, StoreKind, TesseraConfig};
use tessera_session::{FileStore, SessionManager, SqliteStore, Store};

pub mod config;
pub mod dump;
pub mod run;
pub mod store;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Discovered configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn config(&self) -> &TesseraConfig {
        &self.loaded.config
    }

    /// Open the configured store, if any.
    pub fn open_store(&self) -> Result<Option<Arc<dyn Store>>> {
        let section = self.config().store_section();
        let store: Arc<dyn Store> = match section.kind {
            StoreKind::Disabled => return Ok(None),
            StoreKind::File => Arc::new(
                FileStore::open(&section.directory).with_context(|| {
                    format!("opening file store at {}", section.directory.display())
                })?,
            ),
            StoreKind::Sqlite => {
                let sqlite = self.config().sqlite_config();
                let path = sqlite.path.clone();
                Arc::new(
                    SqliteStore::open(sqlite)
                        .with_context(|| format!("opening sqlite store at {}", path.display()))?,
                )
            }
        };
        Ok(Some(store))
    }

    /// Open the configured store or fail with a hint.
    pub fn require_store(&self) -> Result<Arc<dyn Store>> {
        match self.open_store()? {
            Some(store) => Ok(store),
            None => bail!("no store configured (set [store] kind = \"file\" or \"sqlite\")"),
        }
    }

    /// Build a manager from the configuration, backed by the store if one
    /// is configured. The manager is not started.
    pub fn build_manager(&self, store: Option<Arc<dyn Store>>) -> Result<SessionManager> {
        let config = self.config().manager_config()?;
        let mut builder = SessionManager::builder(config);
        if let Some(store) = store {
            builder = builder.with_store(store);
        }
        Ok(builder.build()?)
    }
}

/// Render epoch milliseconds as UTC wall time.
pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Render a timeout in seconds; negative means never.
pub fn format_interval(seconds: i32) -> String {
    if seconds < 0 {
        "never".to_string()
    } else {
        format!("{}s", seconds)
    }
}
