//! Configuration types for Tessera.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tessera_session::{
    DEFAULT_DIGEST_POOL_SIZE, DEFAULT_MAX_INACTIVE_INTERVAL, DEFAULT_PROCESS_EXPIRES_FREQUENCY,
    DEFAULT_SESSION_ID_LENGTH, DigestAlgorithm, EntropySource, IdGeneratorConfig, ManagerConfig,
    PersistenceConfig, SqliteConfig,
};

use crate::error::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Root Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Every section is optional. A missing section takes its defaults, and
/// when layers are merged a section present in a later layer replaces the
/// earlier one as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// Session manager settings.
    pub manager: Option<ManagerSection>,

    /// Session id generation.
    pub id_generator: Option<IdGeneratorSection>,

    /// Backing store for the swapping manager.
    pub store: Option<StoreSection>,

    /// Swap policy, used only with a store.
    pub persistence: Option<PersistenceSection>,

    /// Log file settings.
    pub logging: Option<LoggingSection>,
}

impl TesseraConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: TesseraConfig) {
        if other.manager.is_some() {
            self.manager = other.manager;
        }
        if other.id_generator.is_some() {
            self.id_generator = other.id_generator;
        }
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.persistence.is_some() {
            self.persistence = other.persistence;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Copy with every section filled in, for display.
    pub fn effective(&self) -> TesseraConfig {
        TesseraConfig {
            manager: Some(self.manager_section()),
            id_generator: Some(self.id_generator_section()),
            store: Some(self.store_section()),
            persistence: Some(self.persistence_section()),
            logging: Some(self.logging_section()),
        }
    }

    pub fn manager_section(&self) -> ManagerSection {
        self.manager.clone().unwrap_or_default()
    }

    pub fn id_generator_section(&self) -> IdGeneratorSection {
        self.id_generator.clone().unwrap_or_default()
    }

    pub fn store_section(&self) -> StoreSection {
        self.store.clone().unwrap_or_default()
    }

    pub fn persistence_section(&self) -> PersistenceSection {
        self.persistence.clone().unwrap_or_default()
    }

    pub fn logging_section(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Build the session manager configuration, validating as it goes.
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let manager = self.manager_section();
        let ids = self.id_generator_section();
        let persistence = self.persistence_section();

        let max_active_sessions = match manager.max_active_sessions {
            n if n < -1 => {
                return Err(ConfigError::invalid(
                    "manager.max_active_sessions",
                    format!("{n} is below -1 (use -1 for unlimited)"),
                ));
            }
            -1 => None,
            n => Some(usize::try_from(n).map_err(|_| {
                ConfigError::invalid("manager.max_active_sessions", format!("{n} is too large"))
            })?),
        };

        if manager.session_id_length == 0 {
            return Err(ConfigError::invalid(
                "manager.session_id_length",
                "must be at least one byte",
            ));
        }

        if DigestAlgorithm::from_name(&ids.algorithm).is_none()
            && DigestAlgorithm::from_name(&ids.fallback_algorithm).is_none()
        {
            return Err(ConfigError::invalid(
                "id_generator.algorithm",
                format!(
                    "neither {:?} nor fallback {:?} is a supported digest",
                    ids.algorithm, ids.fallback_algorithm
                ),
            ));
        }

        let mut id_generator = IdGeneratorConfig::new()
            .with_session_id_length(manager.session_id_length)
            .with_algorithm(ids.algorithm)
            .with_fallback_algorithm(ids.fallback_algorithm)
            .with_entropy(ids.entropy)
            .with_pool_size(ids.pool_size);
        if let Some(route) = manager.route.filter(|r| !r.is_empty()) {
            id_generator = id_generator.with_route(route);
        }
        if let Some(seed) = ids.seed {
            id_generator = id_generator.with_seed(seed);
        }

        let mut config = ManagerConfig::new()
            .with_name(manager.name)
            .with_max_inactive_interval(manager.max_inactive_interval)
            .with_process_expires_frequency(manager.process_expires_frequency)
            .with_strict_activity(manager.strict_activity)
            .with_last_access_at_start(manager.last_access_at_start)
            .with_id_generator(id_generator)
            .with_persistence(
                PersistenceConfig::new()
                    .with_save_on_restart(persistence.save_on_restart)
                    .with_max_idle_swap(persistence.max_idle_swap)
                    .with_min_idle_swap(persistence.min_idle_swap),
            );
        if let Some(max) = max_active_sessions {
            config = config.with_max_active_sessions(max);
        }
        if !manager.pathname.as_os_str().is_empty() {
            config = config.with_pathname(manager.pathname);
        }
        Ok(config)
    }

    /// Database layout for a `sqlite` store.
    ///
    /// The application name defaults to the manager name.
    pub fn sqlite_config(&self) -> SqliteConfig {
        let store = self.store_section();
        let app_name = store
            .app_name
            .unwrap_or_else(|| self.manager_section().name);
        SqliteConfig::new(store.path)
            .with_app_name(app_name)
            .with_table(store.table)
            .with_columns(
                store.id_column,
                store.app_column,
                store.data_column,
                store.valid_column,
                store.max_inactive_column,
                store.last_access_column,
            )
            .with_create_table(store.create_table)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session manager settings.
///
/// ```toml
/// [manager]
/// max_active_sessions = 1000
/// max_inactive_interval = 1800
/// route = "node1"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    /// Manager name, used in logs and as the default database app name.
    pub name: String,
    /// Limit on active sessions; -1 means unlimited.
    pub max_active_sessions: i64,
    /// Idle timeout for new sessions in seconds; negative never expires.
    pub max_inactive_interval: i32,
    /// Sweep on every Nth background tick.
    pub process_expires_frequency: u32,
    /// Random bytes per session id.
    pub session_id_length: usize,
    /// Suffix appended to ids as `.<route>`.
    pub route: Option<String>,
    pub strict_activity: bool,
    pub last_access_at_start: bool,
    /// Bulk persistence file; empty disables it.
    pub pathname: PathBuf,
    /// Seconds between background ticks.
    pub background_interval_secs: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            name: "tessera".to_string(),
            max_active_sessions: -1,
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            process_expires_frequency: DEFAULT_PROCESS_EXPIRES_FREQUENCY,
            session_id_length: DEFAULT_SESSION_ID_LENGTH,
            route: None,
            strict_activity: false,
            last_access_at_start: false,
            pathname: PathBuf::from("SESSIONS.ser"),
            background_interval_secs: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Id Generator Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session id generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdGeneratorSection {
    /// Digest algorithm, e.g. `SHA-256`.
    pub algorithm: String,
    /// Used when `algorithm` is not supported.
    pub fallback_algorithm: String,
    pub entropy: EntropySource,
    /// Fixed PRNG seed. Only for tests and demos.
    pub seed: Option<u64>,
    /// Maximum idle digests kept for reuse.
    pub pool_size: usize,
}

impl Default for IdGeneratorSection {
    fn default() -> Self {
        Self {
            algorithm: "SHA-256".to_string(),
            fallback_algorithm: "SHA-256".to_string(),
            entropy: EntropySource::Os,
            seed: None,
            pool_size: DEFAULT_DIGEST_POOL_SIZE,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which store backs the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// No store; sessions live only in memory plus the bulk file.
    #[default]
    #[serde(rename = "none")]
    Disabled,
    /// One file per session.
    File,
    /// One row per session in a SQLite database.
    Sqlite,
}

/// Store settings.
///
/// ```toml
/// [store]
/// kind = "sqlite"
/// path = "sessions.db"
/// table = "web_sessions"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub kind: StoreKind,
    /// Directory for the `file` store.
    pub directory: PathBuf,
    /// Database file for the `sqlite` store.
    pub path: PathBuf,
    /// Application column value; defaults to the manager name.
    pub app_name: Option<String>,
    pub table: String,
    pub id_column: String,
    pub app_column: String,
    pub data_column: String,
    pub valid_column: String,
    pub max_inactive_column: String,
    pub last_access_column: String,
    /// Create the table if missing.
    pub create_table: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        let layout = SqliteConfig::new("sessions.db");
        Self {
            kind: StoreKind::Disabled,
            directory: PathBuf::from("sessions"),
            path: layout.path,
            app_name: None,
            table: layout.table,
            id_column: layout.id_column,
            app_column: layout.app_column,
            data_column: layout.data_column,
            valid_column: layout.valid_column,
            max_inactive_column: layout.max_inactive_column,
            last_access_column: layout.last_access_column,
            create_table: layout.create_table,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Swap policy. Idle thresholds are seconds; -1 disables a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub save_on_restart: bool,
    pub max_idle_swap: i32,
    pub min_idle_swap: i32,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        let policy = PersistenceConfig::default();
        Self {
            save_on_restart: policy.save_on_restart,
            max_idle_swap: policy.max_idle_swap,
            min_idle_swap: policy.min_idle_swap,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Log file settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for the daily JSON log. Defaults to `logs` under the
    /// user config dir.
    pub directory: Option<PathBuf>,
    /// Filter for the file layer, in `EnvFilter` syntax.
    pub file_filter: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TesseraConfig::from_toml("").unwrap();
        assert_eq!(config, TesseraConfig::default());

        let manager = config.manager_config().unwrap();
        assert_eq!(manager.max_inactive_interval, 1800);
        assert!(manager.max_active_sessions.is_none());
        assert_eq!(manager.pathname, Some(PathBuf::from("SESSIONS.ser")));
        assert_eq!(config.store_section().kind, StoreKind::Disabled);
    }

    #[test]
    fn test_parse_full_config() {
        let config = TesseraConfig::from_toml(
            r#"
[manager]
max_active_sessions = 50
max_inactive_interval = 60
route = "node1"
strict_activity = true
pathname = ""

[id_generator]
algorithm = "SHA-512"
entropy = "seeded"
seed = 7

[store]
kind = "sqlite"
path = "/tmp/s.db"
table = "web_sessions"

[persistence]
save_on_restart = false
max_idle_swap = 120
"#,
        )
        .unwrap();

        let manager = config.manager_config().unwrap();
        assert_eq!(manager.max_active_sessions, Some(50));
        assert_eq!(manager.max_inactive_interval, 60);
        assert!(manager.strict_activity);
        assert!(manager.pathname.is_none());
        assert_eq!(manager.id_generator.route.as_deref(), Some("node1"));
        assert_eq!(manager.id_generator.algorithm, "SHA-512");
        assert_eq!(manager.id_generator.entropy, EntropySource::Seeded);
        assert_eq!(manager.id_generator.seed, Some(7));
        assert!(!manager.persistence.save_on_restart);
        assert_eq!(manager.persistence.max_idle_swap, 120);
        assert_eq!(manager.persistence.min_idle_swap, -1);

        let sqlite = config.sqlite_config();
        assert_eq!(sqlite.path, PathBuf::from("/tmp/s.db"));
        assert_eq!(sqlite.table, "web_sessions");
        assert_eq!(sqlite.app_name, "tessera");
        assert_eq!(sqlite.id_column, "session_id");
    }

    #[test]
    fn test_sqlite_app_name_override() {
        let config = TesseraConfig::from_toml(
            r#"
[manager]
name = "shop"

[store]
kind = "sqlite"
"#,
        )
        .unwrap();
        assert_eq!(config.sqlite_config().app_name, "shop");

        let config = TesseraConfig::from_toml("[store]\napp_name = \"billing\"").unwrap();
        assert_eq!(config.sqlite_config().app_name, "billing");
    }

    #[test]
    fn test_invalid_max_active() {
        let config = TesseraConfig::from_toml("[manager]\nmax_active_sessions = -5").unwrap();
        let err = config.manager_config().unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref field, .. } if field == "manager.max_active_sessions")
        );
    }

    #[test]
    fn test_zero_id_length_rejected() {
        let config = TesseraConfig::from_toml("[manager]\nsession_id_length = 0").unwrap();
        assert!(matches!(
            config.manager_config(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_algorithm_with_good_fallback() {
        let config = TesseraConfig::from_toml("[id_generator]\nalgorithm = \"MD5\"").unwrap();
        assert!(config.manager_config().is_ok());

        let config = TesseraConfig::from_toml(
            "[id_generator]\nalgorithm = \"MD5\"\nfallback_algorithm = \"CRC32\"",
        )
        .unwrap();
        assert!(matches!(
            config.manager_config(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_store_kind_fails_to_parse() {
        let err = TesseraConfig::from_toml("[store]\nkind = \"redis\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_merge_replaces_whole_sections() {
        let mut base = TesseraConfig::from_toml(
            r#"
[manager]
max_inactive_interval = 60
route = "a"

[store]
kind = "file"
"#,
        )
        .unwrap();
        let overlay = TesseraConfig::from_toml("[manager]\nmax_inactive_interval = 90").unwrap();
        base.merge(overlay);

        let manager = base.manager_section();
        assert_eq!(manager.max_inactive_interval, 90);
        assert!(manager.route.is_none());
        assert_eq!(base.store_section().kind, StoreKind::File);
    }

    #[test]
    fn test_effective_round_trips_through_toml() {
        let effective = TesseraConfig::new().effective();
        let text = effective.to_toml().unwrap();
        assert!(text.contains("[manager]"));
        assert!(text.contains("kind = \"none\""));
        let parsed = TesseraConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, effective);
    }
}
