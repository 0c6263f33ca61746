//! Manager, id generator and persistence settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::idgen::EntropySource;

/// Default idle timeout in seconds (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL: i32 = 1800;

/// Default number of background ticks between expiration sweeps.
pub const DEFAULT_PROCESS_EXPIRES_FREQUENCY: u32 = 6;

/// Default session id length in bytes.
pub const DEFAULT_SESSION_ID_LENGTH: usize = 16;

/// Default bound on idle digest instances kept for reuse.
pub const DEFAULT_DIGEST_POOL_SIZE: usize = 16;

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Name used in logs and as the default database application name.
    pub name: String,

    /// Limit on concurrently active sessions. `None` means unlimited.
    pub max_active_sessions: Option<usize>,

    /// Idle timeout given to new sessions, in seconds. Negative never expires.
    pub max_inactive_interval: i32,

    /// Run the expiration sweep on every Nth background tick.
    pub process_expires_frequency: u32,

    /// Count in-flight requests and never expire a session that has any.
    pub strict_activity: bool,

    /// Measure idle time from the start of the previous request rather
    /// than the end.
    pub last_access_at_start: bool,

    /// Bulk persistence file written on stop and read on start.
    /// Ignored when a store is configured. `None` disables it.
    pub pathname: Option<PathBuf>,

    /// Id generator settings.
    pub id_generator: IdGeneratorConfig,

    /// Store swap policy (used only with a store).
    pub persistence: PersistenceConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "tessera".to_string(),
            max_active_sessions: None,
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            process_expires_frequency: DEFAULT_PROCESS_EXPIRES_FREQUENCY,
            strict_activity: false,
            last_access_at_start: false,
            pathname: None,
            id_generator: IdGeneratorConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cap the number of active sessions.
    pub fn with_max_active_sessions(mut self, max: usize) -> Self {
        self.max_active_sessions = Some(max);
        self
    }

    /// Remove the active-session cap.
    pub fn without_max_active_sessions(mut self) -> Self {
        self.max_active_sessions = None;
        self
    }

    /// Set the idle timeout for new sessions, in seconds.
    pub fn with_max_inactive_interval(mut self, seconds: i32) -> Self {
        self.max_inactive_interval = seconds;
        self
    }

    /// Set how many ticks pass between sweeps. Zero is treated as one.
    pub fn with_process_expires_frequency(mut self, frequency: u32) -> Self {
        self.process_expires_frequency = frequency;
        self
    }

    pub fn with_strict_activity(mut self, enabled: bool) -> Self {
        self.strict_activity = enabled;
        self
    }

    pub fn with_last_access_at_start(mut self, enabled: bool) -> Self {
        self.last_access_at_start = enabled;
        self
    }

    /// Set the bulk persistence file.
    pub fn with_pathname(mut self, path: impl Into<PathBuf>) -> Self {
        self.pathname = Some(path.into());
        self
    }

    /// Disable bulk persistence.
    pub fn without_pathname(mut self) -> Self {
        self.pathname = None;
        self
    }

    pub fn with_id_generator(mut self, config: IdGeneratorConfig) -> Self {
        self.id_generator = config;
        self
    }

    pub fn with_persistence(mut self, config: PersistenceConfig) -> Self {
        self.persistence = config;
        self
    }
}

/// Configuration for [`SessionIdGenerator`](crate::SessionIdGenerator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdGeneratorConfig {
    /// Number of random bytes per id; the hex id is twice as long.
    pub session_id_length: usize,

    /// Suffix appended as `.<route>`, typically a cluster node name.
    pub route: Option<String>,

    /// Digest algorithm name, e.g. `SHA-256`.
    pub algorithm: String,

    /// Algorithm used when `algorithm` is not supported.
    pub fallback_algorithm: String,

    pub entropy: EntropySource,

    /// Fixed seed for the pseudo-random generator. Forces seeded entropy.
    pub seed: Option<u64>,

    /// Maximum idle digest instances kept for reuse.
    pub pool_size: usize,
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self {
            session_id_length: DEFAULT_SESSION_ID_LENGTH,
            route: None,
            algorithm: "SHA-256".to_string(),
            fallback_algorithm: "SHA-256".to_string(),
            entropy: EntropySource::Os,
            seed: None,
            pool_size: DEFAULT_DIGEST_POOL_SIZE,
        }
    }
}

impl IdGeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id_length(mut self, bytes: usize) -> Self {
        self.session_id_length = bytes;
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm = name.into();
        self
    }

    pub fn with_fallback_algorithm(mut self, name: impl Into<String>) -> Self {
        self.fallback_algorithm = name.into();
        self
    }

    pub fn with_entropy(mut self, entropy: EntropySource) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }
}

/// Swap policy for a manager backed by a [`Store`](crate::Store).
///
/// Idle thresholds are in seconds; a negative value disables the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Swap every session out on stop and back in on start.
    /// When false, sessions are expired on stop and the store is cleared
    /// on start.
    pub save_on_restart: bool,

    /// Swap out sessions idle for at least this long.
    pub max_idle_swap: i32,

    /// When over the active limit, only swap out sessions idle at least
    /// this long.
    pub min_idle_swap: i32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_on_restart: true,
            max_idle_swap: -1,
            min_idle_swap: -1,
        }
    }
}

impl PersistenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_on_restart(mut self, enabled: bool) -> Self {
        self.save_on_restart = enabled;
        self
    }

    pub fn with_max_idle_swap(mut self, seconds: i32) -> Self {
        self.max_idle_swap = seconds;
        self
    }

    pub fn with_min_idle_swap(mut self, seconds: i32) -> Self {
        self.min_idle_swap = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_inactive_interval, 1800);
        assert_eq!(config.process_expires_frequency, 6);
        assert!(config.max_active_sessions.is_none());
        assert!(config.pathname.is_none());
        assert_eq!(config.id_generator.session_id_length, 16);
        assert!(config.persistence.save_on_restart);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ManagerConfig::new()
            .with_max_active_sessions(2)
            .with_max_inactive_interval(-1)
            .with_strict_activity(true)
            .with_pathname("SESSIONS.ser")
            .with_persistence(PersistenceConfig::new().with_max_idle_swap(60));

        assert_eq!(config.max_active_sessions, Some(2));
        assert_eq!(config.max_inactive_interval, -1);
        assert!(config.strict_activity);
        assert_eq!(config.pathname, Some(PathBuf::from("SESSIONS.ser")));
        assert_eq!(config.persistence.max_idle_swap, 60);
    }

    #[test]
    fn test_without_limits() {
        let config = ManagerConfig::new()
            .with_max_active_sessions(5)
            .without_max_active_sessions()
            .with_pathname("x")
            .without_pathname();
        assert!(config.max_active_sessions.is_none());
        assert!(config.pathname.is_none());
    }
}
