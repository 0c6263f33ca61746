//! In-memory session table with durable stores and idle expiration.
//!
//! This crate provides the session layer of Tessera:
//! - A concurrent session table with capacity limits and statistics
//! - Digest-based session id generation with duplicate detection
//! - Lazy idle expiration on lookup plus a periodic sweep
//! - File and SQLite stores for swapping sessions out of memory
//! - Bulk save and restore of all sessions across restarts
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_session::{ManagerConfig, SessionManager};
//!
//! let config = ManagerConfig::default()
//!     .with_max_active_sessions(1000)
//!     .with_max_inactive_interval(1800);
//!
//! let manager = SessionManager::new(config)?;
//! manager.start()?;
//!
//! let session = manager.create_session(None)?;
//! session.set_attribute("user", "ann")?;
//!
//! // Called periodically by the host.
//! manager.background_process();
//! ```

mod attribute;
mod clock;
mod codec;
mod config;
mod error;
mod idgen;
mod listener;
mod lock;
mod manager;
mod session;
mod stats;
mod store;
mod table;

pub use attribute::{AttributeValue, BindingEvent, SessionObject};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{BinaryCodec, BulkReader, MAX_VALUE_DEPTH, SessionCodec, write_bulk};
pub use config::{
    DEFAULT_DIGEST_POOL_SIZE, DEFAULT_MAX_INACTIVE_INTERVAL, DEFAULT_PROCESS_EXPIRES_FREQUENCY,
    DEFAULT_SESSION_ID_LENGTH, IdGeneratorConfig, ManagerConfig, PersistenceConfig,
};
pub use error::{Error, Result};
pub use idgen::{DigestAlgorithm, DigestPool, EntropySource, IdGenerator, SessionIdGenerator};
pub use listener::{SessionEvent, SessionListener};
pub use lock::{KeyLockTable, KeyReadGuard, KeyWriteGuard};
pub use manager::{LifecycleState, ManagerBuilder, SessionManager};
pub use session::{Session, SessionData, SessionSummary};
pub use stats::{SessionStats, StatsSnapshot, TIMING_STATS_CACHE_SIZE};
pub use store::{FileStore, SESSION_FILE_EXT, SqliteConfig, SqliteStore, Store};
pub use table::{MemoryTable, SessionTable};
