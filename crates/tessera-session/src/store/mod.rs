//! Durable session stores.
//!
//! A [`Store`] holds sessions that are not in the manager's table: swapped
//! out for memory, or kept across restarts. Two backends are provided:
//!
//! - [`FileStore`]: one `<id>.session` file per session, with per-id locks
//! - [`SqliteStore`]: one row per session and application in a SQLite table

mod file;
mod sqlite;

pub use file::{FileStore, SESSION_FILE_EXT};
pub use sqlite::{SqliteConfig, SqliteStore};

use std::fmt;

use tracing::{debug, error};

use crate::error::Result;
use crate::manager::SessionManager;
use crate::session::Session;

/// Durable backing for sessions.
///
/// Sessions returned by [`load`](Store::load) are detached: the manager
/// adopts them before use.
pub trait Store: Send + Sync + fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Ids in the store. With `expired_only`, backends that can filter
    /// cheaply return only sessions whose idle timeout has passed; others
    /// return every id and let the sweep check each one.
    fn keys(&self, expired_only: bool) -> Result<Vec<String>>;

    /// Number of stored sessions.
    fn size(&self) -> Result<usize>;

    /// Read a session. `None` if absent.
    fn load(&self, id: &str) -> Result<Option<Session>>;

    /// Write a session, replacing any previous copy.
    fn save(&self, session: &Session) -> Result<()>;

    /// Delete a session. Absent ids are not an error.
    fn remove(&self, id: &str) -> Result<()>;

    /// Delete every stored session.
    fn clear(&self) -> Result<()>;

    /// Expire stored sessions that are no longer valid.
    ///
    /// Each candidate is loaded and checked. A record already marked
    /// invalid, or a timed-out session that the manager also holds in
    /// memory, is only discarded from the store; any other timed-out
    /// session is expired through the manager so listeners and statistics
    /// see it. Returns the number of entries removed.
    fn process_expires(&self, manager: &SessionManager) -> usize {
        let keys = match self.keys(true) {
            Ok(keys) => keys,
            Err(e) => {
                error!(store = self.name(), error = %e, "Failed to list stored sessions");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.load(&key) {
                Ok(Some(session)) => {
                    manager.adopt(&session);
                    let valid = session.is_valid_internal();
                    if valid && !session.idle_timed_out() {
                        continue;
                    }
                    if !valid || manager.is_loaded(&key) {
                        session.recycle();
                    } else {
                        session.expire(true);
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(store = self.name(), session_id = %key, error = %e, "Failed to load stored session, removing it");
                }
            }

            match self.remove(&key) {
                Ok(()) => removed += 1,
                Err(e) => {
                    error!(store = self.name(), session_id = %key, error = %e, "Failed to remove expired session");
                }
            }
        }

        if removed > 0 {
            debug!(store = self.name(), removed, "Expired stored sessions");
        }
        removed
    }
}
