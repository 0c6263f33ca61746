//! SQLite-backed store.
//!
//! Every session is one row keyed by session id and application name.
//! Database errors are logged, the connection is dropped and the operation
//! retried once on a fresh connection; if that fails too the operation
//! degrades to an empty result instead of returning an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, error, info, trace};

use super::Store;
use crate::clock::{Clock, SystemClock};
use crate::codec::{BinaryCodec, SessionCodec};
use crate::error::{Error, Result};
use crate::session::Session;

/// Attempts per operation before giving up.
const NUMBER_OF_TRIES: usize = 2;

/// Table and column layout for [`SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database file.
    pub path: PathBuf,
    /// Value of the application column for this store's rows.
    pub app_name: String,
    pub table: String,
    pub id_column: String,
    pub app_column: String,
    pub data_column: String,
    pub valid_column: String,
    pub max_inactive_column: String,
    pub last_access_column: String,
    /// Create the table on open if it does not exist.
    pub create_table: bool,
}

impl SqliteConfig {
    /// Default layout for a database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            app_name: "tessera".to_string(),
            table: "tessera_sessions".to_string(),
            id_column: "session_id".to_string(),
            app_column: "app_name".to_string(),
            data_column: "session_data".to_string(),
            valid_column: "valid_session".to_string(),
            max_inactive_column: "max_inactive".to_string(),
            last_access_column: "last_access".to_string(),
            create_table: true,
        }
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set all six column names: id, app, data, valid, max inactive and
    /// last access.
    pub fn with_columns(
        mut self,
        id: impl Into<String>,
        app: impl Into<String>,
        data: impl Into<String>,
        valid: impl Into<String>,
        max_inactive: impl Into<String>,
        last_access: impl Into<String>,
    ) -> Self {
        self.id_column = id.into();
        self.app_column = app.into();
        self.data_column = data.into();
        self.valid_column = valid.into();
        self.max_inactive_column = max_inactive.into();
        self.last_access_column = last_access.into();
        self
    }

    pub fn with_create_table(mut self, enabled: bool) -> Self {
        self.create_table = enabled;
        self
    }

    /// Reject identifiers that cannot be spliced into SQL safely.
    fn validate(&self) -> Result<()> {
        let identifiers = [
            ("table", &self.table),
            ("id_column", &self.id_column),
            ("app_column", &self.app_column),
            ("data_column", &self.data_column),
            ("valid_column", &self.valid_column),
            ("max_inactive_column", &self.max_inactive_column),
            ("last_access_column", &self.last_access_column),
        ];
        for (field, value) in identifiers {
            if !is_identifier(value) {
                return Err(Error::Config(format!(
                    "{field} {value:?} is not a valid SQL identifier"
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Prepared SQL text for one layout.
#[derive(Debug)]
struct Statements {
    create: String,
    keys: String,
    expired_keys: String,
    count: String,
    load: String,
    delete: String,
    insert: String,
    clear: String,
}

impl Statements {
    fn new(c: &SqliteConfig) -> Self {
        let t = &c.table;
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    {id} TEXT NOT NULL,
                    {app} TEXT NOT NULL,
                    {data} BLOB NOT NULL,
                    {valid} INTEGER NOT NULL,
                    {max} INTEGER NOT NULL,
                    {last} INTEGER NOT NULL,
                    PRIMARY KEY ({id}, {app})
                )",
                id = c.id_column,
                app = c.app_column,
                data = c.data_column,
                valid = c.valid_column,
                max = c.max_inactive_column,
                last = c.last_access_column,
            ),
            keys: format!(
                "SELECT {id} FROM {t} WHERE {app} = ?1",
                id = c.id_column,
                app = c.app_column,
            ),
            expired_keys: format!(
                "SELECT {id} FROM {t} WHERE {app} = ?1 AND ({valid} = 0 OR ({max} >= 0 AND {last} + {max} * 1000 <= ?2))",
                id = c.id_column,
                app = c.app_column,
                valid = c.valid_column,
                max = c.max_inactive_column,
                last = c.last_access_column,
            ),
            count: format!(
                "SELECT COUNT({id}) FROM {t} WHERE {app} = ?1",
                id = c.id_column,
                app = c.app_column,
            ),
            load: format!(
                "SELECT {data} FROM {t} WHERE {id} = ?1 AND {app} = ?2",
                data = c.data_column,
                id = c.id_column,
                app = c.app_column,
            ),
            delete: format!(
                "DELETE FROM {t} WHERE {id} = ?1 AND {app} = ?2",
                id = c.id_column,
                app = c.app_column,
            ),
            insert: format!(
                "INSERT INTO {t} ({id}, {app}, {data}, {valid}, {max}, {last}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                id = c.id_column,
                app = c.app_column,
                data = c.data_column,
                valid = c.valid_column,
                max = c.max_inactive_column,
                last = c.last_access_column,
            ),
            clear: format!("DELETE FROM {t} WHERE {app} = ?1", app = c.app_column),
        }
    }
}

/// Store that keeps sessions in a SQLite table.
pub struct SqliteStore {
    config: SqliteConfig,
    sql: Statements,
    codec: Arc<dyn SessionCodec>,
    clock: Arc<dyn Clock>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open the database and, if configured, create the table.
    ///
    /// Invalid identifiers and a database that cannot be opened are
    /// configuration errors; later failures degrade per operation.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = open_connection(&config.path)?;
        let sql = Statements::new(&config);
        if config.create_table {
            conn.execute(&sql.create, [])?;
        }

        info!("SQLite store opened at {:?}", config.path);
        Ok(Self {
            config,
            sql,
            codec: Arc::new(BinaryCodec),
            clock: Arc::new(SystemClock),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Use `codec` for session payloads.
    pub fn with_codec(mut self, codec: Arc<dyn SessionCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use `clock` to decide which rows are expired.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Run `op` against the connection, reconnecting and retrying on error.
    ///
    /// Returns `None` once every attempt has failed.
    fn with_connection<T>(
        &self,
        what: &str,
        op: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Option<T> {
        let mut guard = self.conn.lock();
        for attempt in 1..=NUMBER_OF_TRIES {
            if guard.is_none() {
                match open_connection(&self.config.path) {
                    Ok(conn) => *guard = Some(conn),
                    Err(e) => {
                        error!(store = "sqlite", op = what, attempt, error = %e, "Failed to open database");
                        continue;
                    }
                }
            }
            let Some(conn) = guard.as_ref() else {
                continue;
            };
            match op(conn) {
                Ok(value) => return Some(value),
                Err(e) => {
                    error!(store = "sqlite", op = what, attempt, error = %e, "SQL error, closing connection");
                    *guard = None;
                }
            }
        }
        None
    }
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )
}

impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn keys(&self, expired_only: bool) -> Result<Vec<String>> {
        let app = &self.config.app_name;
        let now = self.clock.now_millis();
        let keys = self.with_connection("keys", |conn| {
            if expired_only {
                let mut stmt = conn.prepare(&self.sql.expired_keys)?;
                let rows = stmt.query_map(params![app, now], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            } else {
                let mut stmt = conn.prepare(&self.sql.keys)?;
                let rows = stmt.query_map(params![app], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            }
        });
        Ok(keys.unwrap_or_default())
    }

    fn size(&self) -> Result<usize> {
        let count = self.with_connection("size", |conn| {
            conn.query_row(&self.sql.count, params![self.config.app_name], |row| {
                row.get::<_, i64>(0)
            })
        });
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    fn load(&self, id: &str) -> Result<Option<Session>> {
        let bytes = self
            .with_connection("load", |conn| {
                conn.query_row(&self.sql.load, params![id, self.config.app_name], |row| {
                    row.get::<_, Vec<u8>>(0)
                })
                .optional()
            })
            .flatten();

        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let data = self.codec.decode(&bytes)?;
        debug!(session_id = %id, "Loaded session from database");
        Ok(Some(Session::from_data(data)))
    }

    fn save(&self, session: &Session) -> Result<()> {
        let data = session.to_data();
        let bytes = self.codec.encode(&data)?;
        let app = &self.config.app_name;

        // Delete then insert; a concurrent load can briefly miss the row.
        let saved = self.with_connection("save", |conn| {
            conn.execute(&self.sql.delete, params![data.id, app])?;
            conn.execute(
                &self.sql.insert,
                params![
                    data.id,
                    app,
                    bytes,
                    data.is_valid,
                    data.max_inactive_interval,
                    data.last_accessed_time,
                ],
            )
        });
        if saved.is_some() {
            trace!(session_id = %data.id, bytes = bytes.len(), "Saved session to database");
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let removed = self.with_connection("remove", |conn| {
            conn.execute(&self.sql.delete, params![id, self.config.app_name])
        });
        if let Some(rows) = removed {
            debug!(session_id = %id, rows, "Removed session from database");
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.with_connection("clear", |conn| {
            conn.execute(&self.sql.clear, params![self.config.app_name])
        });
        Ok(())
    }
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.config.path)
            .field("table", &self.config.table)
            .field("app_name", &self.config.app_name)
            .field("connected", &self.conn.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::SessionData;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SqliteStore {
        SqliteStore::open(SqliteConfig::new(dir.path().join("db/sessions.db"))).unwrap()
    }

    fn session(id: &str, last_access: i64, interval: i32) -> Session {
        let data = SessionData {
            last_accessed_time: last_access,
            this_accessed_time: last_access,
            ..SessionData::new(id, 0, interval)
        };
        Session::from_data(data.with_attribute("user", json!("ann")))
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.save(&session("A", 10, 60)).unwrap();
        store.save(&session("A", 20, 60)).unwrap();
        assert_eq!(store.size().unwrap(), 1);

        let loaded = store.load("A").unwrap().unwrap();
        assert_eq!(loaded.last_accessed_time(), 20);
        assert_eq!(loaded.to_data(), session("A", 20, 60).to_data());

        store.remove("A").unwrap();
        assert!(store.load("A").unwrap().is_none());
    }

    #[test]
    fn test_expired_keys_use_clock() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(100_000));
        let store = open(&dir).with_clock(clock.clone());

        store.save(&session("OLD", 0, 60)).unwrap();
        store.save(&session("FRESH", 90_000, 60)).unwrap();
        store.save(&session("FOREVER", 0, -1)).unwrap();
        let dead = session("DEAD", 90_000, 60);
        dead.set_valid(false);
        store.save(&dead).unwrap();

        let mut expired = store.keys(true).unwrap();
        expired.sort();
        assert_eq!(expired, vec!["DEAD", "OLD"]);
        let mut all = store.keys(false).unwrap();
        all.sort();
        assert_eq!(all, vec!["DEAD", "FOREVER", "FRESH", "OLD"]);
    }

    #[test]
    fn test_rows_are_scoped_by_app() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.db");
        let a = SqliteStore::open(SqliteConfig::new(&path).with_app_name("a")).unwrap();
        let b = SqliteStore::open(SqliteConfig::new(&path).with_app_name("b")).unwrap();

        a.save(&session("X", 0, 60)).unwrap();
        assert!(b.load("X").unwrap().is_none());
        b.clear().unwrap();
        assert_eq!(a.size().unwrap(), 1);
    }

    #[test]
    fn test_missing_table_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(
            SqliteConfig::new(dir.path().join("empty.db")).with_create_table(false),
        )
        .unwrap();

        assert!(store.keys(false).unwrap().is_empty());
        assert_eq!(store.size().unwrap(), 0);
        assert!(store.load("A").unwrap().is_none());
        store.save(&session("A", 0, 60)).unwrap();
        store.remove("A").unwrap();
    }

    #[test]
    fn test_bad_identifier_is_config_error() {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig::new(dir.path().join("x.db")).with_table("sessions; DROP TABLE x");
        assert!(matches!(SqliteStore::open(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("tessera_sessions"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
