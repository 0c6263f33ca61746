//! The session manager.
//!
//! [`SessionManager`] composes a [`SessionTable`], an [`IdGenerator`] and an
//! optional [`Store`]. Without a store it persists sessions across restarts
//! through a single bulk file; with one it also swaps idle sessions out of
//! memory and back in on demand.

use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::{BinaryCodec, BulkReader, SessionCodec, write_bulk};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::idgen::{DigestPool, IdGenerator, SessionIdGenerator};
use crate::listener::{SessionEvent, SessionListener};
use crate::lock::KeyLockTable;
use crate::session::{Session, SessionData, SessionOwner, SessionSummary};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::store::Store;
use crate::table::{MemoryTable, SessionTable};

/// Lifecycle state of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Initialized,
    Started,
}

/// Builder for [`SessionManager`].
///
/// Every collaborator has a default: a [`MemoryTable`], a
/// [`SessionIdGenerator`] built from the id generator config, the
/// [`BinaryCodec`], the [`SystemClock`] and no store.
pub struct ManagerBuilder {
    config: ManagerConfig,
    store: Option<Arc<dyn Store>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    table: Option<Arc<dyn SessionTable>>,
    clock: Option<Arc<dyn Clock>>,
    codec: Option<Arc<dyn SessionCodec>>,
    digest_pool: Option<Arc<DigestPool>>,
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl ManagerBuilder {
    fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            store: None,
            id_generator: None,
            table: None,
            clock: None,
            codec: None,
            digest_pool: None,
            listeners: Vec::new(),
        }
    }

    /// Back the manager with a store, enabling swapping.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    pub fn with_table(mut self, table: Arc<dyn SessionTable>) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Codec for the bulk persistence file.
    pub fn with_codec(mut self, codec: Arc<dyn SessionCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Share a digest pool with other generators.
    pub fn with_digest_pool(mut self, pool: Arc<DigestPool>) -> Self {
        self.digest_pool = Some(pool);
        self
    }

    pub fn with_listener(mut self, listener: impl SessionListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Build the manager. Fails if the id generator cannot be configured.
    pub fn build(self) -> Result<SessionManager> {
        let id_generator: Arc<dyn IdGenerator> = match (self.id_generator, self.digest_pool) {
            (Some(generator), _) => generator,
            (None, Some(pool)) => Arc::new(SessionIdGenerator::with_pool(
                &self.config.id_generator,
                pool,
            )?),
            (None, None) => Arc::new(SessionIdGenerator::new(&self.config.id_generator)?),
        };

        let inner = Arc::new_cyclic(|weak| ManagerInner {
            table: self.table.unwrap_or_else(|| Arc::new(MemoryTable::new())),
            id_generator,
            store: self.store,
            codec: self.codec.unwrap_or_else(|| Arc::new(BinaryCodec)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            listeners: RwLock::new(self.listeners),
            stats: SessionStats::default(),
            state: Mutex::new(LifecycleState::Stopped),
            ticks: AtomicU64::new(0),
            swap_locks: KeyLockTable::new(),
            self_ref: weak.clone(),
            config: self.config,
        });
        Ok(SessionManager { inner })
    }
}

struct ManagerInner {
    config: ManagerConfig,
    table: Arc<dyn SessionTable>,
    id_generator: Arc<dyn IdGenerator>,
    store: Option<Arc<dyn Store>>,
    codec: Arc<dyn SessionCodec>,
    clock: Arc<dyn Clock>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    stats: SessionStats,
    state: Mutex<LifecycleState>,
    ticks: AtomicU64,
    swap_locks: KeyLockTable,
    self_ref: Weak<ManagerInner>,
}

impl ManagerInner {
    fn store_remove(&self, id: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id) {
                error!(store = store.name(), session_id = %id, error = %e, "Failed to remove session from store");
            }
        }
    }
}

impl SessionOwner for ManagerInner {
    fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    fn notify(&self, session: &Session, event: &SessionEvent, reverse: bool) {
        let listeners = self.listeners.read().clone();
        if reverse {
            for listener in listeners.iter().rev() {
                listener.on_event(session, event);
            }
        } else {
            for listener in &listeners {
                listener.on_event(session, event);
            }
        }
    }

    fn remove_session(&self, session: &Session, expired: bool) {
        if expired {
            let now = self.clock.now_millis();
            let lifetime_secs = now.saturating_sub(session.creation_time()) / 1000;
            self.stats.record_expired(now, lifetime_secs);
        }
        self.table.remove(session);
        self.store_remove(&session.id());
    }
}

/// Orchestrates the session table, id generation, expiration and
/// persistence. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a manager with default collaborators.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// The backing store, if any.
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.inner.store.as_ref()
    }

    /// Current time from the manager's clock.
    pub fn now_millis(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Register a listener after construction.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Attach a session to this manager without adding it to the table.
    ///
    /// Used for sessions read from a store: once adopted they use the
    /// manager's clock, listeners and statistics.
    pub fn adopt(&self, session: &Session) {
        let owner: Weak<dyn SessionOwner> = self.inner.self_ref.clone();
        session.attach(
            owner,
            self.inner.config.strict_activity,
            self.inner.config.last_access_at_start,
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Move from `Stopped` to `Initialized`.
    pub fn init(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match *state {
            LifecycleState::Stopped => {
                if self.inner.store.is_some() && self.inner.config.pathname.is_some() {
                    warn!(manager = %self.inner.config.name, "Bulk persistence file is ignored when a store is configured");
                }
                *state = LifecycleState::Initialized;
                Ok(())
            }
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Started => Err(Error::InvalidState(
                "manager is already started".to_string(),
            )),
        }
    }

    /// Start the manager: warm up the id generator, then restore persisted
    /// sessions.
    ///
    /// I/O failures while restoring are logged and the manager starts
    /// anyway. Corrupt persisted data is returned as an error, but the
    /// manager is left started with whatever was restored before the
    /// failure.
    pub fn start(&self) -> Result<()> {
        if self.state() == LifecycleState::Started {
            return Ok(());
        }
        self.init()?;

        self.inner.id_generator.generate()?;
        *self.inner.state.lock() = LifecycleState::Started;

        match self.load() {
            Ok(restored) => {
                info!(manager = %self.inner.config.name, restored, "Session manager started");
                Ok(())
            }
            Err(e) if e.is_corruption() => {
                error!(manager = %self.inner.config.name, error = %e, "Persisted sessions are corrupt");
                Err(e)
            }
            Err(e) => {
                error!(manager = %self.inner.config.name, error = %e, "Failed to restore sessions");
                Ok(())
            }
        }
    }

    /// Stop the manager: persist active sessions, expire whatever is left
    /// and drop cached randomness. Persistence failures are logged.
    pub fn stop(&self) {
        if self.state() == LifecycleState::Stopped {
            return;
        }

        match self.unload() {
            Ok(saved) => debug!(manager = %self.inner.config.name, saved, "Sessions persisted"),
            Err(e) => {
                error!(manager = %self.inner.config.name, error = %e, "Failed to persist sessions")
            }
        }

        for session in self.inner.table.all() {
            if session.is_valid() {
                session.expire(true);
            }
            session.recycle();
        }

        self.inner.id_generator.reset();
        *self.inner.state.lock() = LifecycleState::Stopped;
        info!(manager = %self.inner.config.name, "Session manager stopped");
    }

    /// Restore persisted sessions into the table. Returns the number
    /// restored.
    ///
    /// With a store and `save_on_restart`, every stored session is swapped
    /// in; without `save_on_restart` the store is cleared. Without a store,
    /// the bulk file is read and then deleted. A corrupt record aborts the
    /// rest of the file.
    pub fn load(&self) -> Result<usize> {
        if let Some(store) = &self.inner.store {
            if !self.inner.config.persistence.save_on_restart {
                store.clear()?;
                return Ok(0);
            }

            let mut restored = 0;
            for id in store.keys(false)? {
                match self.swap_in(&id) {
                    Ok(Some(_)) => restored += 1,
                    Ok(None) => {}
                    Err(e) if e.is_corruption() => return Err(e),
                    Err(e) => {
                        error!(store = store.name(), session_id = %id, error = %e, "Failed to swap in session");
                    }
                }
            }
            return Ok(restored);
        }

        let Some(path) = &self.inner.config.pathname else {
            return Ok(0);
        };

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?path, "No persisted sessions");
                return Ok(0);
            }
            Err(e) => {
                error!(path = ?path, error = %e, "Failed to read persisted sessions");
                return Err(e.into());
            }
        };
        if let Err(e) = fs::remove_file(path) {
            warn!(path = ?path, error = %e, "Failed to delete persisted sessions file");
        }

        let reader = BulkReader::new(self.inner.codec.as_ref(), &bytes)?;
        debug!(path = ?path, count = reader.remaining(), "Loading persisted sessions");

        let mut restored = 0;
        for record in reader {
            let session = Arc::new(Session::from_data(record?));
            self.restore(&session);
            restored += 1;
        }
        Ok(restored)
    }

    fn restore(&self, session: &Arc<Session>) {
        self.adopt(session);
        session.set_new(false);
        self.inner.table.add(Arc::clone(session));
        self.inner.stats.record_restored();
        session.activate();
        if !session.is_valid_internal() {
            session.set_valid(true);
            session.expire(true);
        }
        trace!(session_id = %session.id(), "Restored session");
    }

    /// Persist every active session and remove it from the table. Returns
    /// the number persisted.
    ///
    /// With a store, sessions are swapped out (only when `save_on_restart`).
    /// Without one, they are written to the bulk file and then expired
    /// without notifications.
    pub fn unload(&self) -> Result<usize> {
        if self.inner.store.is_some() {
            if !self.inner.config.persistence.save_on_restart {
                return Ok(0);
            }
            let mut saved = 0;
            for session in self.inner.table.all() {
                match self.swap_out(&session) {
                    Ok(true) => saved += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(session_id = %session.id(), error = %e, "Failed to swap out session");
                    }
                }
            }
            return Ok(saved);
        }

        let Some(path) = &self.inner.config.pathname else {
            return Ok(0);
        };

        let sessions = self.inner.table.all();
        if sessions.is_empty() {
            debug!("No sessions to persist");
            return Ok(0);
        }

        let records: Vec<SessionData> = sessions
            .iter()
            .map(|session| {
                session.passivate();
                session.to_data()
            })
            .collect();
        let bytes = write_bulk(self.inner.codec.as_ref(), &records)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if let Err(e) = fs::write(path, &bytes) {
            error!(path = ?path, error = %e, "Failed to write persisted sessions");
            return Err(e.into());
        }
        debug!(path = ?path, count = records.len(), "Persisted sessions");

        for session in &sessions {
            session.expire(false);
            session.recycle();
        }
        Ok(records.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation and lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a session, with a generated id unless `id` is given.
    ///
    /// An explicit id that is already in use replaces the existing entry.
    pub fn create_session(&self, id: Option<&str>) -> Result<Arc<Session>> {
        if self.state() != LifecycleState::Started {
            return Err(Error::InvalidState("manager is not started".to_string()));
        }

        if let Some(max) = self.inner.config.max_active_sessions {
            if self.inner.table.len() >= max {
                self.inner.stats.record_rejected();
                warn!(max, "Rejecting session creation, too many active sessions");
                return Err(Error::TooManyActiveSessions { max });
            }
        }

        let id = match id {
            Some(id) => id.to_string(),
            None => self.generate_session_id()?,
        };

        let now = self.now_millis();
        let session = Arc::new(Session::from_data(SessionData::new(
            id,
            now,
            self.inner.config.max_inactive_interval,
        )));
        self.adopt(&session);
        self.inner.table.add(Arc::clone(&session));
        self.inner.stats.record_created(now);
        self.inner.notify(&session, &SessionEvent::Created, false);

        debug!(session_id = %session.id(), "Created session");
        Ok(session)
    }

    /// Generate an id not used by any active session.
    pub fn generate_session_id(&self) -> Result<String> {
        loop {
            let id = self.inner.id_generator.generate()?;
            if !self.inner.table.contains(&id) {
                return Ok(id);
            }
            self.inner.stats.record_duplicate();
            warn!(session_id = %id, "Generated duplicate session id, retrying");
        }
    }

    /// Find a valid session, swapping it in from the store on a miss.
    ///
    /// Checking validity may expire an idle session, in which case `None`
    /// is returned.
    pub fn find_session(&self, id: &str) -> Result<Option<Arc<Session>>> {
        let session = match self.inner.table.find(id) {
            Some(session) => Some(session),
            None => self.swap_in(id)?,
        };
        Ok(session.filter(|s| s.is_valid()))
    }

    /// Snapshot of all sessions in the table.
    pub fn find_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.table.all()
    }

    /// Whether `id` is in the table (not the store).
    pub fn is_loaded(&self, id: &str) -> bool {
        self.inner.table.contains(id)
    }

    /// Number of sessions in the table.
    pub fn active_sessions(&self) -> usize {
        self.inner.table.len()
    }

    /// Remove a session from the table and the store without expiring it.
    pub fn remove(&self, session: &Session) {
        self.inner.remove_session(session, false);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Swapping
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a session from the store into the table.
    ///
    /// Returns `None` if there is no store, the id is not stored, or the
    /// stored session has already expired (it is then expired and removed).
    ///
    /// The per-id swap lock is released before an expired session's
    /// listeners run, so they may look the same id up again.
    pub fn swap_in(&self, id: &str) -> Result<Option<Arc<Session>>> {
        let Some(store) = &self.inner.store else {
            return Ok(None);
        };

        let expired = {
            let _guard = self.inner.swap_locks.write(id);
            if let Some(session) = self.inner.table.find(id) {
                return Ok(Some(session));
            }

            let Some(session) = store.load(id)? else {
                return Ok(None);
            };
            let session = Arc::new(session);
            self.adopt(&session);

            if session.id() != id {
                error!(session_id = %id, stored_id = %session.id(), "Stored session has a different id, discarding");
                self.inner.store_remove(id);
                return Ok(None);
            }

            if session.is_valid_internal() && !session.idle_timed_out() {
                self.inner.table.add(Arc::clone(&session));
                session.activate();
                session.access();
                session.end_access();
                self.inner.store_remove(id);

                debug!(store = store.name(), session_id = %id, "Swapped in session");
                return Ok(Some(session));
            }

            self.inner.store_remove(id);
            session
        };

        debug!(session_id = %id, "Swapped in an expired session");
        expired.expire(true);
        Ok(None)
    }

    /// Move a session from the table into the store.
    ///
    /// Returns `false` without touching the session when there is no store
    /// or the session is no longer valid. On a store error the session stays
    /// in the table.
    pub fn swap_out(&self, session: &Arc<Session>) -> Result<bool> {
        let Some(store) = &self.inner.store else {
            return Ok(false);
        };
        if !session.is_valid() {
            return Ok(false);
        }

        let id = session.id();
        let _guard = self.inner.swap_locks.write(&id);
        session.passivate();
        if let Err(e) = store.save(session) {
            error!(store = store.name(), session_id = %id, error = %e, "Failed to save session to store");
            return Err(e);
        }
        self.inner.table.remove(session);
        session.recycle();

        debug!(store = store.name(), session_id = %id, "Swapped out session");
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expiration
    // ─────────────────────────────────────────────────────────────────────────

    /// Periodic tick. Runs [`process_expires`](Self::process_expires) every
    /// `process_expires_frequency` calls and returns its result on those
    /// calls.
    pub fn background_process(&self) -> Option<usize> {
        let frequency = u64::from(self.inner.config.process_expires_frequency.max(1));
        let tick = self.inner.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if tick % frequency == 0 {
            Some(self.process_expires())
        } else {
            None
        }
    }

    /// Sweep the table for idle sessions, then apply the store policy.
    /// Returns the number of invalid sessions found in the table.
    pub fn process_expires(&self) -> usize {
        let started = Instant::now();

        let sessions = self.inner.table.all();
        let mut expired = 0;
        for session in &sessions {
            if !session.is_valid() {
                expired += 1;
            }
        }

        if let Some(store) = &self.inner.store {
            self.process_persistence_checks();
            store.process_expires(self);
        }

        let elapsed = started.elapsed().as_millis() as u64;
        self.inner.stats.add_processing_time(elapsed);
        debug!(
            manager = %self.inner.config.name,
            checked = sessions.len(),
            expired,
            elapsed_ms = elapsed,
            "Processed session expiration"
        );
        expired
    }

    /// Apply the idle and max-active swap rules.
    pub fn process_persistence_checks(&self) {
        if self.state() != LifecycleState::Started || self.inner.store.is_none() {
            return;
        }
        self.process_max_idle_swaps();
        self.process_max_active_swaps();
    }

    fn swappable(&self, session: &Session) -> bool {
        !(self.inner.config.strict_activity && session.access_count() > 0)
    }

    fn process_max_idle_swaps(&self) {
        let policy = &self.inner.config.persistence;
        if policy.max_idle_swap < 0 {
            return;
        }

        for session in self.inner.table.all() {
            if !session.is_valid() {
                continue;
            }
            let idle_secs = session.idle_time_millis() / 1000;
            if idle_secs >= i64::from(policy.max_idle_swap)
                && idle_secs >= i64::from(policy.min_idle_swap)
                && self.swappable(&session)
            {
                debug!(session_id = %session.id(), idle_secs, "Swapping out idle session");
                if let Err(e) = self.swap_out(&session) {
                    error!(session_id = %session.id(), error = %e, "Idle swap-out failed");
                }
            }
        }
    }

    fn process_max_active_swaps(&self) {
        let Some(max) = self.inner.config.max_active_sessions else {
            return;
        };
        let mut sessions = self.inner.table.all();
        if sessions.len() <= max {
            return;
        }

        let min_idle = i64::from(self.inner.config.persistence.min_idle_swap);
        let mut to_swap = sessions.len() - max;
        sessions.sort_by_key(|s| s.this_accessed_time());

        for session in sessions {
            if to_swap == 0 {
                break;
            }
            let idle_secs = session.idle_time_millis() / 1000;
            if idle_secs < min_idle || !self.swappable(&session) {
                continue;
            }
            debug!(session_id = %session.id(), idle_secs, "Swapping out session over the active limit");
            match self.swap_out(&session) {
                Ok(true) => to_swap -= 1,
                Ok(false) => {}
                Err(e) => error!(session_id = %session.id(), error = %e, "Swap-out failed"),
            }
        }
    }

    /// Expire one active session by id.
    ///
    /// Fails with [`Error::NotFound`] when the id is not in the table.
    pub fn expire_session(&self, id: &str) -> Result<()> {
        match self.inner.table.find(id) {
            Some(session) => {
                session.expire(true);
                Ok(())
            }
            None => {
                warn!(session_id = %id, "Cannot expire unknown session");
                Err(Error::NotFound(id.to_string()))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Id change
    // ─────────────────────────────────────────────────────────────────────────

    /// Give a session a freshly generated id. Returns the new id.
    pub fn change_session_id(&self, session: &Arc<Session>) -> Result<String> {
        let new_id = self.generate_session_id()?;
        self.change_session_id_to(session, &new_id)?;
        Ok(new_id)
    }

    /// Re-key a session under `new_id` and notify listeners.
    pub fn change_session_id_to(&self, session: &Arc<Session>, new_id: &str) -> Result<()> {
        if !session.is_valid_internal() {
            return Err(Error::InvalidState(format!(
                "cannot change id of invalidated session {}",
                session.id()
            )));
        }

        let old_id = session.id();
        self.inner.table.remove(session);
        self.inner.store_remove(&old_id);
        session.set_id(new_id);
        self.inner.table.add(Arc::clone(session));

        debug!(old_id = %old_id, session_id = %new_id, "Changed session id");
        self.inner
            .notify(session, &SessionEvent::IdChanged { old_id }, false);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Ids of all sessions in the table, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.table.all().iter().map(|s| s.id()).collect();
        ids.sort();
        ids
    }

    /// Text form of one attribute, without touching the session's access
    /// time.
    pub fn session_attribute(&self, id: &str, name: &str) -> Option<String> {
        let session = self.inner.table.find(id)?;
        session
            .attribute(name)
            .ok()
            .flatten()
            .map(|value| value.display())
    }

    /// Timestamps and attribute names of one session.
    pub fn session_summary(&self, id: &str) -> Option<SessionSummary> {
        self.inner.table.find(id).map(|s| s.summary())
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        let stats = &self.inner.stats;
        let now = self.now_millis();
        StatsSnapshot {
            active: self.inner.table.len(),
            max_active: self.inner.table.max_active(),
            created: stats.created(),
            expired: stats.expired(),
            rejected: stats.rejected(),
            duplicates: stats.duplicates(),
            max_alive_secs: stats.max_alive_secs(),
            average_alive_secs: stats.average_alive_secs(),
            create_rate: stats.create_rate(now),
            expire_rate: stats.expire_rate(now),
            processing_time_ms: stats.processing_time_ms(),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("active", &self.inner.table.len())
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manager(config: ManagerConfig) -> (Arc<ManualClock>, SessionManager) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = SessionManager::builder(config)
            .with_clock(clock.clone())
            .build()
            .unwrap();
        manager.start().unwrap();
        (clock, manager)
    }

    #[test]
    fn test_lifecycle_states() {
        let manager = SessionManager::new(ManagerConfig::default()).unwrap();
        assert_eq!(manager.state(), LifecycleState::Stopped);
        manager.init().unwrap();
        assert_eq!(manager.state(), LifecycleState::Initialized);
        manager.start().unwrap();
        assert_eq!(manager.state(), LifecycleState::Started);
        assert!(manager.init().is_err());
        manager.stop();
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_create_requires_started() {
        let manager = SessionManager::new(ManagerConfig::default()).unwrap();
        assert!(matches!(
            manager.create_session(None),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_background_process_frequency() {
        let (_clock, manager) =
            manager(ManagerConfig::default().with_process_expires_frequency(3));
        let results: Vec<_> = (0..6).map(|_| manager.background_process()).collect();
        assert_eq!(results, vec![None, None, Some(0), None, None, Some(0)]);
    }

    #[test]
    fn test_sweep_expires_idle_sessions() {
        let (clock, manager) = manager(ManagerConfig::default().with_max_inactive_interval(10));
        let idle = manager.create_session(None).unwrap();
        clock.advance_secs(5);
        let busy = manager.create_session(None).unwrap();
        clock.advance_secs(6);

        assert_eq!(manager.process_expires(), 1);
        assert!(!idle.is_valid_internal());
        assert!(busy.is_valid_internal());
        assert_eq!(manager.active_sessions(), 1);
        assert_eq!(manager.stats().expired, 1);
    }

    #[test]
    fn test_explicit_id_overwrites() {
        let (_clock, manager) = manager(ManagerConfig::default());
        manager.create_session(Some("FIXED")).unwrap();
        let second = manager.create_session(Some("FIXED")).unwrap();
        assert_eq!(manager.active_sessions(), 1);
        let found = manager.find_session("FIXED").unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }

    #[test]
    fn test_expire_session_by_id() {
        let (_clock, manager) = manager(ManagerConfig::default());
        let session = manager.create_session(None).unwrap();
        manager.expire_session(&session.id()).unwrap();
        assert!(matches!(
            manager.expire_session("missing"),
            Err(Error::NotFound(id)) if id == "missing"
        ));
        assert_eq!(manager.active_sessions(), 0);
    }

    #[test]
    fn test_lifetime_statistics() {
        let (clock, manager) = manager(ManagerConfig::default());
        let a = manager.create_session(None).unwrap();
        clock.advance_secs(10);
        a.invalidate().unwrap();
        let b = manager.create_session(None).unwrap();
        clock.advance_secs(30);
        b.invalidate().unwrap();

        let stats = manager.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.max_alive_secs, 30);
        assert!((stats.average_alive_secs - 20.0).abs() < 1e-9);
        assert_eq!(stats.max_active, 1);
    }
}
