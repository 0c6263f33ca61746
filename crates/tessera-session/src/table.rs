//! The in-memory session table.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::session::Session;

/// Live map from session id to session.
pub trait SessionTable: Send + Sync + fmt::Debug {
    /// Insert (or overwrite) the session under its current id.
    fn add(&self, session: Arc<Session>);

    /// Look up a session by id.
    fn find(&self, id: &str) -> Option<Arc<Session>>;

    /// Remove the entry for this exact session object. An entry under the
    /// same id that belongs to a different session object is left alone.
    fn remove(&self, session: &Session) -> bool;

    /// Whether an entry exists for `id`.
    fn contains(&self, id: &str) -> bool;

    /// Point-in-time copy of all sessions.
    fn all(&self) -> Vec<Arc<Session>>;

    /// Number of active sessions.
    fn len(&self) -> usize;

    /// Whether the table is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest number of concurrently active sessions seen.
    fn max_active(&self) -> usize;

    /// Reset the high-water mark to the current size.
    fn reset_max_active(&self);
}

/// [`SessionTable`] backed by a sharded concurrent map.
#[derive(Default)]
pub struct MemoryTable {
    sessions: DashMap<String, Arc<Session>>,
    max_active: AtomicUsize,
    max_active_lock: Mutex<()>,
}

impl MemoryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn update_max_active(&self, size: usize) {
        if size > self.max_active.load(Ordering::SeqCst) {
            let _guard = self.max_active_lock.lock();
            if size > self.max_active.load(Ordering::SeqCst) {
                self.max_active.store(size, Ordering::SeqCst);
            }
        }
    }
}

impl SessionTable for MemoryTable {
    fn add(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
        self.update_max_active(self.sessions.len());
    }

    fn find(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn remove(&self, session: &Session) -> bool {
        let id = session.id();
        self.sessions
            .remove_if(&id, |_, existing| std::ptr::eq(existing.as_ref(), session))
            .is_some()
    }

    fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn reset_max_active(&self) {
        let _guard = self.max_active_lock.lock();
        self.max_active.store(self.sessions.len(), Ordering::SeqCst);
    }
}

impl fmt::Debug for MemoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTable")
            .field("active", &self.sessions.len())
            .field("max_active", &self.max_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionData;
    use std::thread;

    fn session(id: &str) -> Arc<Session> {
        Arc::new(Session::from_data(SessionData::new(id, 0, 60)))
    }

    #[test]
    fn test_add_find_remove() {
        let table = MemoryTable::new();
        let s = session("A");
        table.add(Arc::clone(&s));

        assert!(table.contains("A"));
        assert!(Arc::ptr_eq(&table.find("A").unwrap(), &s));
        assert!(table.find("missing").is_none());

        assert!(table.remove(&s));
        assert!(!table.remove(&s));
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_ignores_other_object_with_same_id() {
        let table = MemoryTable::new();
        let live = session("A");
        let stale = session("A");
        table.add(Arc::clone(&live));

        assert!(!table.remove(&stale));
        assert!(table.contains("A"));
    }

    #[test]
    fn test_add_overwrites_same_id() {
        let table = MemoryTable::new();
        table.add(session("A"));
        let second = session("A");
        table.add(Arc::clone(&second));
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(&table.find("A").unwrap(), &second));
    }

    #[test]
    fn test_max_active_is_high_water_mark() {
        let table = MemoryTable::new();
        let sessions: Vec<_> = (0..3).map(|i| session(&format!("S{i}"))).collect();
        for s in &sessions {
            table.add(Arc::clone(s));
        }
        table.remove(&sessions[0]);
        table.remove(&sessions[1]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.max_active(), 3);
        table.reset_max_active();
        assert_eq!(table.max_active(), 1);
    }

    #[test]
    fn test_snapshot_survives_removal() {
        let table = MemoryTable::new();
        for i in 0..5 {
            table.add(session(&format!("S{i}")));
        }
        let snapshot = table.all();
        for s in &snapshot {
            table.remove(s);
        }
        assert_eq!(snapshot.len(), 5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_adds_track_max() {
        let table = Arc::new(MemoryTable::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..100 {
                        table.add(session(&format!("T{t}-{i}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 800);
        assert_eq!(table.max_active(), 800);
    }
}
