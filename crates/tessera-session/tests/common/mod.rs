//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tessera_session::{
    BindingEvent, IdGenerator, ManagerConfig, ManualClock, Result, Session, SessionEvent,
    SessionListener, SessionManager, SessionObject, Store,
};

/// Start time for manual clocks.
pub const T0: i64 = 1_700_000_000_000;

/// Records every event as `(session id, event)`.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<(String, SessionEvent)>>,
}

impl Recorder {
    pub fn count(&self, wanted: &SessionEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e == wanted)
            .count()
    }
}

impl SessionListener for Recorder {
    fn on_event(&self, session: &Session, event: &SessionEvent) {
        self.events
            .lock()
            .unwrap()
            .push((session.id(), event.clone()));
    }
}

/// Forwards to a shared recorder so tests keep a handle to it.
pub struct Shared(pub Arc<Recorder>);

impl SessionListener for Shared {
    fn on_event(&self, session: &Session, event: &SessionEvent) {
        self.0.on_event(session, event);
    }
}

/// Live attribute that counts its callbacks.
#[derive(Debug, Default)]
pub struct Spy {
    pub bound: AtomicUsize,
    pub unbound: AtomicUsize,
    pub passivated: AtomicUsize,
}

impl Spy {
    pub fn unbound(&self) -> usize {
        self.unbound.load(Ordering::SeqCst)
    }
}

impl SessionObject for Spy {
    fn value_bound(&self, _event: &BindingEvent<'_>) {
        self.bound.fetch_add(1, Ordering::SeqCst);
    }

    fn value_unbound(&self, _event: &BindingEvent<'_>) {
        self.unbound.fetch_add(1, Ordering::SeqCst);
    }

    fn will_passivate(&self, _session: &Session) {
        self.passivated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Id generator that replays a fixed list.
#[derive(Debug)]
pub struct ScriptedIds {
    ids: Mutex<VecDeque<String>>,
}

impl ScriptedIds {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
        }
    }
}

impl IdGenerator for ScriptedIds {
    fn generate(&self) -> Result<String> {
        Ok(self
            .ids
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted ids exhausted"))
    }
}

/// Started manager with a manual clock and a recording listener.
pub fn manager(config: ManagerConfig) -> (Arc<ManualClock>, Arc<Recorder>, SessionManager) {
    manager_with_store(config, None)
}

pub fn manager_with_store(
    config: ManagerConfig,
    store: Option<Arc<dyn Store>>,
) -> (Arc<ManualClock>, Arc<Recorder>, SessionManager) {
    let clock = Arc::new(ManualClock::new(T0));
    let recorder = Arc::new(Recorder::default());
    let mut builder = SessionManager::builder(config)
        .with_clock(clock.clone())
        .with_listener(Shared(recorder.clone()));
    if let Some(store) = store {
        builder = builder.with_store(store);
    }
    let manager = builder.build().unwrap();
    manager.start().unwrap();
    (clock, recorder, manager)
}
