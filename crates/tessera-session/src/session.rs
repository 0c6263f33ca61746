//! The session record.
//!
//! A [`Session`] is shared as `Arc<Session>` between the table and request
//! threads, so every field uses interior mutability. The back-reference to
//! the owning manager is a [`Weak`] handle used for notifications and table
//! removal only; it never keeps the manager alive.

use std::collections::{BTreeMap, HashMap};
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::attribute::{AttributeValue, BindingEvent};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::listener::SessionEvent;

/// Callbacks a session makes into the manager that owns it.
pub(crate) trait SessionOwner: Send + Sync {
    /// Current time from the manager's clock.
    fn now_millis(&self) -> i64;

    /// Deliver an event to the manager's listeners.
    fn notify(&self, session: &Session, event: &SessionEvent, reverse: bool);

    /// Remove the session from the table (and store). `expired` updates the
    /// expiration statistics.
    fn remove_session(&self, session: &Session, expired: bool);
}

/// Last and current access timestamps, always updated together.
#[derive(Debug, Clone, Copy)]
struct AccessTimes {
    last: i64,
    this: i64,
}

/// Serializable state of a session: everything that survives passivation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionData {
    pub id: String,
    pub creation_time: i64,
    pub last_accessed_time: i64,
    pub this_accessed_time: i64,
    pub max_inactive_interval: i32,
    pub is_new: bool,
    pub is_valid: bool,
    pub attributes: BTreeMap<String, Value>,
}

impl SessionData {
    /// Fresh data for a session created at `now`.
    pub fn new(id: impl Into<String>, now: i64, max_inactive_interval: i32) -> Self {
        Self {
            id: id.into(),
            creation_time: now,
            last_accessed_time: now,
            this_accessed_time: now,
            max_inactive_interval,
            is_new: true,
            is_valid: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Add a serializable attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Read-only view of a session for administrative listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub creation_time: i64,
    pub last_accessed_time: i64,
    pub this_accessed_time: i64,
    pub max_inactive_interval: i32,
    pub is_new: bool,
    pub is_valid: bool,
    pub attribute_names: Vec<String>,
}

/// One user session.
pub struct Session {
    id: RwLock<String>,
    creation_time: RwLock<i64>,
    times: RwLock<AccessTimes>,
    max_inactive_interval: AtomicI32,
    is_new: AtomicBool,
    is_valid: AtomicBool,
    expiring: AtomicBool,
    attributes: RwLock<HashMap<String, AttributeValue>>,
    access_count: AtomicUsize,
    activity_check: AtomicBool,
    last_access_at_start: AtomicBool,
    owner: RwLock<Option<Weak<dyn SessionOwner>>>,
    expire_lock: ReentrantMutex<()>,
}

impl Session {
    /// Create a detached session from persisted data.
    ///
    /// The session has no owner until a manager adopts it; until then it
    /// reads time from the system clock and `expire` is a no-op.
    pub fn from_data(data: SessionData) -> Self {
        let attributes = data
            .attributes
            .into_iter()
            .map(|(name, value)| (name, AttributeValue::Value(value)))
            .collect();

        Self {
            id: RwLock::new(data.id),
            creation_time: RwLock::new(data.creation_time),
            times: RwLock::new(AccessTimes {
                last: data.last_accessed_time,
                this: data.this_accessed_time,
            }),
            max_inactive_interval: AtomicI32::new(data.max_inactive_interval),
            is_new: AtomicBool::new(data.is_new),
            is_valid: AtomicBool::new(data.is_valid),
            expiring: AtomicBool::new(false),
            attributes: RwLock::new(attributes),
            access_count: AtomicUsize::new(0),
            activity_check: AtomicBool::new(false),
            last_access_at_start: AtomicBool::new(false),
            owner: RwLock::new(None),
            expire_lock: ReentrantMutex::new(()),
        }
    }

    /// Attach the session to its manager.
    pub(crate) fn attach(
        &self,
        owner: Weak<dyn SessionOwner>,
        activity_check: bool,
        last_access_at_start: bool,
    ) {
        *self.owner.write() = Some(owner);
        self.activity_check.store(activity_check, Ordering::SeqCst);
        self.last_access_at_start
            .store(last_access_at_start, Ordering::SeqCst);
    }

    fn owner(&self) -> Option<std::sync::Arc<dyn SessionOwner>> {
        self.owner.read().as_ref().and_then(Weak::upgrade)
    }

    fn now(&self) -> i64 {
        match self.owner() {
            Some(owner) => owner.now_millis(),
            None => SystemClock.now_millis(),
        }
    }

    fn notify(&self, event: SessionEvent) {
        if let Some(owner) = self.owner() {
            owner.notify(self, &event, false);
        }
    }

    // ── Identity and timestamps ─────────────────────────────────────────

    /// The session identifier.
    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    /// Replace the identifier. The caller re-keys the table.
    pub(crate) fn set_id(&self, id: &str) {
        *self.id.write() = id.to_string();
    }

    /// Creation time in milliseconds since the epoch.
    pub fn creation_time(&self) -> i64 {
        *self.creation_time.read()
    }

    /// Start of the previous request (or end, with last-access-at-start off).
    pub fn last_accessed_time(&self) -> i64 {
        self.times.read().last
    }

    /// Time of the most recent access.
    pub fn this_accessed_time(&self) -> i64 {
        self.times.read().this
    }

    /// Milliseconds since the session was last used.
    pub fn idle_time_millis(&self) -> i64 {
        let times = *self.times.read();
        let reference = if self.last_access_at_start.load(Ordering::SeqCst) {
            times.last
        } else {
            times.this
        };
        self.now().saturating_sub(reference)
    }

    /// Idle timeout in seconds; negative means the session never times out.
    pub fn max_inactive_interval(&self) -> i32 {
        self.max_inactive_interval.load(Ordering::SeqCst)
    }

    /// Change the idle timeout.
    pub fn set_max_inactive_interval(&self, seconds: i32) {
        self.max_inactive_interval.store(seconds, Ordering::SeqCst);
    }

    /// Whether the client has not yet joined the session.
    pub fn is_new(&self) -> bool {
        self.is_new.load(Ordering::SeqCst)
    }

    pub(crate) fn set_new(&self, is_new: bool) {
        self.is_new.store(is_new, Ordering::SeqCst);
    }

    /// Number of requests currently using the session (strict activity only).
    pub fn access_count(&self) -> usize {
        self.access_count.load(Ordering::SeqCst)
    }

    // ── Request bracketing ──────────────────────────────────────────────

    /// Mark the start of a request using this session.
    pub fn access(&self) {
        let now = self.now();
        self.times.write().this = now;
        if self.activity_check.load(Ordering::SeqCst) {
            self.access_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Mark the end of a request using this session.
    pub fn end_access(&self) {
        self.is_new.store(false, Ordering::SeqCst);
        let now = self.now();
        {
            let mut times = self.times.write();
            if self.last_access_at_start.load(Ordering::SeqCst) {
                times.last = times.this;
                times.this = now;
            } else {
                times.this = now;
                times.last = now;
            }
        }
        if self.activity_check.load(Ordering::SeqCst) {
            // Saturating: expire() may have reset the counter mid-request.
            let _ = self
                .access_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    // ── Validity ────────────────────────────────────────────────────────

    /// The raw validity flag, without the idle check.
    pub fn is_valid_internal(&self) -> bool {
        self.is_valid.load(Ordering::SeqCst)
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.is_valid.store(valid, Ordering::SeqCst);
    }

    /// Whether the session is mid-expiration.
    pub fn is_expiring(&self) -> bool {
        self.expiring.load(Ordering::SeqCst)
    }

    /// Whether the idle time has reached the timeout. Has no side effects.
    pub fn idle_timed_out(&self) -> bool {
        let interval = self.max_inactive_interval();
        if interval < 0 {
            return false;
        }
        self.idle_time_millis() / 1000 >= i64::from(interval)
    }

    /// Check validity, expiring the session if it has idled out.
    ///
    /// A session currently being expired reports valid so listeners can
    /// still use it; a session with in-flight requests (strict activity) is
    /// never expired here.
    pub fn is_valid(&self) -> bool {
        if self.is_expiring() {
            return true;
        }
        if !self.is_valid_internal() {
            return false;
        }
        if self.activity_check.load(Ordering::SeqCst) && self.access_count() > 0 {
            return true;
        }
        if self.idle_timed_out() {
            self.expire(true);
        }
        self.is_valid_internal()
    }

    /// Invalidate the session, notifying listeners.
    pub fn invalidate(&self) -> Result<()> {
        if !self.is_valid_internal() {
            return Err(Error::InvalidState(format!(
                "session {} already invalidated",
                self.id()
            )));
        }
        self.expire(true);
        Ok(())
    }

    /// Expire the session.
    ///
    /// Runs at most once per session: listeners get `Destroying` (reverse
    /// order), the session leaves the table with statistics updated,
    /// listeners get `Destroyed`, the flag flips and every attribute is
    /// unbound. With `notify` false no events or unbind callbacks fire.
    pub fn expire(&self, notify: bool) {
        if !self.is_valid_internal() {
            return;
        }

        let _guard = self.expire_lock.lock();
        if self.is_expiring() || !self.is_valid_internal() {
            return;
        }
        let Some(owner) = self.owner() else {
            return;
        };

        self.expiring.store(true, Ordering::SeqCst);
        debug!(session_id = %self.id(), notify, "Expiring session");

        if notify {
            owner.notify(self, &SessionEvent::Destroying, true);
        }

        if self.activity_check.load(Ordering::SeqCst) {
            self.access_count.store(0, Ordering::SeqCst);
        }

        owner.remove_session(self, true);

        if notify {
            owner.notify(self, &SessionEvent::Destroyed, false);
        }

        self.set_valid(false);
        self.expiring.store(false, Ordering::SeqCst);

        for name in self.attribute_keys() {
            self.remove_attribute_internal(&name, notify);
        }
    }

    /// Clear the session so it can be dropped. Detaches it from its owner.
    pub fn recycle(&self) {
        self.attributes.write().clear();
        *self.creation_time.write() = 0;
        *self.times.write() = AccessTimes { last: 0, this: 0 };
        self.max_inactive_interval.store(-1, Ordering::SeqCst);
        self.is_new.store(false, Ordering::SeqCst);
        self.is_valid.store(false, Ordering::SeqCst);
        self.access_count.store(0, Ordering::SeqCst);
        *self.owner.write() = None;
        self.id.write().clear();
    }

    // ── Passivation ─────────────────────────────────────────────────────

    /// Notify listeners and live attributes that the session is being
    /// written out.
    pub fn passivate(&self) {
        self.notify(SessionEvent::Passivated);
        for value in self.attribute_values() {
            if let AttributeValue::Object(object) = value {
                object.will_passivate(self);
            }
        }
    }

    /// Notify listeners and live attributes that the session was restored.
    pub fn activate(&self) {
        self.access_count.store(0, Ordering::SeqCst);
        self.notify(SessionEvent::Activated);
        for value in self.attribute_values() {
            if let AttributeValue::Object(object) = value {
                object.did_activate(self);
            }
        }
    }

    /// Collect the serializable state.
    ///
    /// Live objects cannot be written, so they are removed from the session
    /// (with unbind callbacks) before the snapshot is taken.
    pub fn to_data(&self) -> SessionData {
        let mut attributes = BTreeMap::new();
        let mut unserializable = Vec::new();
        {
            let attrs = self.attributes.read();
            for (name, value) in attrs.iter() {
                match value {
                    AttributeValue::Value(v) => {
                        attributes.insert(name.clone(), v.clone());
                    }
                    AttributeValue::Object(_) => unserializable.push(name.clone()),
                }
            }
        }

        let id = self.id();
        for name in unserializable {
            debug!(session_id = %id, attribute = %name, "Dropping non-serializable attribute");
            self.remove_attribute_internal(&name, true);
        }

        let times = *self.times.read();
        SessionData {
            id,
            creation_time: self.creation_time(),
            last_accessed_time: times.last,
            this_accessed_time: times.this,
            max_inactive_interval: self.max_inactive_interval(),
            is_new: self.is_new(),
            is_valid: self.is_valid_internal(),
            attributes,
        }
    }

    /// Administrative view.
    pub fn summary(&self) -> SessionSummary {
        let mut attribute_names = self.attribute_keys();
        attribute_names.sort();
        let times = *self.times.read();
        SessionSummary {
            id: self.id(),
            creation_time: self.creation_time(),
            last_accessed_time: times.last,
            this_accessed_time: times.this,
            max_inactive_interval: self.max_inactive_interval(),
            is_new: self.is_new(),
            is_valid: self.is_valid_internal(),
            attribute_names,
        }
    }

    // ── Attributes ──────────────────────────────────────────────────────

    fn ensure_valid(&self, op: &str) -> Result<()> {
        if self.is_valid_internal() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{} on invalidated session {}",
                op,
                self.id()
            )))
        }
    }

    fn attribute_keys(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }

    fn attribute_values(&self) -> Vec<AttributeValue> {
        self.attributes.read().values().cloned().collect()
    }

    /// Read an attribute.
    pub fn attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.ensure_valid("attribute")?;
        Ok(self.attributes.read().get(name).cloned())
    }

    /// Names of all attributes.
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.ensure_valid("attribute_names")?;
        Ok(self.attribute_keys())
    }

    /// Bind a value under `name`, replacing any previous value.
    pub fn set_attribute(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        self.ensure_valid("set_attribute")?;
        let value = value.into();

        let previous = self
            .attributes
            .write()
            .insert(name.to_string(), value.clone());

        if let Some(previous) = &previous {
            if previous.same_as(&value) {
                return Ok(());
            }
        }

        if let AttributeValue::Object(object) = &value {
            object.value_bound(&BindingEvent {
                session: self,
                name,
            });
        }

        match previous {
            Some(previous) => {
                if let AttributeValue::Object(object) = &previous {
                    object.value_unbound(&BindingEvent {
                        session: self,
                        name,
                    });
                }
                self.notify(SessionEvent::AttributeReplaced {
                    name: name.to_string(),
                });
            }
            None => self.notify(SessionEvent::AttributeAdded {
                name: name.to_string(),
            }),
        }

        trace!(session_id = %self.id(), attribute = %name, "Attribute set");
        Ok(())
    }

    /// Remove an attribute, firing unbind callbacks.
    pub fn remove_attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.ensure_valid("remove_attribute")?;
        Ok(self.remove_attribute_internal(name, true))
    }

    fn remove_attribute_internal(&self, name: &str, notify: bool) -> Option<AttributeValue> {
        let removed = self.attributes.write().remove(name)?;

        if notify {
            if let AttributeValue::Object(object) = &removed {
                object.value_unbound(&BindingEvent {
                    session: self,
                    name,
                });
            }
            self.notify(SessionEvent::AttributeRemoved {
                name: name.to_string(),
            });
        }

        Some(removed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &*self.id.read())
            .field("is_valid", &self.is_valid_internal())
            .field("max_inactive_interval", &self.max_inactive_interval())
            .finish_non_exhaustive()
    }
}
