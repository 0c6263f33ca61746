//! Session lifecycle notifications.

use crate::session::Session;

/// Lifecycle event delivered to [`SessionListener`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new session was created and added to the table.
    Created,
    /// The session is about to be destroyed; it is still valid and its
    /// attributes are still readable. Delivered in reverse registration order.
    Destroying,
    /// The session has been removed from the table as part of expiration.
    Destroyed,
    /// The session is about to be written to a store.
    Passivated,
    /// The session was restored into memory.
    Activated,
    /// The session was re-keyed.
    IdChanged { old_id: String },
    /// An attribute was added.
    AttributeAdded { name: String },
    /// An existing attribute was replaced.
    AttributeReplaced { name: String },
    /// An attribute was removed.
    AttributeRemoved { name: String },
}

/// Receives session lifecycle events from a manager.
pub trait SessionListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, session: &Session, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&Session, &SessionEvent) + Send + Sync,
{
    fn on_event(&self, session: &Session, event: &SessionEvent) {
        self(session, event)
    }
}
