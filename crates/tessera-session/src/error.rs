//! Error types for session management and persistence.

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session was not found in the table or the store.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Creating another session would exceed the configured limit.
    #[error("Too many active sessions (limit {max})")]
    TooManyActiveSessions { max: usize },

    /// The operation is not allowed in the current state
    /// (invalidated session, stopped manager, ...).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Persisted session data could not be decoded.
    #[error("Corrupt session data: {0}")]
    Corrupt(String),

    /// The component is misconfigured and unusable until reconfigured.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error from a store or the bulk persistence file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error from the SQLite store.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the error describes persisted data that cannot be recovered.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupt(_))
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
