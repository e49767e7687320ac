//! Error types of the session engine.
//!
//! `StoreError` stays inside the store layer; handlers translate it into a
//! `ServerError`, whose kind determines the wire envelope. Store failures are
//! never swallowed: `Unavailable` is logged where it occurs and reaches the
//! wire as `internal`, `Busy` reaches it as the retryable 503 kind.

use irma_messages::{ErrorKind, RemoteError};

/// Errors from the session store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The remote store could not be reached or answered with an error.
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    /// The session lock was not obtained within the retry budget.
    #[error("session lock not obtained")]
    Busy,
    /// No live session under the given token.
    #[error("session unknown or expired")]
    UnknownSession,
    /// Both session tokens must be fresh on insert.
    #[error("session token already in use")]
    TokenInUse,
    /// The session lock expired before changes could be persisted.
    #[error("session lock expired before persist")]
    Conflict,
    /// A stored value did not parse back into a session.
    #[error("corrupt store entry: {0}")]
    Corrupt(String),
    #[error("session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A session-layer error carrying the wire error kind.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServerError {
    pub kind: ErrorKind,
    pub message: String,
    /// Attached only by the panic handler; reported on the wire only when the
    /// server runs in verbose mode.
    pub stacktrace: Option<String>,
}

impl ServerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stacktrace: None,
        }
    }

    pub fn kind(kind: ErrorKind) -> Self {
        Self::new(kind, "")
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(stacktrace.into());
        self
    }

    /// Prefix the detail message, building an informational prefix chain.
    pub fn wrap(mut self, prefix: &str) -> Self {
        self.message = if self.message.is_empty() {
            prefix.to_string()
        } else {
            format!("{}: {}", prefix, self.message)
        };
        self
    }

    /// The wire envelope for this error. Stacktraces are only attached in
    /// verbose mode.
    pub fn remote(&self, verbose: bool) -> RemoteError {
        let err = RemoteError::new(self.kind, self.message.clone());
        match (&self.stacktrace, verbose) {
            (Some(trace), true) => err.with_stacktrace(trace.clone()),
            _ => err,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Busy => ServerError::kind(ErrorKind::Busy),
            StoreError::UnknownSession => ServerError::kind(ErrorKind::SessionUnknown),
            other => ServerError::new(ErrorKind::Internal, other.to_string()),
        }
    }
}
