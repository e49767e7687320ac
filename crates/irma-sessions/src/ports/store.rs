//! The session store contract.
//!
//! A store owns all live sessions and serializes access to each of them: at
//! any moment a session is owned by at most one request handler, across all
//! replicas of the server. Handlers open a transaction, mutate the session
//! through the guard, and commit; the guard persists before the lock is
//! released. A guard whose lock expired mid-transaction refuses to persist,
//! failing the transaction with `StoreError::Conflict` instead of losing a
//! concurrent writer's update.

use async_trait::async_trait;
use tokio::sync::watch;

use irma_messages::{ClientToken, RequestorToken, ServerStatus};

use crate::domain::SessionData;
use crate::error::{ServerError, StoreError};

/// CRUD-plus-lock interface over live sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Snapshot of the session under the given requestor token.
    async fn get(&self, token: &RequestorToken) -> Result<Option<SessionData>, StoreError>;

    /// Snapshot of the session under the given client token.
    async fn client_get(&self, token: &ClientToken) -> Result<Option<SessionData>, StoreError>;

    /// Insert a fresh session. Both of its tokens must be unused.
    async fn add(&self, session: SessionData) -> Result<(), StoreError>;

    /// Acquire the session's exclusive lock and return a guard for mutating
    /// it. Fails with `Busy` when the lock cannot be obtained within the
    /// retry budget, and `UnknownSession` when no session lives under the
    /// token.
    async fn transaction(&self, token: &ClientToken)
        -> Result<Box<dyn SessionGuard>, StoreError>;

    /// Tokens of all sessions this store can enumerate, for the expiry
    /// sweep. Stores that expire keys by TTL return an empty list.
    async fn live_sessions(&self) -> Result<Vec<(RequestorToken, ClientToken)>, StoreError>;

    /// Status event channel of a session, when the store supports one.
    fn subscribe(&self, token: &ClientToken) -> Option<watch::Receiver<ServerStatus>>;

    /// Remove a session, closing its event channels.
    async fn delete(&self, token: &RequestorToken) -> Result<(), StoreError>;

    /// Release network resources and close all event channels.
    async fn stop(&self);
}

/// Exclusive access to one session for the duration of a transaction.
#[async_trait]
pub trait SessionGuard: Send {
    /// The session under the lock.
    fn session(&mut self) -> &mut SessionData;

    /// Persist changes, then release the lock. Remote stores re-check lock
    /// ownership before persisting.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Release the lock without persisting changes.
    async fn abort(self: Box<Self>);
}

/// Closure-style transaction: lock the session, run `f` on it, persist on
/// success, release on failure.
pub async fn with_session<T>(
    store: &dyn SessionStore,
    token: &ClientToken,
    f: impl FnOnce(&mut SessionData) -> Result<T, ServerError> + Send,
) -> Result<T, ServerError> {
    let mut guard = store.transaction(token).await?;
    match f(guard.session()) {
        Ok(value) => {
            guard.commit().await?;
            Ok(value)
        }
        Err(err) => {
            guard.abort().await;
            Err(err)
        }
    }
}
