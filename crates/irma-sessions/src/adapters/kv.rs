//! Session store over a remote key-value client.
//!
//! Two keys per session: `token:<requestorToken>` points at the client token,
//! `session:<clientToken>` holds the canonical session JSON. Key TTLs follow
//! the session status, so expired sessions disappear without a sweep.
//!
//! Exclusive access uses `lock:<clientToken>` with a random fencing token and
//! a short TTL; the TTL bounds every critical section and prevents deadlock
//! when a replica dies holding a lock. Because time passes between acquiring
//! the lock and writing, `commit` re-checks lock ownership before any
//! persist; a lock that expired mid-transaction (a GC pause, a stalled
//! handler) fails the transaction instead of losing another writer's update.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use irma_messages::{ClientToken, RequestorToken, ServerStatus};

use crate::config::Configuration;
use crate::domain::SessionData;
use crate::error::StoreError;
use crate::ports::outbound::KeyValueClient;
use crate::ports::store::{SessionGuard, SessionStore};

const REQUESTOR_KEY_PREFIX: &str = "token:";
const CLIENT_KEY_PREFIX: &str = "session:";
const LOCK_KEY_PREFIX: &str = "lock:";

/// The lock self-deletes after this, bounding critical sections and
/// preventing deadlock.
const MAX_LOCK_LIFETIME: Duration = Duration::from_millis(500);
const MIN_LOCK_RETRY: Duration = Duration::from_millis(30);
const MAX_LOCK_RETRY: Duration = Duration::from_secs(2);
/// Total time spent retrying lock acquisition before failing with `Busy`.
const LOCK_RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Session store on a remote key-value store, for replicated deployments.
pub struct KvSessionStore {
    kv: Arc<dyn KeyValueClient>,
    conf: Arc<Configuration>,
}

impl KvSessionStore {
    pub fn new(kv: Arc<dyn KeyValueClient>, conf: Arc<Configuration>) -> Self {
        Self { kv, conf }
    }

    /// Load and deserialize a session. A session found past its deadline is
    /// returned as TIMEOUT; the transition is persisted by whichever
    /// transaction loads it next.
    async fn load(&self, token: &ClientToken) -> Result<Option<SessionData>, StoreError> {
        let json = match self.kv.get(&client_key(token)).await? {
            Some(json) => json,
            None => return Ok(None),
        };
        let mut session: SessionData = serde_json::from_str(&json)?;
        if !session.status.is_terminal() && session.expired(&self.conf, SystemTime::now()) {
            info!(session = %session.requestor_token, "session expired");
            session.mark_alive();
            let _ = session.set_status(ServerStatus::Timeout);
        }
        Ok(Some(session))
    }

    async fn persist(&self, session: &SessionData) -> Result<(), StoreError> {
        let ttl = session.store_ttl(&self.conf);
        let json = serde_json::to_string(session)?;
        self.kv
            .set(
                &requestor_key(&session.requestor_token),
                session.client_token.as_str(),
                ttl,
            )
            .await?;
        self.kv.set(&client_key(&session.client_token), &json, ttl).await
    }

    /// Acquire `lock:<clientToken>` with exponential backoff.
    async fn obtain_lock(&self, token: &ClientToken) -> Result<(String, String), StoreError> {
        let lock_key = lock_key(token);
        let fencing = fencing_token();
        let start = Instant::now();
        let mut delay = MIN_LOCK_RETRY;
        loop {
            if self
                .kv
                .try_lock(&lock_key, &fencing, MAX_LOCK_LIFETIME)
                .await?
            {
                return Ok((lock_key, fencing));
            }
            if start.elapsed() + delay > LOCK_RETRY_BUDGET {
                warn!(session = %token, "session lock not obtained within retry budget");
                return Err(StoreError::Busy);
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_LOCK_RETRY);
        }
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn get(&self, token: &RequestorToken) -> Result<Option<SessionData>, StoreError> {
        let client_token = match self.kv.get(&requestor_key(token)).await? {
            Some(value) => ClientToken::parse(&value)
                .map_err(|_| StoreError::Corrupt(format!("bad client token pointer for {token}")))?,
            None => return Ok(None),
        };
        self.load(&client_token).await
    }

    async fn client_get(&self, token: &ClientToken) -> Result<Option<SessionData>, StoreError> {
        self.load(token).await
    }

    async fn add(&self, session: SessionData) -> Result<(), StoreError> {
        if self.kv.get(&client_key(&session.client_token)).await?.is_some()
            || self.kv.get(&requestor_key(&session.requestor_token)).await?.is_some()
        {
            return Err(StoreError::TokenInUse);
        }
        self.persist(&session).await
    }

    async fn transaction(
        &self,
        token: &ClientToken,
    ) -> Result<Box<dyn SessionGuard>, StoreError> {
        let (lock_key, fencing) = self.obtain_lock(token).await?;
        let session = match self.load(token).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                let _ = self.kv.unlock(&lock_key, &fencing).await;
                return Err(StoreError::UnknownSession);
            }
            Err(e) => {
                let _ = self.kv.unlock(&lock_key, &fencing).await;
                return Err(e);
            }
        };
        let original_hash = session.state_hash()?;
        Ok(Box::new(KvGuard {
            kv: self.kv.clone(),
            conf: self.conf.clone(),
            session,
            original_hash,
            lock_key,
            fencing,
        }))
    }

    async fn live_sessions(&self) -> Result<Vec<(RequestorToken, ClientToken)>, StoreError> {
        // Key TTLs expire sessions; there is nothing to sweep.
        Ok(Vec::new())
    }

    fn subscribe(&self, _token: &ClientToken) -> Option<watch::Receiver<ServerStatus>> {
        None
    }

    async fn delete(&self, token: &RequestorToken) -> Result<(), StoreError> {
        if let Some(value) = self.kv.get(&requestor_key(token)).await? {
            if let Ok(client_token) = ClientToken::parse(&value) {
                self.kv.delete(&client_key(&client_token)).await?;
            }
        }
        self.kv.delete(&requestor_key(token)).await
    }

    async fn stop(&self) {
        debug!("remote session store stopped");
    }
}

struct KvGuard {
    kv: Arc<dyn KeyValueClient>,
    conf: Arc<Configuration>,
    session: SessionData,
    original_hash: [u8; 32],
    lock_key: String,
    fencing: String,
}

impl KvGuard {
    async fn release(&self) {
        if let Err(e) = self.kv.unlock(&self.lock_key, &self.fencing).await {
            warn!(error = %e, "failed to release session lock");
        }
    }
}

#[async_trait]
impl SessionGuard for KvGuard {
    fn session(&mut self) -> &mut SessionData {
        &mut self.session
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let result = self.persist_if_changed().await;
        self.release().await;
        result
    }

    async fn abort(self: Box<Self>) {
        self.release().await;
    }
}

impl KvGuard {
    async fn persist_if_changed(&self) -> Result<(), StoreError> {
        if self.session.state_hash()? == self.original_hash {
            return Ok(());
        }
        // The lock must still be ours before any write reaches the store.
        match self.kv.lock_ttl(&self.lock_key, &self.fencing).await? {
            Some(ttl) if !ttl.is_zero() => {}
            _ => {
                warn!(
                    session = %self.session.requestor_token,
                    "session lock expired mid-transaction, discarding changes"
                );
                return Err(StoreError::Conflict);
            }
        }
        let ttl = self.session.store_ttl(&self.conf);
        let json = serde_json::to_string(&self.session)?;
        self.kv
            .set(
                &requestor_key(&self.session.requestor_token),
                self.session.client_token.as_str(),
                ttl,
            )
            .await?;
        self.kv
            .set(&client_key(&self.session.client_token), &json, ttl)
            .await
    }
}

fn requestor_key(token: &RequestorToken) -> String {
    format!("{REQUESTOR_KEY_PREFIX}{token}")
}

fn client_key(token: &ClientToken) -> String {
    format!("{CLIENT_KEY_PREFIX}{token}")
}

fn lock_key(token: &ClientToken) -> String {
    format!("{LOCK_KEY_PREFIX}{token}")
}

fn fencing_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(22)
        .map(char::from)
        .collect()
}
