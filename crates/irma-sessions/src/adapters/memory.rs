//! Process-local session store.
//!
//! Both token indexes map to a shared entry; the entry's async mutex is the
//! session lock, so lock contention is plain mutex contention and `commit`
//! has nothing to persist (mutation happens in place). Each entry carries a
//! watch channel publishing status changes; dropping the entry closes the
//! channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::debug;

use irma_messages::{ClientToken, RequestorToken, ServerStatus};

use crate::domain::SessionData;
use crate::error::StoreError;
use crate::ports::store::{SessionGuard, SessionStore};

struct Entry {
    requestor_token: RequestorToken,
    client_token: ClientToken,
    data: Arc<Mutex<SessionData>>,
    status_tx: watch::Sender<ServerStatus>,
}

/// In-memory session store for single-replica deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    requestor: RwLock<HashMap<RequestorToken, Arc<Entry>>>,
    client: RwLock<HashMap<ClientToken, Arc<Entry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_by_client(&self, token: &ClientToken) -> Option<Arc<Entry>> {
        self.client.read().get(token).cloned()
    }
}

struct MemoryGuard {
    entry: Arc<Entry>,
    guard: OwnedMutexGuard<SessionData>,
}

#[async_trait]
impl SessionGuard for MemoryGuard {
    fn session(&mut self) -> &mut SessionData {
        &mut self.guard
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        // Mutation happened in place; only the status event remains.
        let status = self.guard.status;
        self.entry
            .status_tx
            .send_if_modified(|current| {
                if *current != status {
                    *current = status;
                    true
                } else {
                    false
                }
            });
        Ok(())
    }

    async fn abort(self: Box<Self>) {}
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &RequestorToken) -> Result<Option<SessionData>, StoreError> {
        let entry = self.requestor.read().get(token).cloned();
        match entry {
            Some(entry) => Ok(Some(entry.data.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn client_get(&self, token: &ClientToken) -> Result<Option<SessionData>, StoreError> {
        match self.entry_by_client(token) {
            Some(entry) => Ok(Some(entry.data.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn add(&self, session: SessionData) -> Result<(), StoreError> {
        let mut requestor = self.requestor.write();
        let mut client = self.client.write();
        if requestor.contains_key(&session.requestor_token)
            || client.contains_key(&session.client_token)
        {
            return Err(StoreError::TokenInUse);
        }
        let (status_tx, _) = watch::channel(session.status);
        let entry = Arc::new(Entry {
            requestor_token: session.requestor_token.clone(),
            client_token: session.client_token.clone(),
            status_tx,
            data: Arc::new(Mutex::new(session)),
        });
        requestor.insert(entry.requestor_token.clone(), entry.clone());
        client.insert(entry.client_token.clone(), entry);
        Ok(())
    }

    async fn transaction(
        &self,
        token: &ClientToken,
    ) -> Result<Box<dyn SessionGuard>, StoreError> {
        let entry = self
            .entry_by_client(token)
            .ok_or(StoreError::UnknownSession)?;
        let guard = entry.data.clone().lock_owned().await;
        Ok(Box::new(MemoryGuard { entry, guard }))
    }

    async fn live_sessions(&self) -> Result<Vec<(RequestorToken, ClientToken)>, StoreError> {
        Ok(self
            .requestor
            .read()
            .values()
            .map(|e| (e.requestor_token.clone(), e.client_token.clone()))
            .collect())
    }

    fn subscribe(&self, token: &ClientToken) -> Option<watch::Receiver<ServerStatus>> {
        self.client.read().get(token).map(|e| e.status_tx.subscribe())
    }

    async fn delete(&self, token: &RequestorToken) -> Result<(), StoreError> {
        let mut requestor = self.requestor.write();
        let mut client = self.client.write();
        if let Some(entry) = requestor.remove(token) {
            client.remove(&entry.client_token);
            debug!(session = %token, "session deleted");
            // Dropping the entry drops the watch sender and closes the
            // status channel.
        }
        Ok(())
    }

    async fn stop(&self) {
        self.requestor.write().clear();
        self.client.write().clear();
        debug!("local session store stopped");
    }
}
