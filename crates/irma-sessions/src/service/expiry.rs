//! Periodic expiry sweep.
//!
//! Only stores that enumerate their sessions need sweeping (the local store);
//! remote stores expire keys by TTL and report no live sessions. The sweep is
//! idempotent and safe to run on several replicas at once.
//!
//! A session found expired and non-terminal is moved to TIMEOUT on the pass
//! that detects it, with the result callback fired immediately. Deletion
//! happens on a later pass, once the result lifetime has elapsed since the
//! terminal transition, so the requestor can still poll the TIMEOUT result in
//! between.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use irma_messages::ServerStatus;

use crate::domain::SessionData;
use crate::ports::store::with_session;
use crate::service::SessionServer;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

impl SessionServer {
    /// One sweep pass over all enumerable sessions.
    pub async fn sweep_expired(&self) {
        let sessions = match self.store().live_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "expiry sweep could not list sessions");
                return;
            }
        };
        let now = SystemTime::now();

        for (requestor_token, client_token) in sessions {
            let mut timed_out: Option<SessionData> = None;
            let mut delete = false;

            let result = with_session(self.store().as_ref(), &client_token, |session| {
                if !session.expired(self.configuration(), now) {
                    return Ok(());
                }
                if session.status.is_terminal() {
                    info!(session = %session.requestor_token, "deleting session");
                    delete = true;
                } else {
                    info!(session = %session.requestor_token, "session expired");
                    session.mark_alive();
                    session.set_status(ServerStatus::Timeout)?;
                    timed_out = Some(session.clone());
                }
                Ok(())
            })
            .await;

            if let Err(e) = result {
                warn!(
                    session = %requestor_token,
                    error = %e,
                    "expiry sweep skipped session"
                );
                continue;
            }
            if let Some(data) = timed_out {
                self.dispatch_result_callback(data);
            }
            if delete {
                if let Err(e) = self.store().delete(&requestor_token).await {
                    warn!(session = %requestor_token, error = %e, "session deletion failed");
                }
            }
        }
    }

    /// Spawn the long-lived sweep task.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                server.sweep_expired().await;
            }
        })
    }
}
