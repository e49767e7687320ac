//! Session orchestration.
//!
//! `SessionServer` coordinates the domain entity, the session store and the
//! external collaborators. It is stateless across requests: every mutation
//! re-enters the store, and all session access happens under the store's
//! session lock (for client-facing operations the lock is held by the
//! middleware chain around the handler; for requestor-facing operations the
//! orchestrator opens its own transaction).

mod expiry;

pub use expiry::SWEEP_INTERVAL;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tracing::{debug, info, warn};

use irma_messages::version::{
    metadata_version, MAX_FRONTEND_PROTOCOL_VERSION, MIN_FRONTEND_PROTOCOL_VERSION,
};
use irma_messages::{
    Action, AttributeConDisCon, ClientAuth, ClientSessionRequest, Disclosure, ErrorKind,
    FrontendAuth, FrontendSessionRequest, FrontendSessionStatus, IssueCommitmentMessage,
    NextSessionData, ProtocolVersion, Qr, RequestorRequest, RequestorToken, ServerSessionResponse,
    ServerStatus, SessionPackage, SessionRequest, SessionResult,
};
use crate::config::Configuration;
use crate::domain::SessionData;
use crate::error::ServerError;
use crate::ports::outbound::{CallbackSink, CredentialCatalog, ProofVerifier};
use crate::ports::store::{with_session, SessionStore};

/// Default validity of issued credentials when the requestor leaves it
/// unset: six months.
const DEFAULT_CREDENTIAL_VALIDITY: Duration = Duration::from_secs(6 * 30 * 24 * 3600);

/// The session orchestrator.
pub struct SessionServer {
    conf: Arc<Configuration>,
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn CredentialCatalog>,
    verifier: Arc<dyn ProofVerifier>,
    callbacks: Arc<dyn CallbackSink>,
}

impl SessionServer {
    pub fn new(
        conf: Arc<Configuration>,
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn CredentialCatalog>,
        verifier: Arc<dyn ProofVerifier>,
        callbacks: Arc<dyn CallbackSink>,
    ) -> Self {
        Self {
            conf,
            store,
            catalog,
            verifier,
            callbacks,
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.conf
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Shut down the store, closing event channels and network resources.
    pub async fn stop(&self) {
        self.store.stop().await;
    }

    // ---------------------------------------------------------------------
    // Session creation
    // ---------------------------------------------------------------------

    /// Validate a requestor request and create a session for it. Returns the
    /// package the requestor needs: QR payload, requestor token and the
    /// frontend session parameters.
    pub async fn start_session(
        &self,
        rrequest: RequestorRequest,
        implicit_disclosure: AttributeConDisCon,
        frontend_auth: Option<FrontendAuth>,
    ) -> Result<SessionPackage, ServerError> {
        let mut rrequest = rrequest;
        let action = rrequest.request.action();

        rrequest
            .request
            .validate()
            .map_err(|e| ServerError::new(ErrorKind::InvalidRequest, e.to_string()))?;
        self.catalog.validate_request(&rrequest.request).await?;
        self.check_return_url_augmentation(&rrequest.request)?;

        if let SessionRequest::Issuance(isreq) = &mut rrequest.request {
            self.prepare_issuance(isreq).await?;
        }

        let frontend_auth = frontend_auth.unwrap_or_else(FrontendAuth::random);
        let mut session = SessionData::new(rrequest, implicit_disclosure, frontend_auth.clone());

        let requestor_token = session.requestor_token.to_string();
        let base = session.rrequest.request.base_mut();
        if self.conf.augment_client_return_url && base.augment_return_url {
            if let Some(url) = &mut base.client_return_url {
                let separator = if url.contains('?') { '&' } else { '?' };
                url.push(separator);
                url.push_str("token=");
                url.push_str(&requestor_token);
            }
        }
        base.nonce = Some(fresh_nonce());
        base.context = Some(1);

        debug!(session = %session.requestor_token, "new session started");

        let qr = Qr::new(self.conf.session_url(&session.client_token), action);
        let token = session.requestor_token.clone();
        self.store.add(session).await?;

        Ok(SessionPackage {
            session_ptr: qr,
            token,
            frontend_request: FrontendSessionRequest {
                authorization: frontend_auth,
                pairing_hint: matches!(action, Action::Issuing).then_some(true),
                min_protocol_version: MIN_FRONTEND_PROTOCOL_VERSION,
                max_protocol_version: MAX_FRONTEND_PROTOCOL_VERSION,
            },
        })
    }

    fn check_return_url_augmentation(&self, request: &SessionRequest) -> Result<(), ServerError> {
        let base = request.base();
        if !base.augment_return_url {
            return Ok(());
        }
        if !self.conf.augment_client_return_url {
            return Err(ServerError::new(
                ErrorKind::InvalidRequest,
                "augmenting client return url not enabled in server configuration",
            ));
        }
        if base.client_return_url.is_none() {
            return Err(ServerError::new(
                ErrorKind::InvalidRequest,
                "cannot augment empty client return url",
            ));
        }
        Ok(())
    }

    /// Issuance-specific request preparation: the issuer must hold a usable
    /// key pair, credentials get the current key counter and a default
    /// validity, and revocation-enabled credentials need a revocation key.
    async fn prepare_issuance(
        &self,
        isreq: &mut irma_messages::IssuanceRequest,
    ) -> Result<(), ServerError> {
        let now = SystemTime::now();
        for cred in &mut isreq.credentials {
            let keys = self.catalog.issuance_keys(&cred.credential_type).await?;
            if keys.expiry <= now {
                return Err(ServerError::new(
                    ErrorKind::InvalidRequest,
                    format!(
                        "cannot issue using expired public key for {}",
                        cred.credential_type
                    ),
                ));
            }
            cred.key_counter = Some(keys.counter);

            let revocation_requested = isreq.base.revocation.contains(&cred.credential_type);
            if revocation_requested && !keys.revocation_supported {
                return Err(ServerError::new(
                    ErrorKind::Revocation,
                    format!("revocation not supported for {}", cred.credential_type),
                ));
            }
            if revocation_requested && cred.revocation_key.is_none() {
                return Err(ServerError::new(
                    ErrorKind::Revocation,
                    format!(
                        "revocation enabled for {} but no revocationKey specified",
                        cred.credential_type
                    ),
                ));
            }

            let validity = *cred.validity.get_or_insert_with(|| {
                let default = now + DEFAULT_CREDENTIAL_VALIDITY;
                default
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            });
            let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            if validity < now_secs {
                return Err(ServerError::new(
                    ErrorKind::InvalidRequest,
                    "cannot issue expired credentials",
                ));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Client operations (invoked under the session lock)
    // ---------------------------------------------------------------------

    /// The client fetches the session: negotiate a protocol version, bind a
    /// client secret, and move to CONNECTED (or PAIRING when enabled).
    pub async fn client_get_request(
        &self,
        session: &mut SessionData,
        min_client: ProtocolVersion,
        max_client: ProtocolVersion,
    ) -> Result<ClientSessionRequest, ServerError> {
        if session.status != ServerStatus::Initialized {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                "session already started or finished",
            ));
        }

        let version = match session.choose_protocol_version(min_client, max_client) {
            Ok(version) => version,
            Err(e) => {
                session.fail(e.kind, &e.message);
                return Err(e);
            }
        };

        session.version = Some(version);
        session.mark_alive();
        session.client_auth = Some(ClientAuth::random());

        let next = if session.options.pairing_method == irma_messages::PairingMethod::None {
            ServerStatus::Connected
        } else {
            ServerStatus::Pairing
        };
        session.set_status(next)?;

        Ok(session.client_session_request())
    }

    /// The client posts disclosure (or signature) proofs.
    pub async fn client_respond_disclosure(
        &self,
        session: &mut SessionData,
        disclosure: &Disclosure,
    ) -> Result<ServerSessionResponse, ServerError> {
        if !matches!(session.action, Action::Disclosing | Action::Signing) {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                "endpoint does not match session type",
            ));
        }
        self.check_connected(session)?;
        session.mark_alive();

        let request = session.verification_request();
        let outcome = match self.verifier.verify_disclosure(&request, disclosure).await {
            Ok(outcome) => outcome,
            Err(e) => {
                session.fail(e.kind, &e.message);
                return Err(e);
            }
        };

        session.result.proof_status = Some(outcome.proof_status);
        session.result.disclosed = Some(outcome.disclosed);
        if session.action == Action::Signing {
            session.result.signature = outcome.signature;
        }

        self.finish_response(session, outcome.proof_status).await?;

        Ok(ServerSessionResponse {
            proof_status: outcome.proof_status,
            issue_signatures: None,
            next_session: session.next.clone(),
        })
    }

    /// The client posts issuance commitments.
    pub async fn client_respond_issuance(
        &self,
        session: &mut SessionData,
        commitments: &IssueCommitmentMessage,
    ) -> Result<ServerSessionResponse, ServerError> {
        if session.action != Action::Issuing {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                "endpoint does not match session type",
            ));
        }
        self.check_connected(session)?;
        session.mark_alive();

        let request = session.verification_request();

        // Collect and verify the keyshare proofs this request requires.
        // Verified proofs are kept on the session so a retried request does
        // not re-verify them.
        let schemes = self.catalog.keyshare_schemes(&request).await?;
        for scheme in schemes {
            if session.kss_proofs.contains_key(&scheme) {
                continue;
            }
            let jwt = match commitments.proof_p_jwts.get(scheme.as_str()) {
                Some(jwt) => jwt,
                None => {
                    let e = ServerError::new(
                        ErrorKind::Keyshare,
                        format!("no keyshare proof included for scheme {scheme}"),
                    );
                    session.fail(e.kind, &e.message);
                    return Err(e);
                }
            };
            match self.verifier.verify_keyshare_proof(&scheme, jwt).await {
                Ok(proof) => {
                    session.kss_proofs.insert(scheme, proof);
                }
                Err(e) => {
                    session.fail(e.kind, &e.message);
                    return Err(e);
                }
            }
        }

        let mdv = metadata_version(session.version.unwrap_or(irma_messages::MAX_PROTOCOL_VERSION));
        let outcome = match self
            .verifier
            .issue(&request, commitments, &session.kss_proofs, mdv)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                session.fail(e.kind, &e.message);
                return Err(e);
            }
        };

        session.result.proof_status = Some(outcome.proof_status);
        session.result.disclosed = Some(outcome.disclosed);

        self.finish_response(session, outcome.proof_status).await?;

        let signatures = (outcome.proof_status == irma_messages::ProofStatus::Valid)
            .then_some(outcome.signatures);
        Ok(ServerSessionResponse {
            proof_status: outcome.proof_status,
            issue_signatures: signatures,
            next_session: session.next.clone(),
        })
    }

    fn check_connected(&self, session: &SessionData) -> Result<(), ServerError> {
        if session.status != ServerStatus::Connected {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                "session not yet started or already finished",
            ));
        }
        Ok(())
    }

    /// Terminal bookkeeping of a client response: set up the chained session
    /// on success, then transition.
    async fn finish_response(
        &self,
        session: &mut SessionData,
        proof_status: irma_messages::ProofStatus,
    ) -> Result<(), ServerError> {
        if proof_status != irma_messages::ProofStatus::Valid {
            session.set_status(ServerStatus::Cancelled)?;
            return Ok(());
        }
        if let Some(next) = session.rrequest.next_session.clone() {
            match self.start_next_session(session, &next).await {
                Ok(Some(qr)) => {
                    session.next = Some(qr.clone());
                    session.result.next_session = Some(qr);
                }
                Ok(None) => {}
                Err(e) => {
                    session.fail(e.kind, &e.message);
                    return Err(e);
                }
            }
        }
        session.set_status(ServerStatus::Done)
    }

    /// Fetch and start the chained session. The new session shares no state
    /// with its parent: fresh tokens, fresh secrets, and in particular no
    /// inherited implicit disclosure.
    async fn start_next_session(
        &self,
        session: &SessionData,
        next: &NextSessionData,
    ) -> Result<Option<Qr>, ServerError> {
        let rrequest = match self
            .callbacks
            .next_session(&next.url, &session.result)
            .await
            .map_err(|e| e.wrap("fetching next session"))?
        {
            Some(rrequest) => rrequest,
            None => return Ok(None),
        };
        if let Some(expected) = next.session_type {
            if rrequest.request.action() != expected {
                return Err(ServerError::new(
                    ErrorKind::InvalidRequest,
                    format!(
                        "chained session type mismatch: expected {expected}, got {}",
                        rrequest.request.action()
                    ),
                ));
            }
        }
        let package = Box::pin(self.start_session(
            rrequest,
            AttributeConDisCon::default(),
            None,
        ))
        .await?;
        info!(
            session = %session.requestor_token,
            next = %package.token,
            "chained session started"
        );
        Ok(Some(package.session_ptr))
    }

    /// Cancel on behalf of the wallet. Cancelling a finished session is a
    /// no-op.
    pub fn client_cancel(&self, session: &mut SessionData) -> Result<(), ServerError> {
        if session.status.is_terminal() {
            return Ok(());
        }
        session.mark_alive();
        session.result = SessionResult::new(
            session.requestor_token.clone(),
            session.action,
            session.result.legacy_session,
        );
        session.set_status(ServerStatus::Cancelled)
    }

    // ---------------------------------------------------------------------
    // Frontend operations (invoked under the session lock)
    // ---------------------------------------------------------------------

    /// Status view for the frontend poller; records what the frontend has
    /// seen so event emission can be throttled against it. Terminal sessions
    /// are frozen and only read.
    pub fn frontend_status(&self, session: &mut SessionData) -> FrontendSessionStatus {
        if !session.status.is_terminal() {
            session.prev_status = session.status;
        }
        FrontendSessionStatus {
            status: session.status,
            next_session: session.next.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Requestor operations
    // ---------------------------------------------------------------------

    /// Current status of a session, by requestor token.
    pub async fn session_status(
        &self,
        token: &RequestorToken,
    ) -> Result<ServerStatus, ServerError> {
        let session = self
            .store
            .get(token)
            .await?
            .ok_or_else(|| ServerError::kind(ErrorKind::SessionUnknown))?;
        Ok(session.status)
    }

    /// Result envelope of a session, by requestor token.
    pub async fn session_result(
        &self,
        token: &RequestorToken,
    ) -> Result<SessionResult, ServerError> {
        let session = self
            .store
            .get(token)
            .await?
            .ok_or_else(|| ServerError::kind(ErrorKind::SessionUnknown))?;
        Ok(session.result)
    }

    /// Cancel a session on behalf of the requestor.
    pub async fn cancel_session(&self, token: &RequestorToken) -> Result<(), ServerError> {
        let session = self
            .store
            .get(token)
            .await?
            .ok_or_else(|| ServerError::kind(ErrorKind::SessionUnknown))?;

        let mut finished: Option<SessionData> = None;
        with_session(self.store.as_ref(), &session.client_token, |session| {
            let was_terminal = session.status.is_terminal();
            self.client_cancel(session)?;
            if !was_terminal {
                finished = Some(session.clone());
            }
            Ok(())
        })
        .await?;

        if let Some(data) = finished {
            self.dispatch_result_callback(data);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Result callbacks
    // ---------------------------------------------------------------------

    /// Deliver the session result to the requestor's callback URL, when one
    /// is configured. Runs out-of-band: callers invoke this after the
    /// transaction that made the session terminal has committed. Delivery
    /// failures are logged and never change session state.
    pub fn dispatch_result_callback(&self, session: SessionData) {
        let url = match &session.rrequest.callback_url {
            Some(url) => url.clone(),
            None => return,
        };
        let sink = self.callbacks.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.deliver_result(&url, &session.result).await {
                warn!(
                    session = %session.requestor_token,
                    error = %e,
                    "result callback delivery failed"
                );
            }
        });
    }
}

/// 256-bit random challenge nonce, hex encoded.
fn fresh_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
