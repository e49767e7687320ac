//! The session entity.
//!
//! A `SessionData` aggregates everything the server knows about one protocol
//! instance. It is mutated only under the session lock of the store that owns
//! it, and it serializes to a canonical camelCase JSON form. That form is
//! both the remote-store payload and the input of [`SessionData::state_hash`];
//! deliberate changes to the serialization therefore invalidate sessions that
//! are live in a remote store at upgrade time.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use irma_messages::{
    new_pairing_code, Action, AttributeConDisCon, ClientAuth, ClientSessionRequest, ClientToken,
    ErrorKind, FrontendAuth, FrontendOptionsRequest, PairingMethod, ProtocolVersion, Qr,
    RemoteError, RequestorRequest, RequestorToken, SchemeManagerIdentifier, ServerStatus,
    SessionOptions, SessionRequest, SessionResult, MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};
use irma_messages::protocol::LD_CONTEXT_CLIENT_SESSION_REQUEST;

use crate::config::Configuration;
use crate::domain::cache::CachedResponse;
use crate::error::ServerError;

/// Server-side state of one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub action: Action,
    pub requestor_token: RequestorToken,
    pub client_token: ClientToken,
    /// Negotiated protocol version, set when the client first connects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ProtocolVersion>,
    /// The original requestor request.
    pub rrequest: RequestorRequest,
    /// Whether the request is expressible in the pre-condiscon format.
    pub legacy_compatible: bool,
    pub status: ServerStatus,
    /// Last status observed by the frontend poller.
    pub prev_status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_cache: Option<CachedResponse>,
    /// Refreshed on every state change; drives expiry and cache freshness.
    #[serde(with = "unix_millis")]
    pub last_active: SystemTime,
    pub result: SessionResult,
    /// Verified keyshare proofs per scheme, collected during issuance.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub kss_proofs: HashMap<SchemeManagerIdentifier, serde_json::Value>,
    /// QR of the chained session, once constructed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Qr>,
    pub frontend_auth: FrontendAuth,
    /// Attributes forced into disclosure regardless of the requestor request.
    #[serde(default, skip_serializing_if = "AttributeConDisCon::is_empty")]
    pub implicit_disclosure: AttributeConDisCon,
    pub options: SessionOptions,
    /// Bound to the wallet when it connects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_auth: Option<ClientAuth>,
}

impl SessionData {
    /// Fresh session in INITIALIZED state with newly minted tokens.
    pub fn new(
        rrequest: RequestorRequest,
        implicit_disclosure: AttributeConDisCon,
        frontend_auth: FrontendAuth,
    ) -> Self {
        let action = rrequest.request.action();
        let legacy_compatible = rrequest.request.legacy_compatible();
        let requestor_token = RequestorToken::random();
        let client_token = ClientToken::random();
        Self {
            action,
            result: SessionResult::new(requestor_token.clone(), action, legacy_compatible),
            requestor_token,
            client_token,
            version: None,
            rrequest,
            legacy_compatible,
            status: ServerStatus::Initialized,
            prev_status: ServerStatus::Initialized,
            response_cache: None,
            last_active: SystemTime::now(),
            kss_proofs: HashMap::new(),
            next: None,
            frontend_auth,
            implicit_disclosure,
            options: SessionOptions::default(),
            client_auth: None,
        }
    }

    pub fn request(&self) -> &SessionRequest {
        &self.rrequest.request
    }

    /// Refresh the activity timestamp, delaying expiry.
    pub fn mark_alive(&mut self) {
        self.last_active = SystemTime::now();
        debug!(
            session = %self.requestor_token,
            "session marked active, deletion delayed"
        );
    }

    /// Move the session to `status`, keeping the result envelope in sync.
    /// Illegal transitions are rejected; the machine never regresses.
    pub fn set_status(&mut self, status: ServerStatus) -> Result<(), ServerError> {
        if !self.status.can_transition_to(status) {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                format!("illegal status transition {} -> {}", self.status, status),
            ));
        }
        info!(session = %self.requestor_token, status = %status, "session status updated");
        self.status = status;
        self.result.status = status;
        Ok(())
    }

    /// Cancel the session with the given error, replacing the result with an
    /// error envelope. Returns the wire error for the current request.
    pub fn fail(&mut self, kind: ErrorKind, message: &str) -> RemoteError {
        let rerr = RemoteError::new(kind, message);
        if self.status.is_terminal() {
            warn!(
                session = %self.requestor_token,
                error = %rerr,
                "ignoring failure on finished session"
            );
            return rerr;
        }
        let mut result = SessionResult::new(
            self.requestor_token.clone(),
            self.action,
            self.result.legacy_session,
        );
        result.err = Some(rerr.clone());
        self.result = result;
        // From a non-terminal status this transition cannot be rejected.
        let _ = self.set_status(ServerStatus::Cancelled);
        rerr
    }

    /// Minimum protocol version this session requires, derived from the
    /// requested features.
    pub fn minimum_version(&self) -> ProtocolVersion {
        let mut min = MIN_PROTOCOL_VERSION;
        if !self.legacy_compatible {
            min = min.max(ProtocolVersion::new(2, 5));
        }
        if self.request().revocation_requested() {
            min = min.max(ProtocolVersion::new(2, 6));
        }
        if self.rrequest.next_session.is_some() {
            min = min.max(ProtocolVersion::new(2, 7));
        }
        min
    }

    /// Negotiate a protocol version against the client's advertised window.
    pub fn choose_protocol_version(
        &self,
        min_client: ProtocolVersion,
        max_client: ProtocolVersion,
    ) -> Result<ProtocolVersion, ServerError> {
        let min_server = self.minimum_version();
        if min_client > MAX_PROTOCOL_VERSION || max_client < min_server || max_client < min_client
        {
            warn!(
                session = %self.requestor_token,
                "protocol version negotiation failed, min={min_client} max={max_client} \
                 minServer={min_server} maxServer={MAX_PROTOCOL_VERSION}"
            );
            return Err(ServerError::new(
                ErrorKind::ProtocolVersionNotSupported,
                format!("min={min_client} max={max_client}"),
            ));
        }
        Ok(max_client.min(MAX_PROTOCOL_VERSION))
    }

    /// The message returned when the client fetches the session. While
    /// pairing is pending the request itself is withheld.
    pub fn client_session_request(&self) -> ClientSessionRequest {
        let request = if self.options.pairing_method == PairingMethod::None {
            Some(self.client_visible_request())
        } else {
            None
        };
        ClientSessionRequest {
            ld_context: LD_CONTEXT_CLIENT_SESSION_REQUEST.to_string(),
            protocol_version: self.version,
            options: self.options.clone(),
            request,
        }
    }

    /// The request as shown to the client: issuance requests have their
    /// revocation keys stripped.
    pub fn client_visible_request(&self) -> SessionRequest {
        let mut request = self.rrequest.request.clone();
        if let SessionRequest::Issuance(isreq) = &mut request {
            for cred in &mut isreq.credentials {
                cred.revocation_supported = cred.revocation_key.is_some();
                cred.revocation_key = None;
            }
        }
        request
    }

    /// The request against which proofs are verified: the requestor's
    /// disclosure strengthened with the implicit disclosure.
    pub fn verification_request(&self) -> SessionRequest {
        let mut request = self.rrequest.request.clone();
        request.disclose_mut().extend_with(&self.implicit_disclosure);
        request
    }

    /// Change the session options on behalf of the frontend. Only possible
    /// before the client connects.
    pub fn update_frontend_options(
        &mut self,
        request: &FrontendOptionsRequest,
    ) -> Result<SessionOptions, ServerError> {
        if self.status != ServerStatus::Initialized {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                "options can only be updated before the client connects",
            ));
        }
        match request.pairing_method {
            None => {}
            Some(PairingMethod::None) => {
                self.options.pairing_method = PairingMethod::None;
                self.options.pairing_code = None;
            }
            Some(PairingMethod::Pin) => {
                self.options.pairing_method = PairingMethod::Pin;
                self.options.pairing_code = Some(new_pairing_code());
            }
        }
        Ok(self.options.clone())
    }

    /// Complete the pairing between frontend and client.
    pub fn pairing_completed(&mut self) -> Result<(), ServerError> {
        if self.status != ServerStatus::Pairing {
            return Err(ServerError::new(
                ErrorKind::UnexpectedRequest,
                "pairing was not enabled",
            ));
        }
        self.set_status(ServerStatus::Connected)
    }

    /// The client timeout from the requestor request; 0 means unset.
    pub fn client_timeout(&self) -> Option<Duration> {
        match self.rrequest.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// How long the session may stay in its current status before the sweep
    /// acts on it.
    fn lifetime(&self, conf: &Configuration) -> Duration {
        if self.status.is_terminal() {
            conf.result_lifetime()
        } else if self.status == ServerStatus::Initialized {
            self.client_timeout()
                .unwrap_or_else(|| conf.max_session_duration())
        } else {
            conf.max_session_duration()
        }
    }

    /// Time since the last state change. Wallclock regressions count as zero.
    pub fn idle_time(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_active).unwrap_or_default()
    }

    /// Whether the session has outlived its current lifetime.
    pub fn expired(&self, conf: &Configuration, now: SystemTime) -> bool {
        self.idle_time(now) > self.lifetime(conf)
    }

    /// Remaining time before expiry; drives per-request deadlines.
    pub fn remaining(&self, conf: &Configuration, now: SystemTime) -> Duration {
        self.lifetime(conf).saturating_sub(self.idle_time(now))
    }

    /// Key TTL when this session is written to a remote store. Finished
    /// sessions stay around for one more lifetime so results can be polled;
    /// sessions awaiting their first client contact follow the client
    /// timeout, bounded by twice the session lifetime.
    pub fn store_ttl(&self, conf: &Configuration) -> Duration {
        let max = conf.max_session_duration();
        if self.status.is_terminal() {
            max
        } else if self.status == ServerStatus::Initialized {
            match self.client_timeout() {
                Some(ct) => ct.min(2 * max),
                None => 2 * max,
            }
        } else {
            2 * max
        }
    }

    /// SHA-256 over the canonical serialization, used to detect whether a
    /// transaction actually changed the session.
    pub fn state_hash(&self) -> Result<[u8; 32], serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(Sha256::digest(&bytes).into())
    }
}

mod unix_millis {
    //! Wallclock timestamps serialize as unix milliseconds, keeping the
    //! canonical session form independent of platform time formats.

    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let millis = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        s.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{disclosure_request, issuance_request};

    fn session() -> SessionData {
        SessionData::new(
            disclosure_request("pbdf.pbdf.email.email"),
            AttributeConDisCon::default(),
            FrontendAuth::random(),
        )
    }

    #[test]
    fn test_new_session_state() {
        let s = session();
        assert_eq!(s.status, ServerStatus::Initialized);
        assert_eq!(s.prev_status, ServerStatus::Initialized);
        assert_eq!(s.result.status, ServerStatus::Initialized);
        assert_eq!(s.result.token, s.requestor_token);
        assert!(s.legacy_compatible);
        assert!(s.client_auth.is_none());
    }

    #[test]
    fn test_status_transitions_enforced() {
        let mut s = session();
        s.set_status(ServerStatus::Connected).unwrap();
        assert_eq!(s.result.status, ServerStatus::Connected);

        // No regressions.
        assert!(s.set_status(ServerStatus::Initialized).is_err());
        assert!(s.set_status(ServerStatus::Pairing).is_err());

        s.set_status(ServerStatus::Done).unwrap();
        // Terminal states are frozen.
        assert!(s.set_status(ServerStatus::Connected).is_err());
        assert!(s.set_status(ServerStatus::Cancelled).is_err());
    }

    #[test]
    fn test_fail_cancels_and_fills_result() {
        let mut s = session();
        let rerr = s.fail(ErrorKind::ProtocolVersionNotSupported, "min=1.0 max=1.3");
        assert_eq!(s.status, ServerStatus::Cancelled);
        assert_eq!(s.result.status, ServerStatus::Cancelled);
        assert_eq!(
            s.result.err.as_ref().unwrap().error_name,
            "protocolVersionNotSupported"
        );
        assert_eq!(rerr.status, 400);
    }

    #[test]
    fn test_fail_on_finished_session_is_ignored() {
        let mut s = session();
        s.set_status(ServerStatus::Done).unwrap();
        let before = s.result.clone();
        s.fail(ErrorKind::Crypto, "late failure");
        assert_eq!(s.status, ServerStatus::Done);
        assert!(before.err.is_none() && s.result.err.is_none());
    }

    #[test]
    fn test_minimum_version_features() {
        // Plain legacy-compatible disclosure: base version.
        assert_eq!(session().minimum_version(), ProtocolVersion::new(2, 4));

        // Revocation raises the floor to 2.6.
        let mut rrequest = issuance_request("pbdf.pbdf.email");
        rrequest.request.base_mut().revocation =
            vec![irma_messages::CredentialTypeIdentifier::from("pbdf.pbdf.email")];
        let s = SessionData::new(
            rrequest,
            AttributeConDisCon::default(),
            FrontendAuth::random(),
        );
        assert_eq!(s.minimum_version(), ProtocolVersion::new(2, 6));

        // A chained session raises it to 2.7.
        let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
        rrequest.next_session = Some(irma_messages::NextSessionData {
            url: "https://requestor.example.com/next".to_string(),
            session_type: None,
        });
        let s = SessionData::new(
            rrequest,
            AttributeConDisCon::default(),
            FrontendAuth::random(),
        );
        assert_eq!(s.minimum_version(), ProtocolVersion::new(2, 7));
    }

    #[test]
    fn test_version_negotiation() {
        let s = session();

        // The client window is clamped to the server maximum.
        assert_eq!(
            s.choose_protocol_version(ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 9))
                .unwrap(),
            MAX_PROTOCOL_VERSION
        );
        assert_eq!(
            s.choose_protocol_version(ProtocolVersion::new(2, 4), ProtocolVersion::new(2, 6))
                .unwrap(),
            ProtocolVersion::new(2, 6)
        );

        // An ancient client fails the negotiation.
        let err = s
            .choose_protocol_version(ProtocolVersion::new(1, 0), ProtocolVersion::new(1, 3))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolVersionNotSupported);

        // An inverted window fails it too.
        assert!(s
            .choose_protocol_version(ProtocolVersion::new(2, 6), ProtocolVersion::new(2, 5))
            .is_err());
    }

    #[test]
    fn test_client_request_withheld_while_pairing() {
        let mut s = session();
        s.options.pairing_method = PairingMethod::Pin;
        s.options.pairing_code = Some("12345678".to_string());
        assert!(s.client_session_request().request.is_none());

        s.options.pairing_method = PairingMethod::None;
        assert!(s.client_session_request().request.is_some());
    }

    #[test]
    fn test_issuance_revocation_keys_stripped_for_client() {
        let mut rrequest = issuance_request("pbdf.pbdf.email");
        if let SessionRequest::Issuance(isreq) = &mut rrequest.request {
            isreq.credentials[0].revocation_key = Some("rev-key-1".to_string());
        }
        let s = SessionData::new(
            rrequest,
            AttributeConDisCon::default(),
            FrontendAuth::random(),
        );
        match s.client_visible_request() {
            SessionRequest::Issuance(isreq) => {
                assert!(isreq.credentials[0].revocation_key.is_none());
                assert!(isreq.credentials[0].revocation_supported);
            }
            _ => panic!("expected issuance request"),
        }
    }

    #[test]
    fn test_frontend_options() {
        let mut s = session();
        let opts = s
            .update_frontend_options(&FrontendOptionsRequest {
                pairing_method: Some(PairingMethod::Pin),
            })
            .unwrap();
        assert_eq!(opts.pairing_method, PairingMethod::Pin);
        let code = opts.pairing_code.unwrap();
        assert_eq!(code.len(), 8);
        assert!(code.bytes().all(|b| b.is_ascii_digit()));

        // Switching back to none drops the code.
        let opts = s
            .update_frontend_options(&FrontendOptionsRequest {
                pairing_method: Some(PairingMethod::None),
            })
            .unwrap();
        assert!(opts.pairing_code.is_none());

        // Once the client connected, options are frozen.
        s.set_status(ServerStatus::Connected).unwrap();
        assert!(s
            .update_frontend_options(&FrontendOptionsRequest::default())
            .is_err());
    }

    #[test]
    fn test_pairing_completion() {
        let mut s = session();
        assert!(s.pairing_completed().is_err());

        s.set_status(ServerStatus::Pairing).unwrap();
        s.pairing_completed().unwrap();
        assert_eq!(s.status, ServerStatus::Connected);
    }

    #[test]
    fn test_expiry_uses_client_timeout_only_when_initialized() {
        let conf = Configuration {
            url: "https://irma.example.com".to_string(),
            ..Configuration::default()
        };
        let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
        rrequest.timeout = 60;
        let mut s = SessionData::new(
            rrequest,
            AttributeConDisCon::default(),
            FrontendAuth::random(),
        );

        let now = s.last_active + Duration::from_secs(61);
        assert!(s.expired(&conf, now));

        // Once connected, the session lifetime applies instead.
        s.set_status(ServerStatus::Connected).unwrap();
        assert!(!s.expired(&conf, now));
        assert!(s.expired(&conf, s.last_active + Duration::from_secs(5 * 60 + 1)));
    }

    #[test]
    fn test_store_ttl_by_status() {
        let conf = Configuration {
            url: "https://irma.example.com".to_string(),
            ..Configuration::default()
        };
        let max = conf.max_session_duration();

        let mut rrequest = disclosure_request("pbdf.pbdf.email.email");
        rrequest.timeout = 60;
        let mut s = SessionData::new(
            rrequest,
            AttributeConDisCon::default(),
            FrontendAuth::random(),
        );
        assert_eq!(s.store_ttl(&conf), Duration::from_secs(60));

        s.rrequest.timeout = 0;
        assert_eq!(s.store_ttl(&conf), 2 * max);

        s.set_status(ServerStatus::Connected).unwrap();
        assert_eq!(s.store_ttl(&conf), 2 * max);

        s.set_status(ServerStatus::Done).unwrap();
        assert_eq!(s.store_ttl(&conf), max);
    }

    #[test]
    fn test_state_hash_tracks_changes() {
        let mut s = session();
        let h1 = s.state_hash().unwrap();
        assert_eq!(h1, s.state_hash().unwrap());

        s.set_status(ServerStatus::Connected).unwrap();
        assert_ne!(h1, s.state_hash().unwrap());
    }

    #[test]
    fn test_canonical_serialization_roundtrip() {
        let s = session();
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.requestor_token, s.requestor_token);
        assert_eq!(back.client_token, s.client_token);
        assert_eq!(back.status, s.status);
        assert_eq!(back.state_hash().unwrap(), s.state_hash().unwrap());
    }
}
