//! Test doubles shared by unit and integration tests: an in-memory
//! key-value client with fault injection, mock collaborators, and sample
//! requests.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use irma_messages::{
    AttributeConDisCon, AttributeProofStatus, AttributeRequest, AttributeTypeIdentifier,
    CredentialRequest, CredentialTypeIdentifier, DisclosedAttribute, Disclosure, DisclosureRequest,
    ErrorKind, IssuanceRequest, IssueCommitmentMessage, ProofStatus, RequestorRequest,
    SchemeManagerIdentifier, SessionRequest, SessionResult, SignatureRequest,
};

use crate::config::Configuration;
use crate::error::{ServerError, StoreError};
use crate::ports::outbound::{
    CallbackSink, CredentialCatalog, IssuanceKeys, IssuanceResult, KeyValueClient, ProofVerifier,
    VerificationResult,
};

// ---------------------------------------------------------------------------
// Sample requests and configuration
// ---------------------------------------------------------------------------

pub fn test_configuration() -> Configuration {
    Configuration {
        url: "https://irma.example.com".to_string(),
        ..Configuration::default()
    }
}

/// A disclosure request over a single attribute.
pub fn disclosure_request(attr: &str) -> RequestorRequest {
    RequestorRequest::from_request(SessionRequest::Disclosure(DisclosureRequest {
        base: Default::default(),
        disclose: AttributeConDisCon(vec![vec![vec![AttributeRequest::new(attr)]]]),
    }))
}

/// A signature request over a single attribute.
pub fn signature_request(attr: &str, message: &str) -> RequestorRequest {
    RequestorRequest::from_request(SessionRequest::Signature(SignatureRequest {
        base: Default::default(),
        disclose: AttributeConDisCon(vec![vec![vec![AttributeRequest::new(attr)]]]),
        message: message.to_string(),
    }))
}

/// An issuance request for a single credential.
pub fn issuance_request(credential: &str) -> RequestorRequest {
    let mut attributes = HashMap::new();
    attributes.insert("email".to_string(), "a@b.example".to_string());
    RequestorRequest::from_request(SessionRequest::Issuance(IssuanceRequest {
        base: Default::default(),
        credentials: vec![CredentialRequest {
            credential_type: CredentialTypeIdentifier::from(credential),
            validity: None,
            key_counter: None,
            attributes,
            revocation_key: None,
            revocation_supported: false,
        }],
        disclose: AttributeConDisCon::default(),
    }))
}

// ---------------------------------------------------------------------------
// In-memory key-value client with fault injection
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeKvState {
    entries: HashMap<String, (String, Instant)>,
    drop_writes: bool,
    expire_locks: bool,
    unavailable: bool,
}

/// In-memory `KeyValueClient` with millisecond TTL bookkeeping and fault
/// injection, standing in for the remote store in tests.
#[derive(Default)]
pub struct FakeKv {
    state: Mutex<FakeKvState>,
}

impl FakeKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silently drop all subsequent `set` calls.
    pub fn drop_writes(&self, enabled: bool) {
        self.state.lock().drop_writes = enabled;
    }

    /// Report every held lock as expired, as if the lock TTL elapsed during
    /// a stalled transaction.
    pub fn expire_locks(&self, enabled: bool) {
        self.state.lock().expire_locks = enabled;
    }

    /// Fail every operation with `StoreError::Unavailable`.
    pub fn unavailable(&self, enabled: bool) {
        self.state.lock().unavailable = enabled;
    }

    /// Raw value under `key`, ignoring faults (test inspection).
    pub fn raw_get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        purge_expired(&mut state);
        state.entries.get(key).map(|(v, _)| v.clone())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.state.lock().unavailable {
            Err(StoreError::Unavailable("fault injected".to_string()))
        } else {
            Ok(())
        }
    }
}

fn purge_expired(state: &mut FakeKvState) {
    let now = Instant::now();
    state.entries.retain(|_, (_, deadline)| *deadline > now);
}

#[async_trait]
impl KeyValueClient for FakeKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        purge_expired(&mut state);
        Ok(state.entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.drop_writes {
            return Ok(());
        }
        state
            .entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.lock().entries.remove(key);
        Ok(())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        purge_expired(&mut state);
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state
            .entries
            .insert(key.to_string(), (token.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn lock_ttl(&self, key: &str, token: &str) -> Result<Option<Duration>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.expire_locks {
            return Ok(None);
        }
        purge_expired(&mut state);
        match state.entries.get(key) {
            Some((held, deadline)) if held == token => {
                Ok(Some(deadline.saturating_duration_since(Instant::now())))
            }
            _ => Ok(None),
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some((held, _)) = state.entries.get(key) {
            if held == token {
                state.entries.remove(key);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Credential catalog double: accepts everything unless told otherwise.
pub struct MockCatalog {
    pub reject: Option<ErrorKind>,
    pub key_expiry: SystemTime,
    pub key_counter: u32,
    pub revocation_supported: bool,
    pub keyshare_schemes: Vec<SchemeManagerIdentifier>,
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self {
            reject: None,
            key_expiry: SystemTime::now() + Duration::from_secs(365 * 24 * 3600),
            key_counter: 2,
            revocation_supported: true,
            keyshare_schemes: Vec::new(),
        }
    }
}

#[async_trait]
impl CredentialCatalog for MockCatalog {
    async fn validate_request(&self, _request: &SessionRequest) -> Result<(), ServerError> {
        match self.reject {
            Some(kind) => Err(ServerError::new(kind, "rejected by catalog")),
            None => Ok(()),
        }
    }

    async fn issuance_keys(
        &self,
        _credential: &CredentialTypeIdentifier,
    ) -> Result<IssuanceKeys, ServerError> {
        Ok(IssuanceKeys {
            counter: self.key_counter,
            expiry: self.key_expiry,
            revocation_supported: self.revocation_supported,
        })
    }

    async fn keyshare_schemes(
        &self,
        _request: &SessionRequest,
    ) -> Result<Vec<SchemeManagerIdentifier>, ServerError> {
        Ok(self.keyshare_schemes.clone())
    }
}

/// Proof verifier double returning a fixed outcome and counting invocations.
pub struct MockVerifier {
    pub outcome: Result<ProofStatus, ErrorKind>,
    pub disclosed: Vec<Vec<DisclosedAttribute>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockVerifier {
    /// Verifier that accepts proofs and reports the given attributes as
    /// disclosed.
    pub fn valid(disclosed: &[(&str, &str)]) -> Self {
        Self {
            outcome: Ok(ProofStatus::Valid),
            disclosed: vec![disclosed
                .iter()
                .map(|(id, value)| DisclosedAttribute {
                    raw_value: Some(value.to_string()),
                    id: AttributeTypeIdentifier::from(*id),
                    status: AttributeProofStatus::Present,
                    issuance_time: None,
                })
                .collect()],
            calls: Default::default(),
        }
    }

    /// Verifier that reports proofs with the given non-valid status.
    pub fn invalid(status: ProofStatus) -> Self {
        Self {
            outcome: Ok(status),
            disclosed: Vec::new(),
            calls: Default::default(),
        }
    }

    /// Verifier whose verification errors out.
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            outcome: Err(kind),
            disclosed: Vec::new(),
            calls: Default::default(),
        }
    }

    /// How many times a verification entry point ran.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn status(&self) -> Result<ProofStatus, ServerError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.outcome {
            Ok(status) => Ok(*status),
            Err(kind) => Err(ServerError::new(*kind, "verification failed")),
        }
    }
}

#[async_trait]
impl ProofVerifier for MockVerifier {
    async fn verify_disclosure(
        &self,
        _request: &SessionRequest,
        _disclosure: &Disclosure,
    ) -> Result<VerificationResult, ServerError> {
        Ok(VerificationResult {
            proof_status: self.status()?,
            disclosed: self.disclosed.clone(),
            signature: Some(serde_json::json!({"signature": "opaque"})),
        })
    }

    async fn issue(
        &self,
        _request: &SessionRequest,
        _commitments: &IssueCommitmentMessage,
        _keyshare_proofs: &HashMap<SchemeManagerIdentifier, serde_json::Value>,
        _metadata_version: u8,
    ) -> Result<IssuanceResult, ServerError> {
        Ok(IssuanceResult {
            signatures: vec![serde_json::json!({"signature": "issued"})],
            proof_status: self.status()?,
            disclosed: self.disclosed.clone(),
        })
    }

    async fn verify_keyshare_proof(
        &self,
        scheme: &SchemeManagerIdentifier,
        _proof_jwt: &str,
    ) -> Result<serde_json::Value, ServerError> {
        self.status()?;
        Ok(serde_json::json!({"scheme": scheme.as_str()}))
    }
}

/// Callback sink double recording deliveries and serving a canned
/// next-session request.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<(String, SessionResult)>>,
    pub next_request: Mutex<Option<RequestorRequest>>,
}

impl RecordingSink {
    pub fn with_next(request: RequestorRequest) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            next_request: Mutex::new(Some(request)),
        }
    }
}

#[async_trait]
impl CallbackSink for RecordingSink {
    async fn deliver_result(&self, url: &str, result: &SessionResult) -> Result<(), ServerError> {
        self.delivered.lock().push((url.to_string(), result.clone()));
        Ok(())
    }

    async fn next_session(
        &self,
        _url: &str,
        _result: &SessionResult,
    ) -> Result<Option<RequestorRequest>, ServerError> {
        Ok(self.next_request.lock().clone())
    }
}
