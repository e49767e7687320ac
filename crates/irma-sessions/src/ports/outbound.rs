//! Driven ports: contracts of the external collaborators.
//!
//! The session engine validates requests, sequences the protocol, and stores
//! state; the actual credential catalog, the proof cryptography, the result
//! callback transport and the remote key-value store live behind these
//! traits.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use irma_messages::{
    CredentialTypeIdentifier, DisclosedAttribute, Disclosure, IssueCommitmentMessage, ProofStatus,
    RequestorRequest, SchemeManagerIdentifier, SessionRequest, SessionResult,
};

use crate::error::{ServerError, StoreError};

/// Issuance key material known to the catalog for one credential type.
#[derive(Clone, Debug)]
pub struct IssuanceKeys {
    /// Counter of the latest private key of the issuer.
    pub counter: u32,
    /// Expiry of the matching public key.
    pub expiry: SystemTime,
    /// Whether the credential type supports revocation.
    pub revocation_supported: bool,
}

/// The credential scheme catalog (driven port).
#[async_trait]
pub trait CredentialCatalog: Send + Sync {
    /// Validate a session request against the scheme contents: known
    /// identifiers, well-formed attribute values, consistent credential
    /// requests.
    async fn validate_request(&self, request: &SessionRequest) -> Result<(), ServerError>;

    /// Latest issuance keys for a credential type. Fails when the issuer has
    /// no usable key pair.
    async fn issuance_keys(
        &self,
        credential: &CredentialTypeIdentifier,
    ) -> Result<IssuanceKeys, ServerError>;

    /// Schemes that require a keyshare proof for the given request.
    async fn keyshare_schemes(
        &self,
        request: &SessionRequest,
    ) -> Result<Vec<SchemeManagerIdentifier>, ServerError>;
}

/// Outcome of verifying a disclosure (or attribute-based signature).
#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub proof_status: ProofStatus,
    /// Disclosed attributes, grouped per conjunction of the request.
    pub disclosed: Vec<Vec<DisclosedAttribute>>,
    /// For signature sessions: the verified attribute-based signature.
    pub signature: Option<serde_json::Value>,
}

/// Outcome of an issuance: the signatures for the client plus the
/// verification of any attributes disclosed alongside.
#[derive(Clone, Debug)]
pub struct IssuanceResult {
    pub signatures: Vec<serde_json::Value>,
    pub proof_status: ProofStatus,
    pub disclosed: Vec<Vec<DisclosedAttribute>>,
}

/// The low-level proof cryptography (driven port).
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Verify disclosure proofs against the request (with implicit
    /// disclosure already merged in).
    async fn verify_disclosure(
        &self,
        request: &SessionRequest,
        disclosure: &Disclosure,
    ) -> Result<VerificationResult, ServerError>;

    /// Verify issuance commitments and produce the issuance signatures.
    /// `metadata_version` is the attribute metadata format for the client's
    /// protocol version.
    async fn issue(
        &self,
        request: &SessionRequest,
        commitments: &IssueCommitmentMessage,
        keyshare_proofs: &HashMap<SchemeManagerIdentifier, serde_json::Value>,
        metadata_version: u8,
    ) -> Result<IssuanceResult, ServerError>;

    /// Verify a keyshare proof JWT of the given scheme and return the
    /// contained proof.
    async fn verify_keyshare_proof(
        &self,
        scheme: &SchemeManagerIdentifier,
        proof_jwt: &str,
    ) -> Result<serde_json::Value, ServerError>;
}

/// Delivery of session results to requestor-provided URLs (driven port).
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// POST the session result to the requestor's callback URL. Failures are
    /// the caller's to log; they never change session state.
    async fn deliver_result(&self, url: &str, result: &SessionResult) -> Result<(), ServerError>;

    /// POST the result to a next-session URL and return the follow-up
    /// request, if the requestor wants one.
    async fn next_session(
        &self,
        url: &str,
        result: &SessionResult,
    ) -> Result<Option<RequestorRequest>, ServerError>;
}

/// Minimal remote key-value store with TTLs and fenced locks (driven port).
///
/// Locks are fenced by a caller-chosen token: acquisition writes the token,
/// and release and TTL inspection only act when the stored token still
/// matches, so a lock that expired and was re-acquired by another owner is
/// never touched.
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Try to acquire the lock; false when it is currently held.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining TTL of the lock, when still held under `token`.
    async fn lock_ttl(&self, key: &str, token: &str) -> Result<Option<Duration>, StoreError>;

    /// Release the lock when still held under `token`.
    async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError>;
}
