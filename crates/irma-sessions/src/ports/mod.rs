//! Ports layer: trait definitions.
//!
//! `store` holds the session store contract the middleware and orchestrator
//! drive; `outbound` holds the contracts of the external collaborators
//! (credential catalog, proof crypto, callback delivery, remote key-value
//! store).

pub mod outbound;
pub mod store;

pub use outbound::{
    CallbackSink, CredentialCatalog, IssuanceKeys, IssuanceResult, KeyValueClient, ProofVerifier,
    VerificationResult,
};
pub use store::{with_session, SessionGuard, SessionStore};
