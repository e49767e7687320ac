//! # IRMA Sessions
//!
//! The session lifecycle engine of the IRMA server: everything between a
//! requestor starting a session and the requestor receiving its result.
//!
//! ## Architecture
//!
//! The crate follows a ports-and-adapters layout:
//!
//! - **Domain** (`domain/`): the session entity with its state machine, the
//!   protocol-version negotiation, and the per-session response cache. Pure
//!   logic, no I/O.
//! - **Ports** (`ports/`): the session store contract (`SessionStore` +
//!   `SessionGuard`) and the contracts of the external collaborators:
//!   credential catalog, proof cryptography, result-callback delivery and the
//!   remote key-value store.
//! - **Adapters** (`adapters/`): the process-local store, the store over a
//!   remote key-value client, and the Redis client implementing that port.
//! - **Service** (`service/`): the orchestrator (`SessionServer`) creating
//!   sessions, handling client and requestor operations, chaining sessions,
//!   dispatching result callbacks, and sweeping expired sessions.
//!
//! Every session is owned by at most one request handler at a time: all
//! mutation goes through a store transaction whose lock serializes access,
//! across replicas when the remote store is used.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;
pub mod test_utils;

// Re-exports for convenience
pub use adapters::{KvSessionStore, MemorySessionStore, RedisClient};
pub use config::{AuthMethod, ConfigError, Configuration, Permissions, Requestor, StoreType};
pub use domain::{CachedResponse, SessionData, RETRY_TIME_LIMIT};
pub use error::{ServerError, StoreError};
pub use ports::{
    with_session, CallbackSink, CredentialCatalog, IssuanceKeys, IssuanceResult, KeyValueClient,
    ProofVerifier, SessionGuard, SessionStore, VerificationResult,
};
pub use service::{SessionServer, SWEEP_INTERVAL};
