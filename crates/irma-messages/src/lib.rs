//! # IRMA Messages
//!
//! Wire message schema shared by every party of an IRMA session: the
//! requestor that starts a session, the client (wallet) that answers it, and
//! the frontend that tracks it.
//!
//! The crate holds only value types and their (de)serialization rules; it
//! performs no I/O and carries no session state:
//!
//! - `version`: protocol version value type, negotiation windows, metadata
//!   format selection
//! - `status`: session actions, server statuses (with the transition table)
//!   and proof statuses
//! - `identifiers`: scheme / credential / attribute identifiers
//! - `tokens`: session tokens, bearer secrets and pairing codes
//! - `qr`: the session-start QR payload
//! - `requests`: condiscon attribute requests and the session / requestor
//!   request envelopes
//! - `protocol`: client- and frontend-facing protocol messages
//! - `result`: the session result reported to the requestor
//! - `error`: the error-kind taxonomy and the wire error envelope

pub mod error;
pub mod identifiers;
pub mod protocol;
pub mod qr;
pub mod requests;
pub mod result;
pub mod status;
pub mod tokens;
pub mod version;

// Re-exports for convenience
pub use error::{ErrorKind, RemoteError};
pub use identifiers::{
    AttributeTypeIdentifier, CredentialTypeIdentifier, SchemeManagerIdentifier,
};
pub use protocol::{
    ClientSessionRequest, Disclosure, FrontendOptionsRequest, FrontendSessionRequest,
    FrontendSessionStatus, IssueCommitmentMessage, PairingMethod, ServerSessionResponse,
    SessionOptions, SessionPackage,
};
pub use qr::Qr;
pub use requests::{
    AttributeConDisCon, AttributeRequest, BaseRequest, CredentialRequest, DisclosureRequest,
    IssuanceRequest, NextSessionData, RequestorRequest, SessionRequest, SignatureRequest,
};
pub use result::{AttributeProofStatus, DisclosedAttribute, SessionResult};
pub use status::{Action, ProofStatus, ServerStatus};
pub use tokens::{new_pairing_code, ClientAuth, ClientToken, FrontendAuth, RequestorToken, TokenError};
pub use version::{ProtocolVersion, MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
