//! The session result reported to the requestor.

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::qr::Qr;
use crate::status::{Action, ProofStatus, ServerStatus};
use crate::tokens::RequestorToken;

/// Presence status of a single disclosed attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeProofStatus {
    /// Requested and disclosed.
    Present,
    /// Disclosed without having been requested.
    Extra,
    /// Requested but absent (allowed for optional attributes).
    Null,
}

/// A single attribute as disclosed by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedAttribute {
    #[serde(rename = "rawvalue")]
    pub raw_value: Option<String>,
    pub id: crate::identifiers::AttributeTypeIdentifier,
    pub status: AttributeProofStatus,
    #[serde(
        rename = "issuancetime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub issuance_time: Option<u64>,
}

/// Outcome of a session, polled by the requestor and posted to the callback
/// URL. Created at session start and kept in sync with every status change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResult {
    pub token: RequestorToken,
    pub status: ServerStatus,
    #[serde(rename = "type")]
    pub session_type: Action,
    #[serde(rename = "proofStatus", default, skip_serializing_if = "Option::is_none")]
    pub proof_status: Option<ProofStatus>,
    /// Disclosed attributes, grouped per conjunction of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclosed: Option<Vec<Vec<DisclosedAttribute>>>,
    /// For signature sessions: the attribute-based signature produced by the
    /// client, opaque to the session layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<RemoteError>,
    #[serde(rename = "nextSession", default, skip_serializing_if = "Option::is_none")]
    pub next_session: Option<Qr>,
    #[serde(
        rename = "legacySession",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub legacy_session: bool,
}

impl SessionResult {
    /// Fresh result envelope for a session that just started.
    pub fn new(token: RequestorToken, session_type: Action, legacy_session: bool) -> Self {
        Self {
            token,
            status: ServerStatus::Initialized,
            session_type,
            proof_status: None,
            disclosed: None,
            signature: None,
            err: None,
            next_session: None,
            legacy_session,
        }
    }
}
