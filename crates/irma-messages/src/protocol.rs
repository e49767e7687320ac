//! Protocol messages exchanged with the client and the frontend during a
//! running session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::qr::Qr;
use crate::requests::SessionRequest;
use crate::status::ServerStatus;
use crate::tokens::{FrontendAuth, RequestorToken};
use crate::version::ProtocolVersion;

/// LD context of the session options object.
pub const LD_CONTEXT_SESSION_OPTIONS: &str = "https://irma.app/ld/options/v1";
/// LD context of the client session request.
pub const LD_CONTEXT_CLIENT_SESSION_REQUEST: &str = "https://irma.app/ld/request/client/v1";

/// How the wallet is paired to the session before it may see the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingMethod {
    #[default]
    None,
    Pin,
}

/// Session options negotiated between frontend and server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(rename = "@context")]
    pub ld_context: String,
    #[serde(rename = "pairingMethod")]
    pub pairing_method: PairingMethod,
    #[serde(rename = "pairingCode", default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ld_context: LD_CONTEXT_SESSION_OPTIONS.to_string(),
            pairing_method: PairingMethod::None,
            pairing_code: None,
        }
    }
}

/// Frontend request to change the session options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendOptionsRequest {
    #[serde(rename = "pairingMethod", default)]
    pub pairing_method: Option<PairingMethod>,
}

/// What the client receives when it fetches the session.
///
/// While pairing is pending the actual request is withheld.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSessionRequest {
    #[serde(rename = "@context")]
    pub ld_context: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: Option<ProtocolVersion>,
    pub options: SessionOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<SessionRequest>,
}

/// Session parameters handed to the frontend at session start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrontendSessionRequest {
    pub authorization: FrontendAuth,
    #[serde(rename = "pairingHint", default, skip_serializing_if = "Option::is_none")]
    pub pairing_hint: Option<bool>,
    #[serde(rename = "minProtocolVersion")]
    pub min_protocol_version: ProtocolVersion,
    #[serde(rename = "maxProtocolVersion")]
    pub max_protocol_version: ProtocolVersion,
}

/// Response to the requestor starting a session: the QR for the wallet, the
/// requestor token for polling, and the frontend's session parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionPackage {
    #[serde(rename = "sessionPtr")]
    pub session_ptr: Qr,
    pub token: RequestorToken,
    #[serde(rename = "frontendRequest")]
    pub frontend_request: FrontendSessionRequest,
}

/// Status view for the frontend poller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendSessionStatus {
    pub status: ServerStatus,
    #[serde(rename = "nextSession", default, skip_serializing_if = "Option::is_none")]
    pub next_session: Option<Qr>,
}

/// Index of a disclosed attribute within a proof list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedAttributeIndex {
    #[serde(rename = "cred")]
    pub credential_index: usize,
    #[serde(rename = "attr")]
    pub attribute_index: usize,
}

/// For each conjunction of the request, where its disclosed attributes live
/// in the proof list.
pub type DisclosedAttributeIndices = Vec<Vec<DisclosedAttributeIndex>>;

/// Zero-knowledge proofs disclosing attributes, as posted by the client for
/// disclosure and signature sessions. The proofs themselves are opaque to the
/// session layer; the crypto collaborator interprets them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Disclosure {
    pub proofs: Vec<serde_json::Value>,
    #[serde(default)]
    pub indices: DisclosedAttributeIndices,
}

/// Commitments the client posts in an issuance session, together with the
/// disclosure proofs for any attributes disclosed alongside and the keyshare
/// proof JWTs per scheme.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IssueCommitmentMessage {
    #[serde(rename = "combinedProofs", default)]
    pub proofs: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_2: Option<serde_json::Value>,
    #[serde(default)]
    pub indices: DisclosedAttributeIndices,
    #[serde(rename = "proofPJwts", default, skip_serializing_if = "HashMap::is_empty")]
    pub proof_p_jwts: HashMap<String, String>,
}

impl IssueCommitmentMessage {
    /// The disclosure part of the commitment message.
    pub fn disclosure(&self) -> Disclosure {
        Disclosure {
            proofs: self.proofs.clone(),
            indices: self.indices.clone(),
        }
    }
}

/// What the client receives after posting its proofs or commitments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSessionResponse {
    #[serde(rename = "proofStatus")]
    pub proof_status: crate::status::ProofStatus,
    #[serde(rename = "sigs", default, skip_serializing_if = "Option::is_none")]
    pub issue_signatures: Option<Vec<serde_json::Value>>,
    #[serde(rename = "nextSession", default, skip_serializing_if = "Option::is_none")]
    pub next_session: Option<Qr>,
}
