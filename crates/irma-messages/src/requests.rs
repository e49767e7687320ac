//! Session requests: condiscon attribute requests, the three session request
//! types, and the requestor envelope they arrive in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identifiers::{AttributeTypeIdentifier, CredentialTypeIdentifier};
use crate::status::Action;

/// A single requested attribute, optionally constrained to a value.
///
/// On the wire this is either a bare attribute identifier string or an object
/// carrying the identifier plus constraints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttributeRequest {
    #[serde(rename = "type")]
    pub attr_type: AttributeTypeIdentifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "notNull", skip_serializing_if = "std::ops::Not::not", default)]
    pub not_null: bool,
}

impl AttributeRequest {
    pub fn new(attr_type: impl Into<AttributeTypeIdentifier>) -> Self {
        Self {
            attr_type: attr_type.into(),
            value: None,
            not_null: false,
        }
    }
}

impl<'de> Deserialize<'de> for AttributeRequest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Compact(AttributeTypeIdentifier),
            Full {
                #[serde(rename = "type")]
                attr_type: AttributeTypeIdentifier,
                #[serde(default)]
                value: Option<String>,
                #[serde(rename = "notNull", default)]
                not_null: bool,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Compact(attr_type) => AttributeRequest {
                attr_type,
                value: None,
                not_null: false,
            },
            Repr::Full {
                attr_type,
                value,
                not_null,
            } => AttributeRequest {
                attr_type,
                value,
                not_null,
            },
        })
    }
}

/// A conjunction of attribute requests: all of them must be satisfied from a
/// single choice.
pub type AttributeCon = Vec<AttributeRequest>;

/// A disjunction of conjunctions: the client picks one conjunction.
pub type AttributeDisCon = Vec<AttributeCon>;

/// A conjunction of disjunctions of conjunctions: the full condiscon shape of
/// an attribute-based disclosure request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeConDisCon(pub Vec<AttributeDisCon>);

impl AttributeConDisCon {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this condiscon is expressible in the pre-condiscon request
    /// format, which only knew disjunctions over single attributes.
    pub fn legacy_compatible(&self) -> bool {
        self.0
            .iter()
            .all(|discon| discon.iter().all(|con| con.len() == 1))
    }

    /// Append the disjunctions of `other`, strengthening the conjunction.
    pub fn extend_with(&mut self, other: &AttributeConDisCon) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Visit every attribute request.
    pub fn iterate_mut(&mut self, mut f: impl FnMut(&mut AttributeRequest)) {
        for discon in &mut self.0 {
            for con in discon {
                for attr in con {
                    f(attr);
                }
            }
        }
    }
}

/// Descriptor of a session to chain after this one completes: where to fetch
/// the follow-up request, and optionally which session type to expect there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextSessionData {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<Action>,
}

/// Fields shared by all session request types.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRequest {
    /// Challenge nonce, minted by the server at session creation
    /// (lowercase hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Proof context; fixed to 1 by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<u64>,
    /// Credential types for which nonrevocation proofs are required.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revocation: Vec<CredentialTypeIdentifier>,
    /// URL the wallet returns the user to afterwards.
    #[serde(
        rename = "clientReturnUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_return_url: Option<String>,
    /// Whether the server should append the requestor token to the return URL.
    #[serde(
        rename = "augmentReturnUrl",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub augment_return_url: bool,
    /// Expected `Host` header on client requests, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Request to disclose attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    #[serde(default)]
    pub disclose: AttributeConDisCon,
}

/// Request to sign a message with attributes attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    #[serde(default)]
    pub disclose: AttributeConDisCon,
    pub message: String,
}

/// A single credential to be issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    #[serde(rename = "credential")]
    pub credential_type: CredentialTypeIdentifier,
    /// Expiry of the issued credential as a unix timestamp; defaulted by the
    /// server when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<u64>,
    /// Issuer key counter, assigned by the server at session creation.
    #[serde(rename = "keyCounter", default, skip_serializing_if = "Option::is_none")]
    pub key_counter: Option<u32>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Revocation enablement: the key under which the issuance is recorded in
    /// the revocation database. Stripped before the request is shown to the
    /// client.
    #[serde(
        rename = "revocationKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub revocation_key: Option<String>,
    #[serde(
        rename = "revocationSupported",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub revocation_supported: bool,
}

/// Request to issue credentials, optionally disclosing attributes alongside.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    #[serde(flatten)]
    pub base: BaseRequest,
    pub credentials: Vec<CredentialRequest>,
    #[serde(default, skip_serializing_if = "AttributeConDisCon::is_empty")]
    pub disclose: AttributeConDisCon,
}

/// A session request, tagged by its LD context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@context")]
pub enum SessionRequest {
    #[serde(rename = "https://irma.app/ld/request/disclosure/v2")]
    Disclosure(DisclosureRequest),
    #[serde(rename = "https://irma.app/ld/request/signature/v2")]
    Signature(SignatureRequest),
    #[serde(rename = "https://irma.app/ld/request/issuance/v2")]
    Issuance(IssuanceRequest),
}

impl SessionRequest {
    pub fn action(&self) -> Action {
        match self {
            SessionRequest::Disclosure(_) => Action::Disclosing,
            SessionRequest::Signature(_) => Action::Signing,
            SessionRequest::Issuance(_) => Action::Issuing,
        }
    }

    pub fn base(&self) -> &BaseRequest {
        match self {
            SessionRequest::Disclosure(r) => &r.base,
            SessionRequest::Signature(r) => &r.base,
            SessionRequest::Issuance(r) => &r.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseRequest {
        match self {
            SessionRequest::Disclosure(r) => &mut r.base,
            SessionRequest::Signature(r) => &mut r.base,
            SessionRequest::Issuance(r) => &mut r.base,
        }
    }

    /// The attributes this request asks to be disclosed.
    pub fn disclose(&self) -> &AttributeConDisCon {
        match self {
            SessionRequest::Disclosure(r) => &r.disclose,
            SessionRequest::Signature(r) => &r.disclose,
            SessionRequest::Issuance(r) => &r.disclose,
        }
    }

    pub fn disclose_mut(&mut self) -> &mut AttributeConDisCon {
        match self {
            SessionRequest::Disclosure(r) => &mut r.disclose,
            SessionRequest::Signature(r) => &mut r.disclose,
            SessionRequest::Issuance(r) => &mut r.disclose,
        }
    }

    /// Whether nonrevocation proofs are required for any credential.
    pub fn revocation_requested(&self) -> bool {
        !self.base().revocation.is_empty()
    }

    /// Whether the request is expressible in the pre-condiscon format.
    pub fn legacy_compatible(&self) -> bool {
        self.disclose().legacy_compatible()
    }

    /// Shape validation of the request itself; the credential catalog performs
    /// the deeper checks against scheme contents.
    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            SessionRequest::Disclosure(r) => {
                if r.disclose.is_empty() {
                    return Err(RequestError::Empty("disclose"));
                }
            }
            SessionRequest::Signature(r) => {
                if r.message.is_empty() {
                    return Err(RequestError::Empty("message"));
                }
            }
            SessionRequest::Issuance(r) => {
                if r.credentials.is_empty() {
                    return Err(RequestError::Empty("credentials"));
                }
                for cred in &r.credentials {
                    if !cred.credential_type.is_valid() {
                        return Err(RequestError::InvalidIdentifier(
                            cred.credential_type.to_string(),
                        ));
                    }
                }
            }
        }
        let mut bad = None;
        let mut disclose = self.disclose().clone();
        disclose.iterate_mut(|attr| {
            if !attr.attr_type.is_valid() && bad.is_none() {
                bad = Some(attr.attr_type.to_string());
            }
        });
        match bad {
            Some(id) => Err(RequestError::InvalidIdentifier(id)),
            None => Ok(()),
        }
    }
}

/// Malformed session request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("request field `{0}` must not be empty")]
    Empty(&'static str),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
}

/// The envelope a requestor posts to start a session: the session request
/// plus requestor-level options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestorRequest {
    /// Validity in seconds of the result JWT, from the moment of the result
    /// callback or result-jwt fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<u64>,
    /// Time in seconds the client has to connect before the session expires;
    /// 0 means the server default applies.
    #[serde(default)]
    pub timeout: u64,
    /// URL that receives the session result when the session ends.
    #[serde(rename = "callbackUrl", default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Follow-up session to chain after this one.
    #[serde(rename = "nextSession", default, skip_serializing_if = "Option::is_none")]
    pub next_session: Option<NextSessionData>,
    pub request: SessionRequest,
}

impl RequestorRequest {
    /// Wrap a bare session request with default requestor options.
    pub fn from_request(request: SessionRequest) -> Self {
        Self {
            validity: None,
            timeout: 0,
            callback_url: None,
            next_session: None,
            request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_condiscon() -> AttributeConDisCon {
        AttributeConDisCon(vec![vec![vec![AttributeRequest::new(
            "pbdf.pbdf.email.email",
        )]]])
    }

    #[test]
    fn test_condiscon_deserializes_compact_and_full() {
        let json = r#"[[["pbdf.pbdf.email.email"], [{"type": "pbdf.sidn-pbdf.email.email", "notNull": true}]]]"#;
        let cdc: AttributeConDisCon = serde_json::from_str(json).unwrap();
        assert_eq!(cdc.0[0][0][0].attr_type.as_str(), "pbdf.pbdf.email.email");
        assert!(cdc.0[0][1][0].not_null);
    }

    #[test]
    fn test_legacy_compatibility() {
        assert!(email_condiscon().legacy_compatible());

        // A conjunction of two attributes inside a disjunction has no legacy
        // representation.
        let condis = AttributeConDisCon(vec![vec![vec![
            AttributeRequest::new("pbdf.pbdf.email.email"),
            AttributeRequest::new("pbdf.pbdf.email.domain"),
        ]]]);
        assert!(!condis.legacy_compatible());
    }

    #[test]
    fn test_session_request_tagging() {
        let json = r#"{
            "@context": "https://irma.app/ld/request/disclosure/v2",
            "disclose": [[["pbdf.pbdf.email.email"]]]
        }"#;
        let req: SessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.action(), Action::Disclosing);
        assert!(req.legacy_compatible());

        let round = serde_json::to_value(&req).unwrap();
        assert_eq!(
            round["@context"],
            "https://irma.app/ld/request/disclosure/v2"
        );
    }

    #[test]
    fn test_requestor_request_defaults() {
        let json = r#"{
            "request": {
                "@context": "https://irma.app/ld/request/signature/v2",
                "message": "I agree",
                "disclose": [[["pbdf.pbdf.email.email"]]]
            }
        }"#;
        let rr: RequestorRequest = serde_json::from_str(json).unwrap();
        assert_eq!(rr.timeout, 0);
        assert!(rr.callback_url.is_none());
        assert_eq!(rr.request.action(), Action::Signing);
    }

    #[test]
    fn test_validation() {
        let empty = SessionRequest::Disclosure(DisclosureRequest::default());
        assert!(empty.validate().is_err());

        let ok = SessionRequest::Disclosure(DisclosureRequest {
            base: BaseRequest::default(),
            disclose: email_condiscon(),
        });
        assert!(ok.validate().is_ok());

        let bad_id = SessionRequest::Disclosure(DisclosureRequest {
            base: BaseRequest::default(),
            disclose: AttributeConDisCon(vec![vec![vec![AttributeRequest::new("nonsense")]]]),
        });
        assert!(matches!(
            bad_id.validate(),
            Err(RequestError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_extend_with_strengthens_conjunction() {
        let mut disclose = email_condiscon();
        let implicit = AttributeConDisCon(vec![vec![vec![AttributeRequest::new(
            "pbdf.pbdf.mobilenumber.mobilenumber",
        )]]]);
        disclose.extend_with(&implicit);
        assert_eq!(disclose.0.len(), 2);
    }
}
