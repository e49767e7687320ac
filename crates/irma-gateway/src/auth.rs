//! Requestor authentication.
//!
//! Three modes, mirroring the `Authorization`/content-type conventions of the
//! protocol:
//!
//! - authentication disabled: any JSON request is accepted under the global
//!   permissions;
//! - static bearer token (`Content-Type: application/json`): the token in
//!   the `Authorization` header identifies a configured requestor;
//! - signed JWT (`Content-Type: text/plain`): the body is an RS256 JWT whose
//!   `kid` names the requestor, verified against its configured public key
//!   and bounded in age by `max_request_age`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{header, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{info, warn};

use irma_messages::version::AUTHORIZATION_HEADER;
use irma_messages::{Action, ErrorKind, RequestorRequest, SessionRequest};
use irma_sessions::config::AuthMethod;
use irma_sessions::{Configuration, ServerError};

use crate::middleware::constant_time_compare;

/// A session request together with the identity that posted it.
#[derive(Debug)]
pub struct AuthenticatedRequest {
    /// Name of the authenticated requestor; `None` when authentication is
    /// disabled.
    pub requestor: Option<String>,
    pub rrequest: RequestorRequest,
}

/// Authenticates session-start requests and enforces permissions.
pub struct RequestorAuthenticator {
    conf: Arc<Configuration>,
}

impl RequestorAuthenticator {
    pub fn new(conf: Arc<Configuration>) -> Self {
        Self { conf }
    }

    /// Authenticate a session-start request and check that the requestor may
    /// perform it.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<AuthenticatedRequest, ServerError> {
        if self.conf.disable_requestor_authentication {
            let rrequest = parse_json_request(body)?;
            self.check_permissions(None, &rrequest)?;
            return Ok(AuthenticatedRequest {
                requestor: None,
                rrequest,
            });
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        if content_type.starts_with("text/plain") {
            return self.authenticate_jwt(body);
        }
        self.authenticate_token(headers, body)
    }

    fn authenticate_token(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<AuthenticatedRequest, ServerError> {
        let presented = headers
            .get(AUTHORIZATION_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        let presented = presented.strip_prefix("Bearer ").unwrap_or(presented);

        let name = self
            .conf
            .requestors
            .iter()
            .find(|(_, requestor)| {
                requestor.auth_method == AuthMethod::Token
                    && constant_time_compare(presented.as_bytes(), requestor.key.as_bytes())
            })
            .map(|(name, _)| name.clone());
        let name = match name {
            Some(name) => name,
            None => {
                warn!("session request with unknown authorization token");
                return Err(ServerError::new(
                    ErrorKind::Unauthorized,
                    "invalid authorization token",
                ));
            }
        };

        let rrequest = parse_json_request(body)?;
        self.check_permissions(Some(&name), &rrequest)?;
        info!(requestor = %name, "session request authenticated");
        Ok(AuthenticatedRequest {
            requestor: Some(name),
            rrequest,
        })
    }

    fn authenticate_jwt(&self, body: &[u8]) -> Result<AuthenticatedRequest, ServerError> {
        let token = std::str::from_utf8(body)
            .map_err(|_| ServerError::new(ErrorKind::InvalidRequest, "requestor jwt is not utf-8"))?
            .trim();

        let jwt_header = jsonwebtoken::decode_header(token).map_err(|e| {
            ServerError::new(ErrorKind::InvalidRequest, format!("invalid requestor jwt: {e}"))
        })?;
        let name = jwt_header.kid.ok_or_else(|| {
            ServerError::new(ErrorKind::Unauthorized, "requestor jwt lacks key id")
        })?;
        let requestor = self
            .conf
            .requestors
            .get(&name)
            .filter(|r| r.auth_method == AuthMethod::PublicKey)
            .ok_or_else(|| ServerError::new(ErrorKind::Unauthorized, "unknown requestor"))?;

        let key = DecodingKey::from_rsa_pem(requestor.key.as_bytes()).map_err(|e| {
            ServerError::new(
                ErrorKind::Internal,
                format!("configured requestor key is invalid: {e}"),
            )
        })?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.required_spec_claims = Default::default();
        let claims = jsonwebtoken::decode::<RequestorClaims>(token, &key, &validation)
            .map_err(|e| {
                ServerError::new(ErrorKind::Unauthorized, format!("jwt verification failed: {e}"))
            })?
            .claims;

        check_age(claims.iat, self.conf.max_request_age, unix_now())?;

        let rrequest = claims.into_request()?;
        self.check_permissions(Some(&name), &rrequest)?;
        info!(requestor = %name, "session request authenticated");
        Ok(AuthenticatedRequest {
            requestor: Some(name),
            rrequest,
        })
    }

    /// Whether the requestor's (merged) permissions cover the request.
    pub fn check_permissions(
        &self,
        requestor: Option<&str>,
        rrequest: &RequestorRequest,
    ) -> Result<(), ServerError> {
        let perms = self.conf.permissions_for(requestor);
        let request = &rrequest.request;
        let allowed = match request {
            SessionRequest::Issuance(isreq) => {
                perms.can_issue(&isreq.credentials)
                    && (isreq.disclose.is_empty()
                        || perms.can_verify_or_sign(Action::Issuing, &isreq.disclose))
            }
            _ => perms.can_verify_or_sign(request.action(), request.disclose()),
        };
        if allowed {
            Ok(())
        } else {
            warn!(
                requestor = requestor.unwrap_or("anonymous"),
                "session request without sufficient permissions"
            );
            Err(ServerError::new(
                ErrorKind::Unauthorized,
                "requestor lacks permission for the requested attributes",
            ))
        }
    }
}

/// Claims of a requestor JWT: the request lives in a claim named after the
/// request type, with the `sub` claim declaring which one.
#[derive(Debug, Deserialize)]
struct RequestorClaims {
    iat: u64,
    sub: String,
    #[serde(default)]
    sprequest: Option<RequestorRequest>,
    #[serde(default)]
    absrequest: Option<RequestorRequest>,
    #[serde(default)]
    iprequest: Option<RequestorRequest>,
}

impl RequestorClaims {
    fn into_request(self) -> Result<RequestorRequest, ServerError> {
        let (claim, expected_action, rrequest) = match self.sub.as_str() {
            "verification_request" => ("sprequest", Action::Disclosing, self.sprequest),
            "signature_request" => ("absrequest", Action::Signing, self.absrequest),
            "issue_request" => ("iprequest", Action::Issuing, self.iprequest),
            other => {
                return Err(ServerError::new(
                    ErrorKind::InvalidRequest,
                    format!("unknown requestor jwt subject `{other}`"),
                ))
            }
        };
        let rrequest = rrequest.ok_or_else(|| {
            ServerError::new(
                ErrorKind::InvalidRequest,
                format!("requestor jwt lacks the {claim} claim"),
            )
        })?;
        if rrequest.request.action() != expected_action {
            return Err(ServerError::new(
                ErrorKind::InvalidRequest,
                "requestor jwt subject does not match the request",
            ));
        }
        Ok(rrequest)
    }
}

fn check_age(iat: u64, max_age: u64, now: u64) -> Result<(), ServerError> {
    if iat + max_age < now {
        return Err(ServerError::new(
            ErrorKind::Unauthorized,
            "session request expired",
        ));
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn parse_json_request(body: &[u8]) -> Result<RequestorRequest, ServerError> {
    serde_json::from_slice(body)
        .map_err(|e| ServerError::new(ErrorKind::InvalidRequest, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, rrequest: RequestorRequest, slot: &str) -> RequestorClaims {
        let mut c = RequestorClaims {
            iat: 1000,
            sub: sub.to_string(),
            sprequest: None,
            absrequest: None,
            iprequest: None,
        };
        match slot {
            "sprequest" => c.sprequest = Some(rrequest),
            "absrequest" => c.absrequest = Some(rrequest),
            "iprequest" => c.iprequest = Some(rrequest),
            _ => unreachable!(),
        }
        c
    }

    fn disclosure() -> RequestorRequest {
        irma_sessions::test_utils::disclosure_request("pbdf.pbdf.email.email")
    }

    #[test]
    fn test_claims_subject_selects_request_slot() {
        let rr = claims("verification_request", disclosure(), "sprequest")
            .into_request()
            .unwrap();
        assert_eq!(rr.request.action(), Action::Disclosing);

        // Request parked in the wrong slot.
        let err = claims("verification_request", disclosure(), "iprequest")
            .into_request()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        // Subject and request type must agree.
        let err = claims("issue_request", disclosure(), "iprequest")
            .into_request()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let err = claims("frobnicate_request", disclosure(), "sprequest")
            .into_request()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_request_age_window() {
        assert!(check_age(1000, 300, 1200).is_ok());
        assert!(check_age(1000, 300, 1300).is_ok());
        let err = check_age(1000, 300, 1301).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }
}
