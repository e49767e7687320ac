//! Result-JWT signing.
//!
//! Session results can be fetched (and delivered to callback URLs) as RS256
//! JWTs signed with the server's key, so requestors can hand them to other
//! parties without those having to trust the transport.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

use irma_messages::{ErrorKind, SessionResult};
use irma_sessions::{Configuration, ServerError};

/// Validity of result JWTs when the requestor did not pick one.
const DEFAULT_RESULT_JWT_VALIDITY_SECS: u64 = 120;

#[derive(Serialize)]
struct ResultClaims<'a> {
    iat: u64,
    iss: &'a str,
    sub: String,
    exp: u64,
    #[serde(flatten)]
    result: &'a SessionResult,
}

/// Sign a session result as an RS256 JWT. `validity` is the requestor-chosen
/// validity in seconds, when set.
pub fn sign_result_jwt(
    conf: &Configuration,
    result: &SessionResult,
    validity: Option<u64>,
) -> Result<String, ServerError> {
    let pem = conf
        .jwt_private_key_pem()
        .map_err(|e| ServerError::new(ErrorKind::Internal, e.to_string()))?
        .ok_or_else(|| {
            ServerError::new(ErrorKind::Internal, "no jwt private key configured")
        })?;
    let key = EncodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| ServerError::new(ErrorKind::Internal, format!("invalid jwt key: {e}")))?;

    let iat = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let claims = ResultClaims {
        iat,
        iss: &conf.jwt_issuer,
        sub: format!("{}_result", result.session_type),
        exp: iat + validity.unwrap_or(DEFAULT_RESULT_JWT_VALIDITY_SECS),
        result,
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| ServerError::new(ErrorKind::Internal, format!("jwt signing failed: {e}")))
}
