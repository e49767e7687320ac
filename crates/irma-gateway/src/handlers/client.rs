//! Client (wallet) endpoints, all running under the session transaction.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use axum::Extension;

use irma_messages::version::{AUTHORIZATION_HEADER, MAX_VERSION_HEADER, MIN_VERSION_HEADER};
use irma_messages::{Disclosure, ErrorKind, IssueCommitmentMessage, ProtocolVersion};
use irma_sessions::{ServerError, SessionServer};

use super::{json_ok, no_content};
use crate::middleware::{error_response, SessionHandle};

/// GET `/irma/session/{clientToken}`: the client fetches the session,
/// negotiating the protocol version through the version headers. The bearer
/// secret for subsequent requests is returned in the `Authorization`
/// response header.
pub async fn get_request(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
    headers: HeaderMap,
) -> Response {
    let verbose = server.configuration().verbose;
    let (min, max) = match version_window(&headers) {
        Ok(window) => window,
        Err(e) => return error_response(&e, verbose),
    };

    let mut data = handle.snapshot();
    let result = server.client_get_request(&mut data, min, max).await;
    let client_auth = data.client_auth.clone();
    handle.replace(data);

    match result {
        Ok(csr) => {
            let mut response = json_ok(&csr);
            if let Some(secret) = client_auth {
                if let Ok(value) = HeaderValue::from_bytes(secret.as_bytes()) {
                    response.headers_mut().insert(AUTHORIZATION_HEADER, value);
                }
            }
            response
        }
        Err(e) => error_response(&e, verbose),
    }
}

/// POST `/irma/session/{clientToken}/proofs`: disclosure or signature
/// proofs.
pub async fn post_proofs(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
    body: Bytes,
) -> Response {
    let verbose = server.configuration().verbose;
    let disclosure: Disclosure = match serde_json::from_slice(&body) {
        Ok(disclosure) => disclosure,
        Err(e) => {
            return error_response(
                &ServerError::new(ErrorKind::InvalidRequest, e.to_string()),
                verbose,
            )
        }
    };

    let mut data = handle.snapshot();
    let result = server.client_respond_disclosure(&mut data, &disclosure).await;
    handle.replace(data);

    match result {
        Ok(response) => json_ok(&response),
        Err(e) => error_response(&e, verbose),
    }
}

/// POST `/irma/session/{clientToken}/commitments`: issuance commitments.
pub async fn post_commitments(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
    body: Bytes,
) -> Response {
    let verbose = server.configuration().verbose;
    let commitments: IssueCommitmentMessage = match serde_json::from_slice(&body) {
        Ok(commitments) => commitments,
        Err(e) => {
            return error_response(
                &ServerError::new(ErrorKind::InvalidRequest, e.to_string()),
                verbose,
            )
        }
    };

    let mut data = handle.snapshot();
    let result = server.client_respond_issuance(&mut data, &commitments).await;
    handle.replace(data);

    match result {
        Ok(response) => json_ok(&response),
        Err(e) => error_response(&e, verbose),
    }
}

/// GET `/irma/session/{clientToken}/status`.
pub async fn get_status(Extension(handle): Extension<SessionHandle>) -> Response {
    let status = handle.with(|s| s.status);
    json_ok(&status)
}

/// DELETE `/irma/session/{clientToken}`: the wallet cancels the session.
pub async fn delete_session(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
) -> Response {
    let verbose = server.configuration().verbose;
    let mut data = handle.snapshot();
    let result = server.client_cancel(&mut data);
    handle.replace(data);

    match result {
        Ok(()) => no_content(),
        Err(e) => error_response(&e, verbose),
    }
}

fn version_window(headers: &HeaderMap) -> Result<(ProtocolVersion, ProtocolVersion), ServerError> {
    let parse = |name: &str| -> Result<ProtocolVersion, ServerError> {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .parse()
            .map_err(|_| {
                ServerError::new(
                    ErrorKind::InvalidRequest,
                    format!("missing or malformed {name} header"),
                )
            })
    };
    Ok((parse(MIN_VERSION_HEADER)?, parse(MAX_VERSION_HEADER)?))
}
