//! Requestor API endpoints.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;

use irma_messages::{AttributeConDisCon, ErrorKind, RequestorToken};
use irma_sessions::{ServerError, SessionServer};

use super::{json_ok, no_content};
use crate::auth::RequestorAuthenticator;
use crate::jwt::sign_result_jwt;
use crate::middleware::error_response;

/// POST `/session`: authenticate the requestor and start a session.
pub async fn new_session(
    State(server): State<Arc<SessionServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let verbose = server.configuration().verbose;
    let authenticator = RequestorAuthenticator::new(server.configuration().clone());
    let authenticated = match authenticator.authenticate(&headers, &body) {
        Ok(authenticated) => authenticated,
        Err(e) => return error_response(&e, verbose),
    };

    match server
        .start_session(authenticated.rrequest, AttributeConDisCon::default(), None)
        .await
    {
        Ok(package) => json_ok(&package),
        Err(e) => error_response(&e, verbose),
    }
}

/// GET `/session/{requestorToken}/status`.
pub async fn get_status(
    State(server): State<Arc<SessionServer>>,
    Path(token): Path<String>,
) -> Response {
    let verbose = server.configuration().verbose;
    let token = match parse_token(&token) {
        Ok(token) => token,
        Err(e) => return error_response(&e, verbose),
    };
    match server.session_status(&token).await {
        Ok(status) => json_ok(&status),
        Err(e) => error_response(&e, verbose),
    }
}

/// GET `/session/{requestorToken}/result`.
pub async fn get_result(
    State(server): State<Arc<SessionServer>>,
    Path(token): Path<String>,
) -> Response {
    let verbose = server.configuration().verbose;
    let token = match parse_token(&token) {
        Ok(token) => token,
        Err(e) => return error_response(&e, verbose),
    };
    match server.session_result(&token).await {
        Ok(result) => json_ok(&result),
        Err(e) => error_response(&e, verbose),
    }
}

/// GET `/session/{requestorToken}/result-jwt`: the result signed with the
/// server's key.
pub async fn get_result_jwt(
    State(server): State<Arc<SessionServer>>,
    Path(token): Path<String>,
) -> Response {
    let verbose = server.configuration().verbose;
    let token = match parse_token(&token) {
        Ok(token) => token,
        Err(e) => return error_response(&e, verbose),
    };

    let session = match server.store().get(&token).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return error_response(&ServerError::kind(ErrorKind::SessionUnknown), verbose)
        }
        Err(e) => return error_response(&ServerError::from(e), verbose),
    };

    match sign_result_jwt(
        server.configuration(),
        &session.result,
        session.rrequest.validity,
    ) {
        Ok(jwt) => {
            let mut response = Response::new(Body::from(jwt));
            *response.status_mut() = StatusCode::OK;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            response
        }
        Err(e) => error_response(&e, verbose),
    }
}

/// DELETE `/session/{requestorToken}`.
pub async fn delete_session(
    State(server): State<Arc<SessionServer>>,
    Path(token): Path<String>,
) -> Response {
    let verbose = server.configuration().verbose;
    let token = match parse_token(&token) {
        Ok(token) => token,
        Err(e) => return error_response(&e, verbose),
    };
    match server.cancel_session(&token).await {
        Ok(()) => no_content(),
        Err(e) => error_response(&e, verbose),
    }
}

fn parse_token(token: &str) -> Result<RequestorToken, ServerError> {
    RequestorToken::parse(token)
        .map_err(|_| ServerError::new(ErrorKind::InvalidRequest, "malformed session token"))
}
