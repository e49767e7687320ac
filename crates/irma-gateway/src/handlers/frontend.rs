//! Frontend endpoints, behind the frontend authorization layer.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::Extension;

use irma_messages::{ErrorKind, FrontendOptionsRequest};
use irma_sessions::{ServerError, SessionServer};

use super::{json_ok, no_content};
use crate::middleware::{error_response, SessionHandle};

/// GET `/irma/session/{clientToken}/frontend/status`.
pub async fn get_status(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
) -> Response {
    let status = handle.with(|s| server.frontend_status(s));
    json_ok(&status)
}

/// POST `/irma/session/{clientToken}/frontend/options`: change the pairing
/// method while the session awaits its first client contact.
pub async fn post_options(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
    body: Bytes,
) -> Response {
    let verbose = server.configuration().verbose;
    let request: FrontendOptionsRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                &ServerError::new(ErrorKind::InvalidRequest, e.to_string()),
                verbose,
            )
        }
    };

    let result = handle.with(|s| s.update_frontend_options(&request));
    match result {
        Ok(options) => json_ok(&options),
        Err(e) => error_response(&e, verbose),
    }
}

/// POST `/irma/session/{clientToken}/frontend/pairingcompleted`.
pub async fn post_pairing_completed(
    State(server): State<Arc<SessionServer>>,
    Extension(handle): Extension<SessionHandle>,
) -> Response {
    let verbose = server.configuration().verbose;
    let result = handle.with(|s| s.pairing_completed());
    match result {
        Ok(()) => no_content(),
        Err(e) => error_response(&e, verbose),
    }
}
