//! Request handlers behind the middleware chain.

pub mod client;
pub mod frontend;
pub mod requestor;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;

use crate::middleware::json_response;

pub(crate) fn json_ok<T: Serialize>(body: &T) -> Response {
    json_response(200, body)
}

pub(crate) fn no_content() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}
