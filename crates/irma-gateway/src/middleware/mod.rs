//! Middleware chain around the client-facing endpoints.

pub mod cache;
pub mod client;
pub mod frontend;
pub mod panic;
pub mod session;

pub use cache::CacheLayer;
pub use client::ClientAuthLayer;
pub use frontend::FrontendAuthLayer;
pub use panic::PanicLayer;
pub use session::SessionLayer;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use serde::Serialize;

use irma_sessions::{ServerError, SessionData};

/// The session travelling through the middleware chain as a request
/// extension. The chain runs under the store's session lock, so handlers see
/// a consistent snapshot; whatever they leave in the handle is written back
/// and persisted when the transaction commits.
#[derive(Clone)]
pub struct SessionHandle(Arc<parking_lot::Mutex<SessionData>>);

impl SessionHandle {
    pub fn new(data: SessionData) -> Self {
        Self(Arc::new(parking_lot::Mutex::new(data)))
    }

    /// Run `f` on the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn snapshot(&self) -> SessionData {
        self.0.lock().clone()
    }

    pub fn replace(&self, data: SessionData) {
        *self.0.lock() = data;
    }
}

/// JSON response with the given status.
pub(crate) fn json_response<T: Serialize>(status: u16, body: &T) -> Response {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// The wire error envelope for a server error.
pub fn error_response(err: &ServerError, verbose: bool) -> Response {
    let remote = err.remote(verbose);
    json_response(remote.status, &remote)
}

/// Constant-time comparison of bearer secrets.
///
/// SECURITY: comparison time must not depend on how many characters match,
/// or on where the lengths diverge. Both inputs are padded to a common
/// length with different filler bytes, so unequal lengths always compare
/// unequal, and `subtle` does the rest.
pub(crate) fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a);
    b_padded[..b.len()].copy_from_slice(b);

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"secret", b"secret"));
        assert!(!constant_time_compare(b"secret", b"Secret"));
        assert!(!constant_time_compare(b"secret", b"secre"));
        assert!(!constant_time_compare(b"secret", b"secrets"));
        assert!(!constant_time_compare(b"", b"secret"));
    }
}
