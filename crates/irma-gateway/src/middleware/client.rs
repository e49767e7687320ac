//! Client authorization middleware (the pairing gate).
//!
//! Endpoints behind this layer accept proofs, so they may only be reached
//! once the client is connected (not while pairing is pending, not after the
//! session finished), and only by the same client as before, proven by the
//! client secret bound at connect time.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::warn;

use irma_messages::version::AUTHORIZATION_HEADER;
use irma_messages::{ErrorKind, ServerStatus};
use irma_sessions::ServerError;

use super::{constant_time_compare, error_response, SessionHandle};

/// Client authorization layer.
#[derive(Clone, Default)]
pub struct ClientAuthLayer;

impl ClientAuthLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ClientAuthLayer {
    type Service = ClientAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientAuthMiddleware { inner }
    }
}

/// Client authorization service.
#[derive(Clone)]
pub struct ClientAuthMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for ClientAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let handle = match req.extensions().get::<SessionHandle>().cloned() {
                Some(handle) => handle,
                None => {
                    return Ok(error_response(
                        &ServerError::new(ErrorKind::Internal, "session missing from request"),
                        false,
                    ))
                }
            };

            let (status, client_auth) = handle.with(|s| (s.status, s.client_auth.clone()));
            if status == ServerStatus::Pairing {
                return Ok(error_response(
                    &ServerError::kind(ErrorKind::PairingRequired),
                    false,
                ));
            }
            if status != ServerStatus::Connected {
                return Ok(error_response(
                    &ServerError::new(
                        ErrorKind::UnexpectedRequest,
                        "session not yet started or already finished",
                    ),
                    false,
                ));
            }

            let presented = req
                .headers()
                .get(AUTHORIZATION_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            let authorized = match &client_auth {
                Some(secret) => constant_time_compare(presented.as_bytes(), secret.as_bytes()),
                None => false,
            };
            if !authorized {
                warn!("client request with wrong authorization");
                return Ok(error_response(
                    &ServerError::kind(ErrorKind::IrmaUnauthorized),
                    false,
                ));
            }

            inner.call(req).await
        })
    }
}
