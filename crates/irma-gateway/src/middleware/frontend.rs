//! Frontend authorization middleware.
//!
//! Frontend endpoints require the `Authorization` header to carry the
//! session's frontend secret.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::warn;

use irma_messages::version::AUTHORIZATION_HEADER;
use irma_messages::ErrorKind;
use irma_sessions::ServerError;

use super::{constant_time_compare, error_response, SessionHandle};

/// Frontend authorization layer.
#[derive(Clone, Default)]
pub struct FrontendAuthLayer;

impl FrontendAuthLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for FrontendAuthLayer {
    type Service = FrontendAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FrontendAuthMiddleware { inner }
    }
}

/// Frontend authorization service.
#[derive(Clone)]
pub struct FrontendAuthMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for FrontendAuthMiddleware<S>
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

            let presented = req
                .headers()
                .get(AUTHORIZATION_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            let authorized = handle.with(|s| {
                constant_time_compare(presented.as_bytes(), s.frontend_auth.as_bytes())
            });
            if !authorized {
                warn!("frontend request with wrong authorization");
                return Ok(error_response(
                    &ServerError::kind(ErrorKind::IrmaUnauthorized),
                    false,
                ));
            }

            inner.call(req).await
        })
    }
}
