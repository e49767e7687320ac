//! Response-cache middleware.
//!
//! Consults the session's response cache before invoking the handler and
//! records the handler's response afterwards, so that a client retrying an
//! identical request within the retry window receives bit-identical output
//! without the handler running again.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::{Layer, Service};
use tracing::debug;

use irma_messages::ErrorKind;
use irma_sessions::ServerError;

use super::{error_response, SessionHandle};

/// Request and response bodies larger than this are refused outright.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Response cache layer.
#[derive(Clone, Default)]
pub struct CacheLayer;

impl CacheLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheMiddleware { inner }
    }
}

/// Response cache service.
#[derive(Clone)]
pub struct CacheMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for CacheMiddleware<S>
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
                // Not running under a session transaction; nothing to cache.
                None => return inner.call(req).await,
            };

            let endpoint = req.uri().path().to_string();

            // Buffer the request body so it can be both hashed and handed to
            // the handler.
            let (parts, body) = req.into_parts();
            let message = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Ok(error_response(
                        &ServerError::new(ErrorKind::InvalidRequest, "could not read request body"),
                        false,
                    ))
                }
            };

            if let Some((status, cached)) = handle.with(|s| s.check_cache(&endpoint, &message)) {
                debug!(endpoint = %endpoint, "replaying cached response");
                return Ok(replay_response(status, cached));
            }

            let req = Request::from_parts(parts, Body::from(message.clone()));
            let response = inner.call(req).await?;

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Ok(error_response(
                        &ServerError::new(ErrorKind::Internal, "could not buffer response body"),
                        false,
                    ))
                }
            };
            handle.with(|s| {
                s.record_response(&endpoint, &message, parts.status.as_u16(), &bytes)
            });

            Ok(Response::from_parts(parts, Body::from(bytes)))
        })
    }
}

fn replay_response(status: u16, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    response
}
