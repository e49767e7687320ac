//! Session lookup + transaction middleware.
//!
//! Outermost layer of the client-facing chain: extracts the client token
//! from the URL, opens a store transaction, and runs everything below it
//! (remaining middleware and the handler) under the session lock, bounded by
//! a deadline derived from the session's remaining timeout. After the inner
//! service returns, the (possibly mutated) session is written back and the
//! transaction commits; if the commit made the session terminal, the result
//! callback is dispatched out-of-band.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use tower::{Layer, Service};
use tracing::error;

use irma_messages::{ClientToken, ErrorKind};
use irma_sessions::{ServerError, SessionServer};

use super::{error_response, SessionHandle};

/// Floor of the per-request deadline, so a session on the verge of expiry
/// can still be answered (typically with its terminal status).
const MIN_REQUEST_DEADLINE: Duration = Duration::from_secs(1);

/// Session transaction layer.
#[derive(Clone)]
pub struct SessionLayer {
    server: Arc<SessionServer>,
}

impl SessionLayer {
    pub fn new(server: Arc<SessionServer>) -> Self {
        Self { server }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionMiddleware {
            inner,
            server: Arc::clone(&self.server),
        }
    }
}

/// Session transaction service.
#[derive(Clone)]
pub struct SessionMiddleware<S> {
    inner: S,
    server: Arc<SessionServer>,
}

impl<S> Service<Request<Body>> for SessionMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
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
        let server = Arc::clone(&self.server);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let verbose = server.configuration().verbose;

            let token = match client_token_from_path(req.uri().path()) {
                Some(token) => token,
                None => {
                    return Ok(error_response(
                        &ServerError::new(ErrorKind::InvalidRequest, "malformed client token"),
                        verbose,
                    ))
                }
            };

            let mut guard = match server.store().transaction(&token).await {
                Ok(guard) => guard,
                Err(e) => return Ok(error_response(&ServerError::from(e), verbose)),
            };

            // Host pinning: a session may declare the Host header clients
            // must present.
            let expected_host = guard.session().request().base().host.clone();
            if let Some(expected) = expected_host {
                let host = req
                    .headers()
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or("");
                if host != expected {
                    guard.abort().await;
                    return Ok(error_response(
                        &ServerError::new(ErrorKind::Unauthorized, "host mismatch"),
                        verbose,
                    ));
                }
            }

            let before = guard.session().status;
            let deadline = guard
                .session()
                .remaining(server.configuration(), SystemTime::now())
                .max(MIN_REQUEST_DEADLINE);

            let handle = SessionHandle::new(guard.session().clone());
            let mut req = req;
            req.extensions_mut().insert(handle.clone());

            let response = match tokio::time::timeout(deadline, inner.call(req)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    guard.abort().await;
                    return Err(e);
                }
                Err(_) => {
                    guard.abort().await;
                    return Ok(error_response(
                        &ServerError::new(ErrorKind::Internal, "session deadline exceeded"),
                        verbose,
                    ));
                }
            };

            let after = handle.snapshot();
            let finished = !before.is_terminal() && after.status.is_terminal();
            *guard.session() = after.clone();
            if let Err(e) = guard.commit().await {
                error!(session = %after.requestor_token, error = %e, "session commit failed");
                return Ok(error_response(&ServerError::from(e), verbose));
            }
            // The callback runs after the lock is released.
            if finished {
                server.dispatch_result_callback(after);
            }
            Ok(response)
        })
    }
}

/// The client token is the path segment after `session`:
/// `/irma/session/<clientToken>[/...]`.
fn client_token_from_path(path: &str) -> Option<ClientToken> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "session")?;
    ClientToken::parse(segments.next()?).ok()
}
