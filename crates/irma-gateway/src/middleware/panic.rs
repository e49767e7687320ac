//! Panic recovery middleware.
//!
//! A panicking handler must not take the connection down or corrupt the
//! session: the panic is caught, the transaction above this layer aborts
//! (leaving the session unchanged), and the client receives a 500 `panic`
//! envelope.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::FutureExt;
use tower::{Layer, Service};
use tracing::error;

use irma_messages::ErrorKind;
use irma_sessions::ServerError;

use super::error_response;

/// Panic recovery layer.
#[derive(Clone)]
pub struct PanicLayer {
    verbose: bool,
}

impl PanicLayer {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl<S> Layer<S> for PanicLayer {
    type Service = PanicMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PanicMiddleware {
            inner,
            verbose: self.verbose,
        }
    }
}

/// Panic recovery service.
#[derive(Clone)]
pub struct PanicMiddleware<S> {
    inner: S,
    verbose: bool,
}

impl<S> Service<Request<Body>> for PanicMiddleware<S>
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
        let verbose = self.verbose;

        Box::pin(async move {
            match std::panic::AssertUnwindSafe(inner.call(req))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(panic = %message, "request handler panicked");
                    let err = ServerError::new(ErrorKind::Panic, message).with_stacktrace(
                        std::backtrace::Backtrace::force_capture().to_string(),
                    );
                    Ok(error_response(&err, verbose))
                }
            }
        })
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
