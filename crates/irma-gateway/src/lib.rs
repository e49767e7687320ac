//! # IRMA Gateway
//!
//! The HTTP surface of the IRMA server: axum routers for the requestor API
//! and the client/frontend API, the middleware chain that runs every
//! client-facing request inside a session-store transaction, requestor
//! authentication, result-JWT signing and the result-callback sink.
//!
//! ## Middleware chain
//!
//! Client-facing endpoints are layered, outermost first:
//!
//! 1. panic recovery (500 `panic`, session unchanged)
//! 2. session lookup + transaction: client token from the URL, store lock
//!    around everything below, Host pinning, per-request deadline
//! 3. response cache: replay for idempotent retries
//! 4. frontend / client authorization where the endpoint requires it
//!
//! Handlers observe the session through a [`middleware::SessionHandle`]
//! request extension and never touch the store themselves; the transaction
//! commits (and the result callback fires) after the handler returns.

pub mod auth;
pub mod callback;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod router;

pub use auth::{AuthenticatedRequest, RequestorAuthenticator};
pub use callback::HttpCallbackSink;
pub use jwt::sign_result_jwt;
pub use router::{client_router, requestor_router, serve, GatewayError};
