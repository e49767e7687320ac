//! Router assembly and listeners.
//!
//! Two routers: the requestor API (`/session/...`) and the client/frontend
//! API (`/irma/session/...`). They are served together by default, or split
//! over two listeners when a separate client port is configured, so the
//! client endpoints can be exposed to the internet while the requestor API
//! stays internal.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use irma_sessions::{SessionServer, SWEEP_INTERVAL};

use crate::handlers::{client, frontend, requestor};
use crate::middleware::{
    CacheLayer, ClientAuthLayer, FrontendAuthLayer, PanicLayer, SessionLayer,
};

/// Routes of the client/frontend API. Every route runs inside the session
/// transaction; the request-fetch and proof endpoints additionally go
/// through the response cache, and the proof endpoints through the pairing
/// gate.
pub fn client_router(server: Arc<SessionServer>) -> Router {
    let verbose = server.configuration().verbose;

    let paired = Router::new()
        .route("/irma/session/:token/proofs", post(client::post_proofs))
        .route(
            "/irma/session/:token/commitments",
            post(client::post_commitments),
        )
        .route_layer(ClientAuthLayer::new());

    let cached = Router::new()
        .route("/irma/session/:token", get(client::get_request))
        .merge(paired)
        .route_layer(CacheLayer::new());

    let frontend = Router::new()
        .route(
            "/irma/session/:token/frontend/status",
            get(frontend::get_status),
        )
        .route(
            "/irma/session/:token/frontend/options",
            post(frontend::post_options),
        )
        .route(
            "/irma/session/:token/frontend/pairingcompleted",
            post(frontend::post_pairing_completed),
        )
        .route_layer(FrontendAuthLayer::new());

    Router::new()
        .route("/irma/session/:token", delete(client::delete_session))
        .route("/irma/session/:token/status", get(client::get_status))
        .merge(cached)
        .merge(frontend)
        .route_layer(SessionLayer::new(server.clone()))
        .layer(PanicLayer::new(verbose))
        .with_state(server)
}

/// Routes of the requestor API.
pub fn requestor_router(server: Arc<SessionServer>) -> Router {
    let verbose = server.configuration().verbose;
    Router::new()
        .route("/session", post(requestor::new_session))
        .route("/session/:token", delete(requestor::delete_session))
        .route("/session/:token/status", get(requestor::get_status))
        .route("/session/:token/result", get(requestor::get_result))
        .route("/session/:token/result-jwt", get(requestor::get_result_jwt))
        .layer(PanicLayer::new(verbose))
        .with_state(server)
}

/// Errors starting or running the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("server bind error: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Serve the configured listeners until they fail. Also runs the expiry
/// sweep for stores that need it.
pub async fn serve(server: Arc<SessionServer>) -> Result<(), GatewayError> {
    let conf = server.configuration().clone();
    conf.validate()
        .map_err(|e| GatewayError::Config(e.to_string()))?;

    let sweep = server.spawn_expiry_sweep(SWEEP_INTERVAL);

    let result = match conf.client_listen_addr() {
        Some(client_addr) => {
            let requestor_listener = TcpListener::bind(conf.listen_addr())
                .await
                .map_err(GatewayError::Bind)?;
            let client_listener = TcpListener::bind(client_addr)
                .await
                .map_err(GatewayError::Bind)?;
            info!(addr = %conf.listen_addr(), "requestor API listening");
            info!(addr = %client_addr, "client API listening");

            tokio::try_join!(
                axum::serve(requestor_listener, requestor_router(server.clone())).into_future(),
                axum::serve(client_listener, client_router(server.clone())).into_future(),
            )
            .map(|_| ())
            .map_err(GatewayError::Serve)
        }
        None => {
            let app = requestor_router(server.clone()).merge(client_router(server.clone()));
            let listener = TcpListener::bind(conf.listen_addr())
                .await
                .map_err(GatewayError::Bind)?;
            info!(addr = %conf.listen_addr(), "server listening");
            axum::serve(listener, app).await.map_err(GatewayError::Serve)
        }
    };

    sweep.abort();
    server.stop().await;
    result
}
