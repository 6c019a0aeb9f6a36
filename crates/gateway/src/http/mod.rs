//! HTTP surface
//!
//! ```text
//! PUT    /node/:id                     admin   create or replace a node
//! DELETE /node/:id                     admin   delete a node
//! POST   /node/:id/console-endpoints   admin   issue a console token
//! DELETE /node/:id/token               admin   revoke all console tokens
//! GET    /node/:id/console?token=      token   stream console output
//! POST   /node/:id/power_off?token=    token   hard power off
//! POST   /node/:id/power_cycle?token=  token   power cycle or reset
//! GET    /node/:id/power_status?token= token   chassis power state
//! GET    /health                       -       liveness
//! ```
//!
//! Anything that fails authorization, names a missing node or presents a
//! bad token answers with the same bare 404 as an unknown route or method.

mod handlers;

use crate::admin::AdminGate;
use crate::audit::SharedAuditLogger;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use axum::Router;
use axum::routing::{get, post, put};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub admin: AdminGate,
    pub audit: SharedAuditLogger,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, admin: AdminGate, audit: SharedAuditLogger) -> Self {
        Self {
            gateway,
            admin,
            audit,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/node/:id",
            put(handlers::put_node).delete(handlers::delete_node),
        )
        .route(
            "/node/:id/console-endpoints",
            post(handlers::issue_token),
        )
        .route(
            "/node/:id/token",
            axum::routing::delete(handlers::revoke_tokens),
        )
        .route("/node/:id/console", get(handlers::stream_console))
        .route("/node/:id/power_off", post(handlers::power_off))
        .route("/node/:id/power_cycle", post(handlers::power_cycle))
        .route("/node/:id/power_status", get(handlers::power_status))
        .route("/health", get(handlers::health))
        .fallback(|| async { GatewayError::NotFound })
        .method_not_allowed_fallback(|| async { GatewayError::NotFound })
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Console gateway listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
