//! REST API over the running engine.
//!
//! Two endpoints:
//! - `GET /status`: the same snapshot the status publisher sends
//! - `POST /arrivals`: an intake message, answered with an intake reply

mod handlers;
mod types;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::listeners::Intake;
use crate::sim::roster::EngineState;
use crate::sim::types::EngineParams;

pub use types::StatusResponse;

/// State shared by every request handler.
///
/// Handlers lock the roster themselves, once per request.
pub struct AppState {
    /// Live engine state.
    pub engine: Arc<EngineState>,
    /// Arrival intake bound to the hardware charger.
    pub intake: Intake,
    /// Engine parameters for headroom figures.
    pub params: EngineParams,
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/arrivals", post(handlers::post_arrival))
        .with_state(state)
}

/// Binds to `addr` and serves the API until the process exits.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api server listening");
    axum::serve(listener, app).await
}
