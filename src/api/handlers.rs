//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tracing::warn;

use super::AppState;
use super::types::{StatusResponse, intake_status};
use crate::error::IntakeError;
use crate::listeners::{IntakeMessage, IntakeReply, StatusSnapshot};

/// `GET /status` → 200 + `StatusResponse` JSON
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        finished: state.engine.is_finished(),
        snapshot: StatusSnapshot::capture(&state.engine, &state.params),
    })
}

/// Applies one intake message.
///
/// `POST /arrivals` → 200 + `IntakeReply` JSON on success; a 4xx/5xx status
/// with `ok: false` and the reason otherwise.
pub async fn post_arrival(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IntakeMessage>, JsonRejection>,
) -> (StatusCode, Json<IntakeReply>) {
    let result = match body {
        Ok(Json(message)) => {
            // the charger lock may wait on serial I/O
            let worker = Arc::clone(&state);
            tokio::task::spawn_blocking(move || worker.intake.handle(message))
                .await
                .unwrap_or_else(|e| Err(IntakeError::Malformed(format!("intake task failed: {e}"))))
        }
        Err(rejection) => Err(IntakeError::Malformed(rejection.body_text())),
    };

    match result {
        Ok(final_soc) => (
            StatusCode::OK,
            Json(IntakeReply {
                ok: true,
                error: None,
                final_soc,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "api intake refused");
            (
                intake_status(&e),
                Json(IntakeReply {
                    ok: false,
                    error: Some(e.to_string()),
                    final_soc: None,
                }),
            )
        }
    }
}
