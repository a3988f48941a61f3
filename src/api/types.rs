//! API response types and error-to-status mapping.

use axum::http::StatusCode;
use serde::Serialize;

use crate::error::IntakeError;
use crate::listeners::StatusSnapshot;

/// `GET /status` body: the status snapshot plus the run state.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Whether the building trace has been exhausted.
    pub finished: bool,
    /// Latest snapshot.
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// HTTP status for a refused intake request.
pub(super) fn intake_status(error: &IntakeError) -> StatusCode {
    match error {
        IntakeError::Malformed(_)
        | IntakeError::UnknownBatteryClass(_)
        | IntakeError::DeadlinePassed { .. } => StatusCode::BAD_REQUEST,
        IntakeError::SlotOccupied(_) | IntakeError::Duplicate(_) | IntakeError::NotPlugged => {
            StatusCode::CONFLICT
        }
        IntakeError::UnknownVehicle(_) => StatusCode::NOT_FOUND,
        IntakeError::Driver(_) => StatusCode::BAD_GATEWAY,
        IntakeError::Finished => StatusCode::SERVICE_UNAVAILABLE,
    }
}
