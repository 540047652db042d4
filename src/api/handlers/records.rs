//! Record administration handlers.
//!
//! Listing, manual status correction and deletion. None of these go through
//! the scan toggle.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::api::error::{validation_error, ApiError};
use crate::api::types::{MessageResponse, UpdateStatusRequest};
use crate::domain::{ScanRecord, ScanStatus};
use crate::server::AppState;

/// GET /api/rfids - all records, newest first.
pub async fn list_records(State(state): State<AppState>) -> Result<Json<Vec<ScanRecord>>, ApiError> {
    let records = state.admin.list().await?;
    Ok(Json(records))
}

/// PUT /api/rfids/:id - overwrite the status of one record.
pub async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<ScanRecord>, ApiError> {
    let Json(request) = payload?;
    let status = ScanStatus::from_i64(request.status)
        .ok_or_else(|| validation_error("status", "status must be 0 or 1"))?;

    let record = state.admin.update_status(id, status).await?;
    info!(id, status = %record.status, "Record status updated");

    if request.notify {
        // Failures are logged and counted by the processor.
        let _ = state.processor.publish_status(record.status).await;
    }

    Ok(Json(record))
}

/// DELETE /api/rfids/:id
pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.admin.delete(id).await?;
    info!(id, "Record deleted");
    Ok(Json(MessageResponse::new("Deleted successfully")))
}
