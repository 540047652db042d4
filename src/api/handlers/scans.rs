//! Reader scan handler.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::{missing_field, ApiError};
use crate::api::types::{ScanRequest, ScanResponse};
use crate::server::AppState;

/// POST /api/rfids - record a scan and publish the resulting status.
pub async fn create_scan(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let Json(request) = payload?;
    let raw_tag = request
        .rfid_number
        .ok_or_else(|| missing_field("rfid_number"))?;

    let scan = state.processor.process_scan(&raw_tag).await?;

    Ok((
        StatusCode::CREATED,
        Json(ScanResponse::new(scan.record, scan.registered)),
    ))
}
