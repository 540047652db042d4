//! REST routes for the RFID ledger.

use axum::http::Uri;
use axum::routing::{get, put};
use axum::Router;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::handlers::{create_scan, delete_record, list_records, update_record};
use crate::server::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rfids", get(list_records).post(create_scan))
        .route("/rfids/:id", put(update_record).delete(delete_record))
}

/// Fallback for unknown paths.
pub async fn not_found_fallback(uri: Uri) -> ApiError {
    ApiError::new(
        ErrorCode::ResourceNotFound,
        format!("No route for {}", uri.path()),
    )
}
