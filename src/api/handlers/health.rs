//! Health, readiness and metrics handlers

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::{ApiError, ErrorCode};
use crate::metrics::metric_names;
use crate::server::AppState;

/// Response for the liveness endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "rfid-ledger",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /ready - 200 once the ledger answers a query.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.admin.count().await {
        Ok(records) => Ok(Json(serde_json::json!({
            "status": "ready",
            "database": "connected",
            "records": records,
        }))),
        Err(e) => Err(ApiError::new(
            ErrorCode::ServiceUnavailable,
            format!("Database unavailable: {}", e),
        )),
    }
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.processor.metrics();

    if let Ok(count) = state.admin.count().await {
        registry.set_gauge(metric_names::LEDGER_RECORDS, count).await;
    }
    registry
        .set_gauge(
            metric_names::TAG_LOCKS_ACTIVE,
            state.processor.active_locks() as u64,
        )
        .await;

    let mut body = registry.to_json().await;
    body["notifier"] = state.processor.notifier_stats().to_json();
    body["notifier"]["state"] =
        serde_json::Value::from(state.processor.notifier_state().await.to_string());
    Json(body)
}
