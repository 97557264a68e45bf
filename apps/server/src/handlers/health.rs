use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::{ApiResponse, HealthPayload};
use crate::AppState;

/// GET /api/health: liveness plus a database round trip.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthPayload>> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    if !db_ok {
        tracing::warn!("health check: database unreachable");
    }

    Json(ApiResponse::success(HealthPayload {
        status: if db_ok { "ok" } else { "degraded" },
        db: if db_ok { "up" } else { "down" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}
