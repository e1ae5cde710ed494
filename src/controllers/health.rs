use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use crate::infrastructure::db::{check_connection, DbPool};

/// Liveness
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness of the job store. Without a database jobs live in memory,
/// which is always ready.
pub async fn health_ready(State(pool): State<Option<Arc<DbPool>>>) -> impl IntoResponse {
    let database = match pool {
        None => "in-memory",
        Some(pool) => match check_connection(&pool).await {
            Ok(true) => "connected",
            Ok(false) | Err(_) => {
                tracing::warn!("Readiness check failed: job store unreachable");
                return readiness(StatusCode::SERVICE_UNAVAILABLE, "not_ready", "disconnected");
            }
        },
    };

    readiness(StatusCode::OK, "ready", database)
}

fn readiness(
    code: StatusCode,
    status: &str,
    database: &str,
) -> (StatusCode, Json<serde_json::Value>) {
    (code, Json(json!({ "status": status, "database": database })))
}
