use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the database answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state
        .engine
        .repo()
        .ping()
        .await
        .map_err(|e| AppError::Unavailable(format!("database unavailable: {}", e)))?;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "planVersion": state.engine.plan().version,
    })))
}
