use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/plugins: task plugins with their parameter descriptions.
pub async fn list_plugins(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!(app.plugins.list()))
}

/// GET /api/connector-plugins
pub async fn list_connector_plugins(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!(app.connectors.list()))
}
