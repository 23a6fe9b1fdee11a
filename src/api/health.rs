use super::AppState;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the ledger serves at least one product group.
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let groups: Vec<&'static str> = state.ledger.groups().map(|g| g.as_str()).collect();
    let status = if groups.is_empty() { "starting" } else { "ready" };
    Json(serde_json::json!({
        "status": status,
        "groups": groups,
        "auto_runners": state.runners.len(),
    }))
}
