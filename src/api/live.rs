use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AppState;
use crate::domain::{ProductGroup, TimeMs, TraderDecision, VariableKey, VariableSnapshot, VariableValue};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    pub group: ProductGroup,
}

#[derive(Debug, Serialize)]
pub struct EffectiveStateResponse {
    pub product_group: ProductGroup,
    pub version: u64,
    pub live: VariableSnapshot,
    pub effective: VariableSnapshot,
}

pub async fn get_effective_state(
    Query(params): Query<GroupQuery>,
    State(state): State<AppState>,
) -> Result<Json<EffectiveStateResponse>, AppError> {
    let view = state.ledger.view(params.group)?;
    Ok(Json(EffectiveStateResponse {
        product_group: params.group,
        version: view.version,
        live: view.live.clone(),
        effective: view.effective.clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LiveBody {
    pub product_group: ProductGroup,
    pub values: BTreeMap<VariableKey, VariableValue>,
    #[serde(default)]
    pub captured_at: Option<TimeMs>,
}

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    /// Decisions whose status changed because of drift.
    pub changed: Vec<TraderDecision>,
}

/// Take new live readings, then let the group's auto-runner look at them.
pub async fn post_live(
    State(state): State<AppState>,
    Json(body): Json<LiveBody>,
) -> Result<Json<LiveResponse>, AppError> {
    if body.values.is_empty() {
        return Err(AppError::BadRequest("values must not be empty".into()));
    }
    let readings = VariableSnapshot::new(body.values, body.captured_at.unwrap_or_else(TimeMs::now));
    let changed = state
        .ledger
        .update_live(body.product_group, &readings)
        .await?;
    if let Some(runner) = state.runners.get(&body.product_group) {
        runner.nudge();
    }
    Ok(Json(LiveResponse { changed }))
}
