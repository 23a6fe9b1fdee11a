use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{Objective, ProductGroup, SolveMode, VariableSnapshot};
use crate::error::AppError;
use crate::notify::{DeskEvent, Topic};
use crate::pipeline::{CallerRef, SolveOutcome, SolveRequest};

#[derive(Debug, Deserialize)]
pub struct SolveBody {
    pub product_group: ProductGroup,
    /// Defaults to the group's current effective state.
    #[serde(default)]
    pub snapshot: Option<VariableSnapshot>,
    #[serde(default)]
    pub mode: SolveMode,
    #[serde(default)]
    pub objective: Objective,
    #[serde(default)]
    pub scenarios: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SolveResponse {
    pub caller: CallerRef,
    pub phases: Vec<&'static str>,
    pub outcome: SolveOutcome,
}

pub async fn post_solve(
    State(state): State<AppState>,
    Json(body): Json<SolveBody>,
) -> Result<Json<SolveResponse>, AppError> {
    if body.scenarios == Some(0) {
        return Err(AppError::BadRequest("scenarios must be positive".into()));
    }
    let snapshot = match body.snapshot {
        Some(s) => s,
        None => state.ledger.effective_state(body.product_group)?,
    };
    let request = SolveRequest {
        product_group: body.product_group,
        snapshot,
        mode: body.mode,
        objective: body.objective,
        scenarios: body.scenarios,
    };

    let caller = CallerRef::manual();
    let mut events = state.pipeline.bus().subscribe(Topic::Pipeline(caller));
    let outcome = state.pipeline.solve(request, caller).await?;

    let mut phases = Vec::new();
    while let Some(event) = events.try_recv() {
        if let DeskEvent::Pipeline(e) = event {
            phases.push(e.phase.name());
        }
    }
    Ok(Json(SolveResponse {
        caller,
        phases,
        outcome,
    }))
}
