use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use super::live::GroupQuery;
use super::AppState;
use crate::autorunner::AutoRunRecord;
use crate::domain::{ProductGroup, VariableSnapshot};
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct AutoRunsResponse {
    pub product_group: ProductGroup,
    pub in_flight: bool,
    pub baseline: Option<VariableSnapshot>,
    /// Newest first.
    pub runs: Vec<AutoRunRecord>,
}

pub async fn get_auto_runs(
    Query(params): Query<GroupQuery>,
    State(state): State<AppState>,
) -> Result<Json<AutoRunsResponse>, AppError> {
    let runner = state.runner(params.group)?;
    let mut runs = runner.history();
    runs.reverse();
    Ok(Json(AutoRunsResponse {
        product_group: params.group,
        in_flight: runner.is_in_flight(),
        baseline: runner.baseline(),
        runs,
    }))
}
