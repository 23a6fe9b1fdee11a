use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{
    DeactivationResponse, DecisionId, DecisionStatus, NewDecision, ProductGroup, TraderDecision,
    TraderId, TraderRef,
};
use crate::error::AppError;
use crate::ledger::DeactivateOutcome;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub group: ProductGroup,
    pub status: Option<DecisionStatus>,
}

#[derive(Debug, Serialize)]
pub struct DecisionsResponse {
    pub decisions: Vec<TraderDecision>,
}

/// Actor for owner-only transitions.
#[derive(Debug, Deserialize)]
pub struct TraderBody {
    pub trader_id: TraderId,
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub reviewer: TraderRef,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateBody {
    pub requester: TraderRef,
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub response: DeactivationResponse,
    pub responder: TraderRef,
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub decision: TraderDecision,
    /// Other proposed or applied decisions touching the same variables.
    pub conflicts: Vec<TraderDecision>,
}

pub async fn list_decisions(
    Query(params): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<Json<DecisionsResponse>, AppError> {
    let decisions = state.ledger.list(params.group, params.status)?;
    Ok(Json(DecisionsResponse { decisions }))
}

pub async fn get_decision(
    Path(id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<TraderDecision>, AppError> {
    Ok(Json(state.ledger.get(DecisionId(id))?))
}

pub async fn propose(
    State(state): State<AppState>,
    Json(new): Json<NewDecision>,
) -> Result<(StatusCode, Json<TraderDecision>), AppError> {
    if new.trader_name.trim().is_empty() {
        return Err(AppError::BadRequest("trader_name must not be empty".into()));
    }
    let decision = state.ledger.propose(new).await?;
    Ok((StatusCode::CREATED, Json(decision)))
}

pub async fn submit(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<TraderBody>,
) -> Result<Json<TraderDecision>, AppError> {
    Ok(Json(state.ledger.submit(DecisionId(id), body.trader_id).await?))
}

pub async fn apply(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<ApplyResponse>, AppError> {
    let id = DecisionId(id);
    let decision = state.ledger.apply(id, &body.reviewer, body.note).await?;
    let conflicts = state.ledger.conflicting_decisions(id)?;
    if !conflicts.is_empty() {
        tracing::warn!(decision_id = %id, conflicts = conflicts.len(), "applied over conflicting decisions");
    }
    Ok(Json(ApplyResponse { decision, conflicts }))
}

pub async fn reject(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<TraderDecision>, AppError> {
    Ok(Json(
        state
            .ledger
            .reject(DecisionId(id), &body.reviewer, body.note)
            .await?,
    ))
}

pub async fn revoke(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<TraderBody>,
) -> Result<Json<TraderDecision>, AppError> {
    Ok(Json(state.ledger.revoke(DecisionId(id), body.trader_id).await?))
}

pub async fn reactivate(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<TraderBody>,
) -> Result<Json<TraderDecision>, AppError> {
    Ok(Json(
        state
            .ledger
            .reactivate(DecisionId(id), body.trader_id)
            .await?,
    ))
}

/// 200 with the deactivated decision for the owner, 202 with the request
/// notification for anyone else.
pub async fn deactivate(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<DeactivateBody>,
) -> Result<(StatusCode, Json<DeactivateOutcome>), AppError> {
    let outcome = state
        .ledger
        .deactivate(DecisionId(id), &body.requester)
        .await?;
    let status = match outcome {
        DeactivateOutcome::Deactivated { .. } => StatusCode::OK,
        DeactivateOutcome::RequestSent { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

pub async fn respond(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<RespondBody>,
) -> Result<Json<TraderDecision>, AppError> {
    Ok(Json(
        state
            .ledger
            .respond_to_deactivation(DecisionId(id), body.response, &body.responder)
            .await?,
    ))
}

pub async fn conflicts(
    Path(id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<DecisionsResponse>, AppError> {
    let decisions = state.ledger.conflicting_decisions(DecisionId(id))?;
    Ok(Json(DecisionsResponse { decisions }))
}
