use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use super::live::GroupQuery;
use super::AppState;
use crate::datasource::sap_csv::parse_open_positions;
use crate::engine::{book_summary, content_hash, BookSummary};
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct BookResponse {
    #[serde(flatten)]
    pub summary: BookSummary,
    pub contract_hash: String,
    /// Hash the solver model was last built from, if any.
    pub ingested_hash: Option<String>,
}

pub async fn get_book(
    Query(params): Query<GroupQuery>,
    State(state): State<AppState>,
) -> Result<Json<BookResponse>, AppError> {
    let gate = state.pipeline.gate();
    let contracts = gate.store().active_contracts(params.group).await?;
    Ok(Json(BookResponse {
        summary: book_summary(params.group, &contracts),
        contract_hash: content_hash(&contracts),
        ingested_hash: gate.last_ingested(params.group).await,
    }))
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub contract_hash: String,
}

/// Upsert an SAP open-position export (CSV request body).
pub async fn import_contracts(
    Query(params): Query<GroupQuery>,
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ImportResponse>, AppError> {
    let repo = state
        .repo
        .as_ref()
        .ok_or_else(|| AppError::Config("contract repository is not configured".into()))?;
    let contracts = parse_open_positions(body.as_bytes(), params.group)?;
    let imported = repo.upsert_contracts(&contracts).await?;
    let active = state.pipeline.gate().store().active_contracts(params.group).await?;
    Ok(Json(ImportResponse {
        imported,
        contract_hash: content_hash(&active),
    }))
}
