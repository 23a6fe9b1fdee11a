use crate::datasource::sap_csv::CsvImportError;
use crate::datasource::ContractStoreError;
use crate::ledger::LedgerError;
use crate::notify::NotifyError;
use crate::pipeline::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Upstream unavailable: {0}")]
    BadGateway(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let msg = err.to_string();
        match err {
            LedgerError::NotFound(_) => AppError::NotFound(msg),
            LedgerError::InvalidTransition { .. } | LedgerError::NoPendingRequest(_) => {
                AppError::Conflict(msg)
            }
            LedgerError::SelfReview { .. } | LedgerError::NotOwner { .. } => AppError::Forbidden(msg),
            LedgerError::UnknownProductGroup(_) | LedgerError::InvalidInput(_) => {
                AppError::BadRequest(msg)
            }
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let msg = err.to_string();
        match err {
            PipelineError::SolverUnreachable(_) => AppError::BadGateway(msg),
            PipelineError::UnknownProductGroup(_) => AppError::BadRequest(msg),
            PipelineError::Cancelled | PipelineError::ContractStore(_) | PipelineError::Internal(_) => {
                AppError::Internal(msg)
            }
        }
    }
}

impl From<NotifyError> for AppError {
    fn from(err: NotifyError) -> Self {
        let msg = err.to_string();
        match err {
            NotifyError::NotFound(_) => AppError::NotFound(msg),
            NotifyError::NoPendingRequest(_) => AppError::Conflict(msg),
        }
    }
}

impl From<ContractStoreError> for AppError {
    fn from(err: ContractStoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<CsvImportError> for AppError {
    fn from(err: CsvImportError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
