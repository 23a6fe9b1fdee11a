//! External collaborators: contract store, ingestion, solver, explainer and
//! the live snapshot source.
//!
//! The core only talks to these traits. `mock` has in-process
//! implementations for tests; `http` talks to the real services.

use crate::domain::{
    ConstraintSet, Contract, Distribution, Objective, ProductGroup, SolveMode, SolveResult,
    VariableSnapshot,
};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod http;
pub mod mock;
pub mod sap_csv;

pub use http::{HttpExplainer, HttpIngestor, HttpSolver};
pub use mock::{MockContractStore, MockExplainer, MockIngestor, MockSolver};
pub use sap_csv::{parse_open_positions, CsvImportError};

/// Read access to the active contract set.
///
/// `db::Repository` is the production store; `MockContractStore` holds an
/// in-memory list for tests.
#[async_trait]
pub trait ContractStore: Send + Sync + fmt::Debug {
    /// Active contracts for a product group, in no particular order.
    ///
    /// # Arguments
    /// * `group` - Product group whose book is read
    ///
    /// # Errors
    /// `Backend` when the store cannot be read, `InvalidRow` when a stored
    /// contract cannot be decoded.
    async fn active_contracts(&self, group: ProductGroup) -> Result<Vec<Contract>, ContractStoreError>;
}

/// Rebuilds the external constraint model from a contract set.
#[async_trait]
pub trait ContractIngestor: Send + Sync + fmt::Debug {
    /// Returns once the model is rebuilt. Callers put their own timeout
    /// around this.
    ///
    /// # Arguments
    /// * `group` - Product group being rebuilt
    /// * `contract_hash` - `content_hash` of `contracts`, recorded by the model
    /// * `contracts` - The full active set, not a diff
    ///
    /// # Errors
    /// Transport failures and rejections by the ingestion service.
    async fn ingest(
        &self,
        group: ProductGroup,
        contract_hash: &str,
        contracts: &[Contract],
    ) -> Result<(), IngestError>;
}

/// External optimisation service.
///
/// An infeasible problem is a successful call whose result has
/// `status = infeasible`; only transport and protocol failures are errors.
#[async_trait]
pub trait Solver: Send + Sync + fmt::Debug {
    /// Solve one snapshot against the constraint set.
    ///
    /// # Errors
    /// `Unreachable` when the service cannot be reached, `Protocol` when it
    /// answers with something that is not a result.
    async fn solve(
        &self,
        snapshot: &VariableSnapshot,
        constraints: &ConstraintSet,
        objective: Objective,
    ) -> Result<SolveResult, SolverError>;

    /// One result per snapshot, index-aligned with the input. Used for
    /// Monte-Carlo batches.
    ///
    /// # Errors
    /// Same as `solve`. A batch fails as a whole.
    async fn solve_many(
        &self,
        snapshots: &[VariableSnapshot],
        constraints: &ConstraintSet,
        objective: Objective,
    ) -> Result<Vec<SolveResult>, SolverError>;
}

/// What the explainer gets to see about a finished solve.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainContext {
    pub product_group: ProductGroup,
    pub mode: SolveMode,
    pub objective: Objective,
    pub snapshot: VariableSnapshot,
    pub result: Option<SolveResult>,
    pub distribution: Option<Distribution>,
}

/// Slow and fallible narrative explanation of a solve. Never retried by
/// the core.
#[async_trait]
pub trait Explainer: Send + Sync + fmt::Debug {
    /// Narrative text for a finished solve.
    ///
    /// # Errors
    /// `Unavailable` or `InvalidResponse`. The pipeline records either on
    /// the outcome and still returns the numbers.
    async fn explain(&self, context: &ExplainContext) -> Result<String, ExplainError>;
}

/// Current variable values for a product group.
#[async_trait]
pub trait SnapshotSource: Send + Sync + fmt::Debug {
    /// Latest snapshot, or `None` for a group the source does not serve.
    async fn snapshot(&self, group: ProductGroup) -> Option<VariableSnapshot>;
}

/// Error type for contract store reads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractStoreError {
    /// Database or transport failure
    #[error("contract store backend error: {0}")]
    Backend(String),
    /// A stored row with an unknown enum value or bad tonnage
    #[error("invalid contract row: {0}")]
    InvalidRow(String),
}

/// Error type for ingestion calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    /// Connection failure or timeout (retried by `HttpIngestor`)
    #[error("network error: {0}")]
    Network(String),
    /// 429 or 5xx status, retried until the backoff budget runs out
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    /// Any other non-success status: the service refused the contract set
    #[error("ingestion rejected: {0}")]
    Rejected(String),
}

/// Error type for solver calls. Never retried by the core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SolverError {
    /// Connection failure, timeout or 5xx status
    #[error("solver unreachable: {0}")]
    Unreachable(String),
    /// Other non-success status, or an undecodable response body
    #[error("solver protocol error: {0}")]
    Protocol(String),
}

/// Error type for explainer calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExplainError {
    #[error("explainer unavailable: {0}")]
    Unavailable(String),
    #[error("explainer returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestError::Http {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: busy");

        let err = SolverError::Unreachable("connection refused".to_string());
        assert_eq!(err.to_string(), "solver unreachable: connection refused");
    }
}
