//! HTTP clients for the optimiser, the constraint-model ingestion service
//! and the narrative explainer.

use super::{
    ContractIngestor, ExplainContext, ExplainError, Explainer, IngestError, Solver, SolverError,
};
use crate::domain::{ConstraintSet, Contract, Objective, ProductGroup, SolveResult, VariableSnapshot};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct SolveBody<'a> {
    snapshot: &'a VariableSnapshot,
    constraints: &'a ConstraintSet,
    objective: Objective,
}

#[derive(Debug, Serialize)]
struct SolveManyBody<'a> {
    snapshots: &'a [VariableSnapshot],
    constraints: &'a ConstraintSet,
    objective: Objective,
}

#[derive(Debug, Deserialize)]
struct SolveManyReply {
    results: Vec<SolveResult>,
}

/// Optimiser client. Requests are not retried: a failed solve is reported
/// to the caller straight away.
#[derive(Debug, Clone)]
pub struct HttpSolver {
    client: Client,
    base_url: String,
}

impl HttpSolver {
    /// Client for `{base_url}/solve` and `{base_url}/solve_many`. A trailing
    /// slash on `base_url` is ignored.
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SolverError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SolverError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SolverError::Unreachable(format!("{} returned {}", url, status.as_u16())));
        }
        if !status.is_success() {
            return Err(SolverError::Protocol(format!("{} returned {}", url, status.as_u16())));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| SolverError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Solver for HttpSolver {
    async fn solve(
        &self,
        snapshot: &VariableSnapshot,
        constraints: &ConstraintSet,
        objective: Objective,
    ) -> Result<SolveResult, SolverError> {
        debug!(group = %constraints.product_group, "posting solve");
        self.post(
            "/solve",
            &SolveBody {
                snapshot,
                constraints,
                objective,
            },
        )
        .await
    }

    async fn solve_many(
        &self,
        snapshots: &[VariableSnapshot],
        constraints: &ConstraintSet,
        objective: Objective,
    ) -> Result<Vec<SolveResult>, SolverError> {
        debug!(group = %constraints.product_group, scenarios = snapshots.len(), "posting solve_many");
        let reply: SolveManyReply = self
            .post(
                "/solve_many",
                &SolveManyBody {
                    snapshots,
                    constraints,
                    objective,
                },
            )
            .await?;
        Ok(reply.results)
    }
}

#[derive(Debug, Serialize)]
struct IngestBody<'a> {
    product_group: ProductGroup,
    contract_hash: &'a str,
    contracts: &'a [Contract],
}

/// Ingestion client. 429 and 5xx responses are retried with exponential
/// backoff for at most `max_elapsed`; other 4xx responses fail at once.
#[derive(Debug, Clone)]
pub struct HttpIngestor {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpIngestor {
    /// Client for `{base_url}/ingest`. `max_elapsed` bounds the whole retry
    /// loop, not a single attempt.
    pub fn new(base_url: String, max_elapsed: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed,
        }
    }
}

#[async_trait]
impl ContractIngestor for HttpIngestor {
    async fn ingest(
        &self,
        group: ProductGroup,
        contract_hash: &str,
        contracts: &[Contract],
    ) -> Result<(), IngestError> {
        let url = format!("{}/ingest", self.base_url);
        let body = IngestBody {
            product_group: group,
            contract_hash,
            contracts,
        };
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(IngestError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                warn!(group = %group, status = status.as_u16(), "ingestion retrying");
                return Err(backoff::Error::transient(IngestError::Http {
                    status: status.as_u16(),
                    message: "Server busy".to_string(),
                }));
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(backoff::Error::permanent(IngestError::Rejected(format!(
                    "{}: {}",
                    status.as_u16(),
                    message
                ))));
            }
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ExplainReply {
    text: String,
}

/// Explainer client for `{base_url}/explain`. Not retried; the pipeline
/// records a failure next to the numbers.
#[derive(Debug, Clone)]
pub struct HttpExplainer {
    client: Client,
    base_url: String,
}

impl HttpExplainer {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Explainer for HttpExplainer {
    async fn explain(&self, context: &ExplainContext) -> Result<String, ExplainError> {
        let url = format!("{}/explain", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(context)
            .send()
            .await
            .map_err(|e| ExplainError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExplainError::Unavailable(format!("{} returned {}", url, status.as_u16())));
        }
        let reply: ExplainReply = response
            .json()
            .await
            .map_err(|e| ExplainError::InvalidResponse(e.to_string()))?;
        if reply.text.trim().is_empty() {
            return Err(ExplainError::InvalidResponse("empty explanation".to_string()));
        }
        Ok(reply.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeMs;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let solver = HttpSolver::new("http://solver:9000/".to_string());
        assert_eq!(solver.base_url, "http://solver:9000");
    }

    #[test]
    fn test_solve_body_shape() {
        let snapshot = VariableSnapshot::from_pairs([("nola_buy", 320.0)], TimeMs::new(1));
        let constraints = ConstraintSet {
            product_group: ProductGroup::AmmoniaDomestic,
            contract_hash: "sha256:ab".to_string(),
            contracts: vec![],
            route_keys: vec!["don_stl".to_string()],
        };
        let body = SolveBody {
            snapshot: &snapshot,
            constraints: &constraints,
            objective: Objective::MaxRoi,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["objective"], "max_roi");
        assert_eq!(json["constraints"]["route_keys"][0], "don_stl");
    }

    #[tokio::test]
    async fn test_unreachable_solver_maps_to_unreachable() {
        // Nothing listens on the discard port.
        let solver = HttpSolver::new("http://127.0.0.1:9".to_string());
        let snapshot = VariableSnapshot::default();
        let constraints = ConstraintSet {
            product_group: ProductGroup::AmmoniaDomestic,
            contract_hash: String::new(),
            contracts: vec![],
            route_keys: vec![],
        };
        let err = solver
            .solve(&snapshot, &constraints, Objective::MaxProfit)
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::Unreachable(_)));
    }
}
