//! Scenario solve pipeline.
//!
//! A run goes `started → checking_contracts → {contracts_ok | ingesting →
//! ingest_done | contracts_stale} → solving → solve_done`, broadcasting
//! every phase on `Topic::Pipeline(caller)`. A failed or slow ingestion
//! does not fail the run; the outcome is labelled `contracts_stale`
//! instead. An unreachable solver ends the run with an `error` phase.

pub mod events;
pub mod gate;

pub use events::{CallerRef, PipelineEvent, PipelinePhase};
pub use gate::{ContractCheck, ContractGate, IngestStatus};

use crate::datasource::{ContractStoreError, ExplainContext, Explainer, Solver, SolverError};
use crate::domain::{
    Distribution, Objective, ProductGroup, SolveMode, SolveResult, TimeMs, VariableSnapshot,
};
use crate::engine::{aggregate, constraint_set, perturb};
use crate::frame::FrameRegistry;
use crate::notify::{DeskEvent, EventBus, Topic};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("solver unreachable: {0}")]
    SolverUnreachable(String),
    #[error("solve cancelled")]
    Cancelled,
    #[error("product group {0} is not configured")]
    UnknownProductGroup(ProductGroup),
    #[error(transparent)]
    ContractStore(#[from] ContractStoreError),
    #[error("pipeline task failed: {0}")]
    Internal(String),
}

impl From<SolverError> for PipelineError {
    fn from(err: SolverError) -> Self {
        PipelineError::SolverUnreachable(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mc_scenarios: usize,
    pub mc_top_k: usize,
    /// Fixed seed for reproducible perturbation; fresh entropy per run
    /// otherwise.
    pub mc_seed: Option<u64>,
    pub ingest_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mc_scenarios: 1000,
            mc_top_k: 6,
            mc_seed: None,
            ingest_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveRequest {
    pub product_group: ProductGroup,
    pub snapshot: VariableSnapshot,
    #[serde(default)]
    pub mode: SolveMode,
    #[serde(default)]
    pub objective: Objective,
    /// Overrides the configured Monte-Carlo scenario count.
    #[serde(default)]
    pub scenarios: Option<usize>,
}

impl SolveRequest {
    pub fn new(product_group: ProductGroup, snapshot: VariableSnapshot) -> Self {
        Self {
            product_group,
            snapshot,
            mode: SolveMode::Solve,
            objective: Objective::MaxProfit,
            scenarios: None,
        }
    }

    pub fn monte_carlo(mut self) -> Self {
        self.mode = SolveMode::MonteCarlo;
        self
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_scenarios(mut self, n: usize) -> Self {
        self.scenarios = Some(n);
        self
    }
}

/// Terminal value of a successful run. Exactly one of `result` and
/// `distribution` is set, matching `mode`.
#[derive(Debug, Clone, Serialize)]
pub struct SolveOutcome {
    pub caller: CallerRef,
    pub product_group: ProductGroup,
    pub mode: SolveMode,
    pub objective: Objective,
    pub contracts_stale: bool,
    pub contract_hash: String,
    pub snapshot: VariableSnapshot,
    pub result: Option<SolveResult>,
    pub distribution: Option<Distribution>,
    pub explanation: Option<String>,
    /// Set when the explainer failed; numeric results are still complete.
    pub explanation_error: Option<String>,
    pub started_at: TimeMs,
    pub finished_at: TimeMs,
}

/// Running pipeline task. Dropping the handle detaches the run; only
/// `cancel` stops it.
#[derive(Debug)]
pub struct SolveHandle {
    caller: CallerRef,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<SolveOutcome, PipelineError>>,
}

impl SolveHandle {
    pub fn caller(&self) -> CallerRef {
        self.caller
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn wait(self) -> Result<SolveOutcome, PipelineError> {
        match self.join.await {
            Ok(res) => res,
            Err(err) if err.is_cancelled() => Err(PipelineError::Cancelled),
            Err(err) => Err(PipelineError::Internal(err.to_string())),
        }
    }
}

/// Resolves once `true` is sent. A dropped sender never cancels.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

#[derive(Debug)]
pub struct SolvePipeline {
    frames: Arc<FrameRegistry>,
    gate: ContractGate,
    solver: Arc<dyn Solver>,
    explainer: Option<Arc<dyn Explainer>>,
    bus: EventBus,
    settings: PipelineSettings,
}

impl SolvePipeline {
    pub fn new(
        frames: Arc<FrameRegistry>,
        gate: ContractGate,
        solver: Arc<dyn Solver>,
        bus: EventBus,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            frames,
            gate,
            solver,
            explainer: None,
            bus,
            settings,
        }
    }

    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = Some(explainer);
        self
    }

    pub fn gate(&self) -> &ContractGate {
        &self.gate
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn frames(&self) -> &FrameRegistry {
        &self.frames
    }

    fn emit(&self, caller: CallerRef, group: ProductGroup, phase: PipelinePhase) {
        tracing::info!(caller = %caller, group = %group, phase = phase.name(), "pipeline phase");
        self.bus.publish(
            Topic::Pipeline(caller),
            DeskEvent::Pipeline(PipelineEvent {
                caller,
                product_group: group,
                phase,
                at: TimeMs::now(),
            }),
        );
    }

    /// Run in the background and return right away. Subscribe to
    /// `Topic::Pipeline(handle.caller())` for the phase stream.
    pub fn solve_async(self: &Arc<Self>, request: SolveRequest, caller: CallerRef) -> SolveHandle {
        let (cancel, rx) = watch::channel(false);
        let pipeline = Arc::clone(self);
        let join = tokio::spawn(async move {
            let group = request.product_group;
            tokio::select! {
                res = pipeline.solve(request, caller) => res,
                _ = cancelled(rx) => {
                    pipeline.emit(caller, group, PipelinePhase::Error {
                        message: PipelineError::Cancelled.to_string(),
                    });
                    Err(PipelineError::Cancelled)
                }
            }
        });
        SolveHandle { caller, cancel, join }
    }

    pub fn monte_carlo_async(self: &Arc<Self>, request: SolveRequest, caller: CallerRef) -> SolveHandle {
        self.solve_async(request.monte_carlo(), caller)
    }

    /// Run to completion on the current task. Dropping the future abandons
    /// the run at its current suspension point.
    pub async fn solve(&self, request: SolveRequest, caller: CallerRef) -> Result<SolveOutcome, PipelineError> {
        let group = request.product_group;
        match self.run(request, caller).await {
            Ok(outcome) => {
                self.emit(
                    caller,
                    group,
                    PipelinePhase::SolveDone {
                        outcome: Box::new(outcome.clone()),
                    },
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(caller = %caller, group = %group, error = %err, "pipeline run failed");
                self.emit(
                    caller,
                    group,
                    PipelinePhase::Error {
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    async fn run(&self, request: SolveRequest, caller: CallerRef) -> Result<SolveOutcome, PipelineError> {
        let started_at = TimeMs::now();
        let group = request.product_group;
        self.emit(caller, group, PipelinePhase::Started);
        let frame = self
            .frames
            .get(group)
            .ok_or(PipelineError::UnknownProductGroup(group))?;

        self.emit(caller, group, PipelinePhase::CheckingContracts);
        let check = self.gate.check(group).await?;
        let contracts_stale = if check.fresh {
            self.emit(caller, group, PipelinePhase::ContractsOk);
            false
        } else {
            self.emit(caller, group, PipelinePhase::Ingesting);
            match self.gate.ingest(group, &check).await {
                IngestStatus::Done => {
                    self.emit(caller, group, PipelinePhase::IngestDone);
                    false
                }
                IngestStatus::TimedOut | IngestStatus::Failed(_) => {
                    self.emit(caller, group, PipelinePhase::ContractsStale);
                    true
                }
            }
        };
        let constraints = constraint_set(group, &check.contracts, frame.route_keys());

        self.emit(caller, group, PipelinePhase::Solving);
        let (result, distribution) = match request.mode {
            SolveMode::Solve => {
                let result = self
                    .solver
                    .solve(&request.snapshot, &constraints, request.objective)
                    .await?;
                (Some(result), None)
            }
            SolveMode::MonteCarlo => {
                let n = request.scenarios.unwrap_or(self.settings.mc_scenarios).max(1);
                let set = {
                    let mut rng = match self.settings.mc_seed {
                        Some(seed) => StdRng::seed_from_u64(seed),
                        None => StdRng::from_entropy(),
                    };
                    perturb(&request.snapshot, frame, n, &mut rng)
                };
                let results = self
                    .solver
                    .solve_many(&set.scenarios, &constraints, request.objective)
                    .await?;
                if results.len() != set.scenarios.len() {
                    return Err(PipelineError::SolverUnreachable(format!(
                        "solver returned {} results for {} scenarios",
                        results.len(),
                        set.scenarios.len()
                    )));
                }
                (None, Some(aggregate(&set, &results, self.settings.mc_top_k)))
            }
        };

        let mut outcome = SolveOutcome {
            caller,
            product_group: group,
            mode: request.mode,
            objective: request.objective,
            contracts_stale,
            contract_hash: check.hash,
            snapshot: request.snapshot,
            result,
            distribution,
            explanation: None,
            explanation_error: None,
            started_at,
            finished_at: started_at,
        };

        if let Some(explainer) = &self.explainer {
            let context = ExplainContext {
                product_group: group,
                mode: outcome.mode,
                objective: outcome.objective,
                snapshot: outcome.snapshot.clone(),
                result: outcome.result.clone(),
                distribution: outcome.distribution.clone(),
            };
            match explainer.explain(&context).await {
                Ok(text) => outcome.explanation = Some(text),
                Err(err) => {
                    tracing::warn!(caller = %caller, group = %group, error = %err, "explanation failed");
                    outcome.explanation_error = Some(err.to_string());
                }
            }
        }

        outcome.finished_at = TimeMs::now();
        Ok(outcome)
    }
}
