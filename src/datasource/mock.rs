//! In-process collaborators for tests and offline runs.

use super::{
    ContractIngestor, ContractStore, ContractStoreError, ExplainContext, ExplainError, Explainer,
    IngestError, Solver, SolverError,
};
use crate::domain::{
    ConstraintSet, Contract, Objective, ProductGroup, SolveResult, SolveStatus, VariableKey,
    VariableSnapshot,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Contract store backed by a vector that tests can swap out.
#[derive(Debug, Default)]
pub struct MockContractStore {
    contracts: Mutex<Vec<Contract>>,
    failure: Option<String>,
}

impl MockContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(mut self, contract: Contract) -> Self {
        self.contracts
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .push(contract);
        self
    }

    pub fn with_contracts(mut self, contracts: Vec<Contract>) -> Self {
        self.contracts
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .extend(contracts);
        self
    }

    /// Every read fails with a backend error.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Swap the whole active set, as a re-import or delivery would.
    pub fn replace(&self, contracts: Vec<Contract>) {
        *lock(&self.contracts) = contracts;
    }
}

#[async_trait]
impl ContractStore for MockContractStore {
    async fn active_contracts(&self, group: ProductGroup) -> Result<Vec<Contract>, ContractStoreError> {
        if let Some(msg) = &self.failure {
            return Err(ContractStoreError::Backend(msg.clone()));
        }
        Ok(lock(&self.contracts)
            .iter()
            .filter(|c| c.product_group == group)
            .cloned()
            .collect())
    }
}

/// Ingestor that records calls and optionally stalls or fails.
#[derive(Debug, Default)]
pub struct MockIngestor {
    delay: Option<Duration>,
    failure: Option<IngestError>,
    calls: AtomicUsize,
    last_hash: Mutex<Option<String>>,
}

impl MockIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, err: IngestError) -> Self {
        self.failure = Some(err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Contract hash passed to the most recent `ingest` call.
    pub fn last_hash(&self) -> Option<String> {
        lock(&self.last_hash).clone()
    }
}

#[async_trait]
impl ContractIngestor for MockIngestor {
    async fn ingest(
        &self,
        _group: ProductGroup,
        contract_hash: &str,
        _contracts: &[Contract],
    ) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        *lock(&self.last_hash) = Some(contract_hash.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SolverMode {
    #[default]
    Linear,
    Infeasible,
    Unreachable,
}

/// Linear stand-in for the optimiser: profit is `base_profit` plus a
/// weighted sum of snapshot values. Tracks concurrency so tests can assert
/// that callers never overlap.
#[derive(Debug)]
pub struct MockSolver {
    mode: SolverMode,
    base_profit: f64,
    tons: f64,
    weights: BTreeMap<VariableKey, f64>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockSolver {
    fn default() -> Self {
        Self {
            mode: SolverMode::Linear,
            base_profit: 100_000.0,
            tons: 10_000.0,
            weights: BTreeMap::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_profit(mut self, profit: f64) -> Self {
        self.base_profit = profit;
        self
    }

    pub fn with_weight(mut self, key: &str, weight: f64) -> Self {
        self.weights.insert(VariableKey::new(key), weight);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn infeasible(mut self) -> Self {
        self.mode = SolverMode::Infeasible;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.mode = SolverMode::Unreachable;
        self
    }

    /// Number of `solve` plus `solve_many` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls seen so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn price(&self, snapshot: &VariableSnapshot, constraints: &ConstraintSet) -> SolveResult {
        if self.mode == SolverMode::Infeasible {
            return SolveResult::infeasible();
        }
        let profit = self.base_profit
            + self
                .weights
                .iter()
                .map(|(k, w)| snapshot.get_f64(k).unwrap_or(0.0) * w)
                .sum::<f64>();
        let n = constraints.route_keys.len().max(1) as f64;
        let cost = self.tons * 300.0;
        SolveResult {
            status: SolveStatus::Optimal,
            profit,
            tons: self.tons,
            roi: if cost > 0.0 { profit / cost } else { 0.0 },
            cost,
            route_tons: vec![self.tons / n; constraints.route_keys.len()],
            route_margins: vec![profit / self.tons; constraints.route_keys.len()],
            route_profits: vec![profit / n; constraints.route_keys.len()],
        }
    }

    async fn enter(&self) -> Result<(), SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.mode == SolverMode::Unreachable {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(SolverError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Solver for MockSolver {
    async fn solve(
        &self,
        snapshot: &VariableSnapshot,
        constraints: &ConstraintSet,
        _objective: Objective,
    ) -> Result<SolveResult, SolverError> {
        self.enter().await?;
        let result = self.price(snapshot, constraints);
        self.leave();
        Ok(result)
    }

    async fn solve_many(
        &self,
        snapshots: &[VariableSnapshot],
        constraints: &ConstraintSet,
        _objective: Objective,
    ) -> Result<Vec<SolveResult>, SolverError> {
        self.enter().await?;
        let results = snapshots.iter().map(|s| self.price(s, constraints)).collect();
        self.leave();
        Ok(results)
    }
}

/// Explainer with a fixed reply.
#[derive(Debug, Clone)]
pub struct MockExplainer {
    reply: Result<String, ExplainError>,
}

impl MockExplainer {
    pub fn ok(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(ExplainError::Unavailable(message.to_string())),
        }
    }
}

#[async_trait]
impl Explainer for MockExplainer {
    async fn explain(&self, context: &ExplainContext) -> Result<String, ExplainError> {
        self.reply
            .clone()
            .map(|text| format!("[{}] {}", context.product_group, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Incoterm, TimeMs, Tonnes};

    fn constraints() -> ConstraintSet {
        ConstraintSet {
            product_group: ProductGroup::AmmoniaDomestic,
            contract_hash: String::new(),
            contracts: vec![],
            route_keys: vec!["don_stl".to_string(), "don_mem".to_string()],
        }
    }

    #[tokio::test]
    async fn test_linear_profit_uses_weights() {
        let solver = MockSolver::new().with_base_profit(10.0).with_weight("nola_buy", -2.0);
        let snap = VariableSnapshot::from_pairs([("nola_buy", 3.0)], TimeMs::new(0));
        let result = solver.solve(&snap, &constraints(), Objective::MaxProfit).await.unwrap();
        assert_eq!(result.profit, 4.0);
        assert_eq!(result.route_tons.len(), 2);
        assert_eq!(solver.calls(), 1);
        assert_eq!(solver.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_store_filters_by_group_and_replace() {
        let contract = Contract {
            contract_number: "P-9".to_string(),
            counterparty: "Yara".to_string(),
            product_group: ProductGroup::AmmoniaInternational,
            direction: Direction::Purchase,
            incoterm: Incoterm::Fob,
            total_qty_mt: Tonnes::from(20_000),
            delivered_qty_mt: Tonnes::zero(),
        };
        let store = MockContractStore::new().with_contract(contract);
        assert!(store
            .active_contracts(ProductGroup::AmmoniaDomestic)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .active_contracts(ProductGroup::AmmoniaInternational)
                .await
                .unwrap()
                .len(),
            1
        );
        store.replace(vec![]);
        assert!(store
            .active_contracts(ProductGroup::AmmoniaInternational)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failing_ingestor_counts_calls() {
        let ingestor = MockIngestor::new().failing(IngestError::Rejected("bad hash".to_string()));
        let err = ingestor
            .ingest(ProductGroup::AmmoniaDomestic, "sha256:00", &[])
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::Rejected("bad hash".to_string()));
        assert_eq!(ingestor.calls(), 1);
        assert!(ingestor.last_hash().is_none());
    }
}
