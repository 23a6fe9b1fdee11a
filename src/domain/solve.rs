//! Solver inputs and outputs: objectives, results and Monte-Carlo distributions.

use super::contract::Direction;
use super::decimal::Tonnes;
use super::primitives::{ProductGroup, VariableKey};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    MaxProfit,
    MinCost,
    MaxRoi,
    CvarAdjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    #[default]
    Solve,
    MonteCarlo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Error,
}

/// One solver run. Route vectors are index-aligned with the group's route
/// registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub profit: f64,
    pub tons: f64,
    pub roi: f64,
    pub cost: f64,
    #[serde(default)]
    pub route_tons: Vec<f64>,
    #[serde(default)]
    pub route_margins: Vec<f64>,
    #[serde(default)]
    pub route_profits: Vec<f64>,
}

impl SolveResult {
    pub fn infeasible() -> Self {
        Self {
            status: SolveStatus::Infeasible,
            profit: 0.0,
            tons: 0.0,
            roi: 0.0,
            cost: 0.0,
            route_tons: Vec::new(),
            route_margins: Vec::new(),
            route_profits: Vec::new(),
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.status == SolveStatus::Optimal
    }
}

/// Go/no-go summary of a Monte-Carlo profit distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    StrongGo,
    Go,
    Cautious,
    Weak,
    NoGo,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::StrongGo => "strong_go",
            Signal::Go => "go",
            Signal::Cautious => "cautious",
            Signal::Weak => "weak",
            Signal::NoGo => "no_go",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Correlation of one varied input against scenario profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensitivity {
    pub variable: VariableKey,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub n_scenarios: usize,
    pub n_feasible: usize,
    pub percentiles: Percentiles,
    pub mean: f64,
    pub signal: Signal,
    /// Sorted by |correlation| descending, truncated to the configured top K.
    pub sensitivity: Vec<Sensitivity>,
}

/// Open contractual obligation handed to the solver as a bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractConstraint {
    pub contract_number: String,
    pub counterparty: String,
    pub direction: Direction,
    pub open_qty_mt: Tonnes,
}

/// Constraint model derived from the active contract set of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub product_group: ProductGroup,
    /// Content hash of the contracts these constraints were built from.
    pub contract_hash: String,
    pub contracts: Vec<ContractConstraint>,
    pub route_keys: Vec<String>,
}
