//! Pipeline phase events and caller references.

use super::SolveOutcome;
use crate::domain::{ProductGroup, TimeMs};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Who started a pipeline run. Events are tagged with it so each caller
/// can follow only its own run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CallerRef {
    Manual(Uuid),
    Auto(Uuid),
}

impl CallerRef {
    pub fn manual() -> Self {
        CallerRef::Manual(Uuid::new_v4())
    }

    pub fn auto() -> Self {
        CallerRef::Auto(Uuid::new_v4())
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, CallerRef::Auto(_))
    }
}

impl fmt::Display for CallerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerRef::Manual(id) => write!(f, "manual:{}", id),
            CallerRef::Auto(id) => write!(f, "auto:{}", id),
        }
    }
}

/// Phases in the order they can occur. A run may skip phases but never
/// reorders them, and it ends with either `SolveDone` or `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PipelinePhase {
    Started,
    CheckingContracts,
    ContractsOk,
    Ingesting,
    IngestDone,
    ContractsStale,
    Solving,
    SolveDone { outcome: Box<SolveOutcome> },
    Error { message: String },
}

impl PipelinePhase {
    pub fn name(&self) -> &'static str {
        match self {
            PipelinePhase::Started => "started",
            PipelinePhase::CheckingContracts => "checking_contracts",
            PipelinePhase::ContractsOk => "contracts_ok",
            PipelinePhase::Ingesting => "ingesting",
            PipelinePhase::IngestDone => "ingest_done",
            PipelinePhase::ContractsStale => "contracts_stale",
            PipelinePhase::Solving => "solving",
            PipelinePhase::SolveDone { .. } => "solve_done",
            PipelinePhase::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelinePhase::SolveDone { .. } | PipelinePhase::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub caller: CallerRef,
    pub product_group: ProductGroup,
    #[serde(flatten)]
    pub phase: PipelinePhase,
    pub at: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_ref_display_and_kind() {
        let caller = CallerRef::auto();
        assert!(caller.is_auto());
        assert!(caller.to_string().starts_with("auto:"));
        assert!(!CallerRef::manual().is_auto());
    }

    #[test]
    fn test_event_json_flattens_phase() {
        let event = PipelineEvent {
            caller: CallerRef::Manual(Uuid::nil()),
            product_group: ProductGroup::AmmoniaDomestic,
            phase: PipelinePhase::Error {
                message: "solver unreachable".to_string(),
            },
            at: TimeMs::new(5),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "error");
        assert_eq!(json["message"], "solver unreachable");
        assert_eq!(json["caller"]["kind"], "manual");
    }
}
