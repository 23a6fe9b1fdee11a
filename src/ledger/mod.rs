//! Decision ledger: the per-group state machine and its async coordinator.

pub mod coordinator;
pub mod state;

pub use coordinator::{DeactivateOutcome, DecisionLedger, LedgerSettings};
pub use state::{DeactivateStep, DriftPolicy, Effects, GroupLedger, GroupView};

use crate::domain::{DecisionId, DecisionStatus, ProductGroup, TraderId};
use std::fmt;
use thiserror::Error;

/// Trader-facing transition names, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerAction {
    Submit,
    Apply,
    Reject,
    Revoke,
    Deactivate,
    Reactivate,
    Supersede,
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerAction::Submit => "submit",
            LedgerAction::Apply => "apply",
            LedgerAction::Reject => "reject",
            LedgerAction::Revoke => "revoke",
            LedgerAction::Deactivate => "deactivate",
            LedgerAction::Reactivate => "reactivate",
            LedgerAction::Supersede => "supersede",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("decision {0} not found")]
    NotFound(DecisionId),

    #[error("cannot {action} decision {id}: status is {from}")]
    InvalidTransition {
        id: DecisionId,
        from: DecisionStatus,
        action: LedgerAction,
    },

    #[error("trader {trader} cannot review their own decision {id}")]
    SelfReview { id: DecisionId, trader: TraderId },

    #[error("trader {trader} does not own decision {id}")]
    NotOwner { id: DecisionId, trader: TraderId },

    #[error("no pending deactivation request for decision {0}")]
    NoPendingRequest(DecisionId),

    #[error("product group {0} is not configured")]
    UnknownProductGroup(ProductGroup),

    #[error("invalid decision: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    /// Apply or reject on a decision that is no longer `proposed`.
    pub fn is_already_resolved(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidTransition {
                action: LedgerAction::Apply | LedgerAction::Reject,
                from,
                ..
            } if *from != DecisionStatus::Proposed
        )
    }
}
