//! Domain types for the trading-desk core.
//!
//! This module provides:
//! - Primitives: TimeMs, TraderId, ProductGroup, VariableKey, record ids
//! - Immutable variable snapshots and the variable metadata registry
//! - Trader decisions, notifications and contracts
//! - Solver inputs and outputs, including Monte-Carlo distributions

pub mod contract;
pub mod decimal;
pub mod decision;
pub mod notification;
pub mod primitives;
pub mod snapshot;
pub mod solve;

pub use contract::{Contract, Direction, Incoterm};
pub use decimal::Tonnes;
pub use decision::{ChangeMode, DecisionStatus, NewDecision, TraderDecision};
pub use notification::{
    DeactivationRequester, DeactivationResponse, NotificationDraft, NotificationType,
    TraderNotification,
};
pub use primitives::{
    DecisionId, NotificationId, ProductGroup, ProductGroupParseError, TimeMs, TraderId, TraderRef,
    VariableKey,
};
pub use snapshot::{
    VariableGroup, VariableKind, VariableMeta, VariableRegistry, VariableSnapshot, VariableValue,
};
pub use solve::{
    ConstraintSet, ContractConstraint, Distribution, Objective, Percentiles, Sensitivity, Signal,
    SolveMode, SolveResult, SolveStatus,
};
