pub mod api;
pub mod autorunner;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod notify;
pub mod pipeline;

pub use autorunner::{AutoRunner, AutoRunnerSettings};
pub use config::Config;
pub use datasource::{
    ContractIngestor, ContractStore, Explainer, MockContractStore, MockExplainer, MockIngestor,
    MockSolver, SnapshotSource, Solver,
};
pub use db::{init_db, Repository};
pub use domain::{ProductGroup, TimeMs, TraderId, TraderRef};
pub use error::AppError;
pub use frame::FrameRegistry;
pub use ledger::{DecisionLedger, LedgerSettings};
pub use notify::{EventBus, NotificationCenter};
pub use pipeline::{CallerRef, SolvePipeline, SolveRequest};
