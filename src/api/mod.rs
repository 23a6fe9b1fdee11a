pub mod auto_runs;
pub mod book;
pub mod decisions;
pub mod health;
pub mod live;
pub mod notifications;
pub mod solve;

use crate::autorunner::AutoRunner;
use crate::db::Repository;
use crate::domain::ProductGroup;
use crate::error::AppError;
use crate::ledger::DecisionLedger;
use crate::pipeline::SolvePipeline;
use axum::{
    routing::{get, post},
    Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<DecisionLedger>,
    pub pipeline: Arc<SolvePipeline>,
    pub runners: Arc<BTreeMap<ProductGroup, Arc<AutoRunner>>>,
    /// Needed only for CSV imports; the book is read through the pipeline's
    /// contract store.
    pub repo: Option<Arc<Repository>>,
}

impl AppState {
    pub fn new(ledger: Arc<DecisionLedger>, pipeline: Arc<SolvePipeline>) -> Self {
        Self {
            ledger,
            pipeline,
            runners: Arc::new(BTreeMap::new()),
            repo: None,
        }
    }

    pub fn with_runners(mut self, runners: impl IntoIterator<Item = Arc<AutoRunner>>) -> Self {
        self.runners = Arc::new(
            runners
                .into_iter()
                .map(|r| (r.product_group(), r))
                .collect(),
        );
        self
    }

    pub fn with_repo(mut self, repo: Arc<Repository>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub(crate) fn runner(&self, group: ProductGroup) -> Result<&Arc<AutoRunner>, AppError> {
        self.runners
            .get(&group)
            .ok_or_else(|| AppError::NotFound(format!("no auto-runner for {}", group)))
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/decisions",
            get(decisions::list_decisions).post(decisions::propose),
        )
        .route("/v1/decisions/:id", get(decisions::get_decision))
        .route("/v1/decisions/:id/submit", post(decisions::submit))
        .route("/v1/decisions/:id/apply", post(decisions::apply))
        .route("/v1/decisions/:id/reject", post(decisions::reject))
        .route("/v1/decisions/:id/revoke", post(decisions::revoke))
        .route("/v1/decisions/:id/deactivate", post(decisions::deactivate))
        .route("/v1/decisions/:id/reactivate", post(decisions::reactivate))
        .route("/v1/decisions/:id/respond", post(decisions::respond))
        .route("/v1/decisions/:id/conflicts", get(decisions::conflicts))
        .route("/v1/effective-state", get(live::get_effective_state))
        .route("/v1/live", post(live::post_live))
        .route("/v1/book", get(book::get_book))
        .route("/v1/contracts/import", post(book::import_contracts))
        .route("/v1/solve", post(solve::post_solve))
        .route("/v1/notifications", get(notifications::get_notifications))
        .route(
            "/v1/notifications/:id/read",
            post(notifications::mark_read),
        )
        .route("/v1/auto-runs", get(auto_runs::get_auto_runs))
        .layer(cors)
        .with_state(state)
}
