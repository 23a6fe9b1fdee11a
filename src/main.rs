use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tradedesk::datasource::{HttpExplainer, HttpIngestor, HttpSolver};
use tradedesk::ledger::DriftPolicy;
use tradedesk::pipeline::ContractGate;
use tradedesk::{
    api, config::Config, db::init_db, AutoRunner, ContractStore, DecisionLedger, EventBus,
    FrameRegistry, LedgerSettings, NotificationCenter, Repository, SnapshotSource, SolvePipeline,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let frames = Arc::new(FrameRegistry::default_frames());
    let bus = EventBus::new(config.event_bus_capacity);
    let notifications = Arc::new(NotificationCenter::new(bus.clone()));

    let ledger = Arc::new(DecisionLedger::new(
        &frames,
        LedgerSettings {
            drift: DriftPolicy {
                thresholds: config.drift_thresholds(),
                ..DriftPolicy::default()
            },
            roster: config.desk_traders.clone(),
        },
        notifications.clone(),
    ));

    let store: Arc<dyn ContractStore> = repo.clone();
    let ingestor = Arc::new(HttpIngestor::new(config.ingest_url.clone(), config.ingest_timeout()));
    let gate = ContractGate::new(store, ingestor, config.ingest_timeout());
    let mut pipeline = SolvePipeline::new(
        frames.clone(),
        gate,
        Arc::new(HttpSolver::new(config.solver_url.clone())),
        bus.clone(),
        config.pipeline_settings(),
    );
    if let Some(url) = &config.explainer_url {
        pipeline = pipeline.with_explainer(Arc::new(HttpExplainer::new(url.clone())));
    }
    let pipeline = Arc::new(pipeline);

    let source: Arc<dyn SnapshotSource> = ledger.clone();
    let mut runners = Vec::new();
    for group in &config.auto_groups {
        let Some(frame) = frames.get(*group) else {
            tracing::warn!(group = %group, "no frame for auto-run group, skipping");
            continue;
        };
        let runner = Arc::new(AutoRunner::new(
            frame,
            source.clone(),
            pipeline.clone(),
            notifications.clone(),
            config.autorunner_settings(),
        ));
        runner
            .clone()
            .spawn(Duration::from_millis(config.auto_poll_ms));
        tracing::info!(group = %group, poll_ms = config.auto_poll_ms, "auto-runner started");
        runners.push(runner);
    }
    ledger
        .clone()
        .spawn_expiry_sweeper(Duration::from_millis(config.expiry_sweep_ms));

    let state = api::AppState::new(ledger, pipeline)
        .with_runners(runners)
        .with_repo(repo);
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
