use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tradedesk::datasource::{parse_open_positions, MockIngestor, MockSolver};
use tradedesk::domain::{ProductGroup, SolveStatus, TimeMs, Tonnes};
use tradedesk::engine::{book_summary, content_hash};
use tradedesk::notify::{DeskEvent, Subscription, Topic};
use tradedesk::pipeline::{ContractGate, PipelineSettings};
use tradedesk::{
    init_db, CallerRef, ContractStore, EventBus, FrameRegistry, Repository, SolvePipeline,
    SolveRequest,
};

const EXPORT: &str = "\
contract_number,counterparty,direction,incoterm,total_qty_mt,delivered_qty_mt
P-100,Koch,purchase,FOB,\"10,000\",2500
S-200,Nutrien,sale,CFR,4000,0
S-201,Nutrien,sale,DAP,3000,1000
";

struct TestPipeline {
    pipeline: Arc<SolvePipeline>,
    repo: Arc<Repository>,
    ingestor: Arc<MockIngestor>,
    bus: EventBus,
    _temp: TempDir,
}

async fn setup_test_pipeline() -> TestPipeline {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let ingestor = Arc::new(MockIngestor::new());
    let bus = EventBus::new(256);

    let gate = ContractGate::new(repo.clone(), ingestor.clone(), Duration::from_secs(1));
    let pipeline = SolvePipeline::new(
        Arc::new(FrameRegistry::default_frames()),
        gate,
        Arc::new(MockSolver::new()),
        bus.clone(),
        PipelineSettings::default(),
    );
    TestPipeline {
        pipeline: Arc::new(pipeline),
        repo,
        ingestor,
        bus,
        _temp: temp_dir,
    }
}

fn request() -> SolveRequest {
    let frames = FrameRegistry::default_frames();
    let snapshot = frames
        .get(ProductGroup::AmmoniaDomestic)
        .map(|f| f.default_snapshot())
        .unwrap();
    SolveRequest::new(ProductGroup::AmmoniaDomestic, snapshot)
}

fn drain(sub: &mut Subscription) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Some(DeskEvent::Pipeline(ev)) = sub.try_recv() {
        names.push(ev.phase.name());
    }
    names
}

async fn solve_and_collect(t: &TestPipeline) -> (Vec<&'static str>, String) {
    let caller = CallerRef::manual();
    let mut sub = t.bus.subscribe(Topic::Pipeline(caller));
    let outcome = t.pipeline.solve(request(), caller).await.unwrap();
    assert_eq!(outcome.result.as_ref().map(|r| r.status), Some(SolveStatus::Optimal));
    (drain(&mut sub), outcome.contract_hash)
}

#[tokio::test]
async fn test_imported_book_aggregates_by_counterparty() {
    let t = setup_test_pipeline().await;
    let contracts = parse_open_positions(EXPORT.as_bytes(), ProductGroup::AmmoniaDomestic).unwrap();
    let written = tokio_test::assert_ok!(t.repo.upsert_contracts(&contracts).await);
    assert_eq!(written, 3);

    let active = t
        .repo
        .active_contracts(ProductGroup::AmmoniaDomestic)
        .await
        .unwrap();
    let book = book_summary(ProductGroup::AmmoniaDomestic, &active);
    assert_eq!(book.total_purchase_open, Tonnes::from(7500));
    assert_eq!(book.total_sale_open, Tonnes::from(6000));
    assert_eq!(book.net_position, Tonnes::from(1500));
    assert_eq!(book.positions["Nutrien"].net(), Tonnes::from(-6000));
}

#[tokio::test]
async fn test_contract_changes_drive_reingestion() {
    let t = setup_test_pipeline().await;
    let contracts = parse_open_positions(EXPORT.as_bytes(), ProductGroup::AmmoniaDomestic).unwrap();
    t.repo.upsert_contracts(&contracts).await.unwrap();

    let (phases, first_hash) = solve_and_collect(&t).await;
    assert!(phases.contains(&"ingesting"));
    assert!(phases.contains(&"ingest_done"));
    assert_eq!(t.ingestor.calls(), 1);
    assert_eq!(t.ingestor.last_hash(), Some(first_hash.clone()));

    let (phases, hash) = solve_and_collect(&t).await;
    assert!(phases.contains(&"contracts_ok"));
    assert!(!phases.contains(&"ingesting"));
    assert_eq!(hash, first_hash);
    assert_eq!(t.ingestor.calls(), 1);

    t.repo
        .record_delivery(
            ProductGroup::AmmoniaDomestic,
            "S-200",
            Tonnes::from(500),
            TimeMs::new(10),
        )
        .await
        .unwrap()
        .unwrap();
    let (phases, hash) = solve_and_collect(&t).await;
    assert!(phases.contains(&"ingesting"));
    assert_ne!(hash, first_hash);
    assert_eq!(t.ingestor.calls(), 2);

    let active = t
        .repo
        .active_contracts(ProductGroup::AmmoniaDomestic)
        .await
        .unwrap();
    assert_eq!(hash, content_hash(&active));
}

#[tokio::test]
async fn test_reimporting_same_export_keeps_hash() {
    let t = setup_test_pipeline().await;
    let contracts = parse_open_positions(EXPORT.as_bytes(), ProductGroup::AmmoniaDomestic).unwrap();
    t.repo.upsert_contracts(&contracts).await.unwrap();
    let (_, before) = solve_and_collect(&t).await;

    let again = parse_open_positions(EXPORT.as_bytes(), ProductGroup::AmmoniaDomestic).unwrap();
    t.repo.upsert_contracts(&again).await.unwrap();
    let (phases, after) = solve_and_collect(&t).await;
    assert_eq!(before, after);
    assert!(phases.contains(&"contracts_ok"));
}
