use std::sync::Arc;
use std::time::Duration;
use tradedesk::autorunner::{AutoRunnerSettings, CheckOutcome, RunReason};
use tradedesk::datasource::{MockContractStore, MockIngestor, MockSolver, SnapshotSource};
use tradedesk::domain::{
    ChangeMode, NewDecision, NotificationType, ProductGroup, TimeMs, TraderId, TraderRef,
};
use tradedesk::notify::{DeskEvent, Topic};
use tradedesk::pipeline::{ContractGate, PipelineSettings};
use tradedesk::{AutoRunner, DecisionLedger, EventBus, FrameRegistry, LedgerSettings, NotificationCenter, SolvePipeline};

struct Desk {
    ledger: Arc<DecisionLedger>,
    runner: Arc<AutoRunner>,
    center: Arc<NotificationCenter>,
    bus: EventBus,
}

fn roster() -> Vec<TraderRef> {
    vec![
        TraderRef { id: TraderId(1), name: "Alice".to_string() },
        TraderRef { id: TraderId(2), name: "Bob".to_string() },
    ]
}

fn setup_desk(solver: MockSolver) -> Desk {
    let frames = Arc::new(FrameRegistry::default_frames());
    let bus = EventBus::new(512);
    let center = Arc::new(NotificationCenter::new(bus.clone()));
    let ledger = Arc::new(DecisionLedger::new(
        &frames,
        LedgerSettings {
            roster: roster(),
            ..LedgerSettings::default()
        },
        center.clone(),
    ));
    let gate = ContractGate::new(
        Arc::new(MockContractStore::new()),
        Arc::new(MockIngestor::new()),
        Duration::from_secs(1),
    );
    let pipeline = Arc::new(SolvePipeline::new(
        frames.clone(),
        gate,
        Arc::new(solver),
        bus.clone(),
        PipelineSettings {
            mc_scenarios: 60,
            mc_seed: Some(11),
            ..PipelineSettings::default()
        },
    ));
    let source: Arc<dyn SnapshotSource> = ledger.clone();
    let frame = frames.get(ProductGroup::AmmoniaDomestic).unwrap();
    let runner = Arc::new(AutoRunner::new(
        frame,
        source,
        pipeline,
        center.clone(),
        AutoRunnerSettings {
            fallback_ms: None,
            roster: roster(),
            ..AutoRunnerSettings::default()
        },
    ));
    Desk {
        ledger,
        runner,
        center,
        bus,
    }
}

async fn apply_river_override(desk: &Desk, change: f64) {
    let d = desk
        .ledger
        .propose(
            NewDecision::new(TraderId(1), "Alice", ProductGroup::AmmoniaDomestic)
                .with_change("river_stage", change, ChangeMode::Relative)
                .submitted(),
        )
        .await
        .unwrap();
    let bob = TraderRef { id: TraderId(2), name: "Bob".to_string() };
    desk.ledger.apply(d.id, &bob, None).await.unwrap();
}

#[tokio::test]
async fn test_applied_override_counts_as_drift() {
    let desk = setup_desk(MockSolver::new().with_weight("river_stage", 100_000.0));
    let mut runs = desk.bus.subscribe(Topic::AutoRunner(ProductGroup::AmmoniaDomestic));
    let t0 = TimeMs::new(50_000_000);

    let first = desk.runner.check(t0).await;
    assert_eq!(first.name(), "ran");
    assert_eq!(desk.runner.check(t0.plus_ms(1_000)).await, CheckOutcome::Idle);

    apply_river_override(&desk, 1.0).await;
    let CheckOutcome::Ran { record } = desk.runner.check(t0.plus_ms(6 * 60 * 1000)).await else {
        panic!("expected a delta run");
    };
    assert_eq!(record.reason, RunReason::Delta);
    assert_eq!(record.triggers.len(), 1);
    assert_eq!(record.triggers[0].variable.as_str(), "river_stage");
    assert!(record.notified);

    let baseline = desk.runner.baseline().unwrap();
    assert_eq!(baseline, desk.ledger.effective_state(ProductGroup::AmmoniaDomestic).unwrap());

    for trader in [TraderId(1), TraderId(2)] {
        let auto: Vec<_> = desk
            .center
            .for_trader(trader, false)
            .await
            .into_iter()
            .filter(|n| n.kind == NotificationType::AutoSolve)
            .collect();
        assert_eq!(auto.len(), 1);
    }

    let mut published = 0;
    while let Some(event) = runs.try_recv() {
        if let DeskEvent::AutoRun(_) = event {
            published += 1;
        }
    }
    assert_eq!(published, 2);
}

#[tokio::test]
async fn test_override_inside_cooldown_waits() {
    let desk = setup_desk(MockSolver::new());
    let t0 = TimeMs::new(50_000_000);
    desk.runner.check(t0).await;

    apply_river_override(&desk, -2.0).await;
    let outcome = desk.runner.check(t0.plus_ms(60_000)).await;
    let CheckOutcome::Suppressed { triggers, retry_in_ms } = outcome else {
        panic!("expected suppression, got {:?}", outcome);
    };
    assert_eq!(triggers.len(), 1);
    assert_eq!(retry_in_ms, 4 * 60 * 1000);

    let CheckOutcome::Ran { record } = desk.runner.check(t0.plus_ms(5 * 60 * 1000)).await else {
        panic!("expected the remembered breach to run");
    };
    assert_eq!(record.reason, RunReason::Delta);
    assert_eq!(desk.runner.history().len(), 2);
}

#[tokio::test]
async fn test_spawned_loop_runs_initial_solve() {
    let desk = setup_desk(MockSolver::new());
    let handle = desk.runner.clone().spawn(Duration::from_millis(20));
    tokio::time::timeout(Duration::from_secs(5), async {
        while desk.runner.history().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("auto-runner never ran");
    handle.abort();
    assert_eq!(desk.runner.history()[0].reason, RunReason::Initial);
}
