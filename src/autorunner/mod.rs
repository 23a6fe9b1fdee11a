//! Background auto-solve loop for one product group.
//!
//! Each check compares the current snapshot with the baseline of the last
//! run. Any tracked variable past its threshold fires one Monte-Carlo solve
//! through the pipeline, reporting every breach together. Runs never
//! overlap: a check that arrives while a run is in flight is remembered and
//! re-evaluated against the new baseline once the run finishes. Breaches
//! seen during the cooldown are kept until the cooldown ends.

pub mod policy;

pub use policy::NotifyPolicy;

use crate::datasource::SnapshotSource;
use crate::domain::{
    Distribution, NotificationDraft, NotificationType, ProductGroup, TimeMs, TraderRef,
    VariableSnapshot,
};
use crate::engine::{DeltaTrigger, TriggerHit};
use crate::frame::GroupFrame;
use crate::notify::{DeskEvent, NotificationCenter, Topic};
use crate::pipeline::{CallerRef, SolvePipeline, SolveRequest};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AutoRunnerSettings {
    pub cooldown_ms: i64,
    /// Solve anyway after this long without a run. `None` disables.
    pub fallback_ms: Option<i64>,
    pub history_len: usize,
    pub notify: NotifyPolicy,
    /// Traders told about notable auto-solves.
    pub roster: Vec<TraderRef>,
}

impl Default for AutoRunnerSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 5 * 60 * 1000,
            fallback_ms: Some(60 * 60 * 1000),
            history_len: 50,
            notify: NotifyPolicy::default(),
            roster: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    /// No baseline yet.
    Initial,
    Delta,
    /// Fallback after a long quiet stretch.
    Scheduled,
}

impl RunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunReason::Initial => "initial",
            RunReason::Delta => "delta",
            RunReason::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoRunRecord {
    pub seq: u64,
    pub product_group: ProductGroup,
    pub caller: CallerRef,
    pub reason: RunReason,
    pub triggers: Vec<TriggerHit>,
    pub started_at: TimeMs,
    pub finished_at: TimeMs,
    pub distribution: Option<Distribution>,
    pub contracts_stale: bool,
    pub error: Option<String>,
    pub notified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The snapshot source had nothing for the group.
    NoSnapshot,
    Idle,
    /// A run is in flight; this check will be re-evaluated after it.
    Deferred,
    Suppressed {
        triggers: Vec<TriggerHit>,
        retry_in_ms: i64,
    },
    Ran {
        record: Box<AutoRunRecord>,
    },
}

impl CheckOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            CheckOutcome::NoSnapshot => "no_snapshot",
            CheckOutcome::Idle => "idle",
            CheckOutcome::Deferred => "deferred",
            CheckOutcome::Suppressed { .. } => "suppressed",
            CheckOutcome::Ran { .. } => "ran",
        }
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    baseline: Option<VariableSnapshot>,
    in_flight: bool,
    pending: bool,
    suppressed: Vec<TriggerHit>,
    last_auto_at: Option<TimeMs>,
    last_run_at: Option<TimeMs>,
    last_notified_at: Option<TimeMs>,
    last_mean: Option<f64>,
    next_seq: u64,
    history: VecDeque<AutoRunRecord>,
}

fn lock(m: &Mutex<RunnerState>) -> MutexGuard<'_, RunnerState> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight flag however the run ends, including when the
/// checking future is dropped.
struct InFlight<'a>(&'a Mutex<RunnerState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.0).in_flight = false;
    }
}

#[derive(Debug)]
pub struct AutoRunner {
    group: ProductGroup,
    trigger: DeltaTrigger,
    source: Arc<dyn SnapshotSource>,
    pipeline: Arc<SolvePipeline>,
    notifications: Arc<NotificationCenter>,
    settings: AutoRunnerSettings,
    state: Mutex<RunnerState>,
}

impl AutoRunner {
    pub fn new(
        frame: &GroupFrame,
        source: Arc<dyn SnapshotSource>,
        pipeline: Arc<SolvePipeline>,
        notifications: Arc<NotificationCenter>,
        settings: AutoRunnerSettings,
    ) -> Self {
        Self {
            group: frame.product_group,
            trigger: DeltaTrigger::new(frame.thresholds.clone()),
            source,
            pipeline,
            notifications,
            settings,
            state: Mutex::new(RunnerState::default()),
        }
    }

    pub fn product_group(&self) -> ProductGroup {
        self.group
    }

    pub fn baseline(&self) -> Option<VariableSnapshot> {
        lock(&self.state).baseline.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.state).in_flight
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<AutoRunRecord> {
        lock(&self.state).history.iter().cloned().collect()
    }

    /// Evaluate once, then keep re-evaluating while checks were deferred
    /// behind a run. Returns the outcome of the first evaluation.
    pub async fn check(&self, now: TimeMs) -> CheckOutcome {
        let outcome = self.check_once(now).await;
        let mut ran = matches!(outcome, CheckOutcome::Ran { .. });
        while ran && self.take_pending() {
            let follow_up = self.check_once(now).await;
            debug!(group = %self.group, outcome = follow_up.name(), "re-evaluated deferred check");
            ran = matches!(follow_up, CheckOutcome::Ran { .. });
        }
        outcome
    }

    /// Check in the background, e.g. right after live data changed.
    pub fn nudge(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.check(TimeMs::now()).await;
        });
    }

    /// Poll on a fixed cadence, independent of live-data arrival.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let outcome = self.check(TimeMs::now()).await;
                debug!(group = %self.group, outcome = outcome.name(), "auto-runner tick");
            }
        })
    }

    fn take_pending(&self) -> bool {
        std::mem::take(&mut lock(&self.state).pending)
    }

    async fn check_once(&self, now: TimeMs) -> CheckOutcome {
        let Some(current) = self.source.snapshot(self.group).await else {
            return CheckOutcome::NoSnapshot;
        };
        let (reason, triggers) = {
            let mut state = lock(&self.state);
            match self.plan(&mut state, &current, now) {
                Ok(plan) => plan,
                Err(outcome) => return outcome,
            }
        };
        let _in_flight = InFlight(&self.state);
        let record = self.execute(reason, triggers, current, now).await;
        CheckOutcome::Ran {
            record: Box::new(record),
        }
    }

    /// Decide under the state lock whether to run. On `Ok` the run is
    /// marked in flight.
    fn plan(
        &self,
        state: &mut RunnerState,
        current: &VariableSnapshot,
        now: TimeMs,
    ) -> Result<(RunReason, Vec<TriggerHit>), CheckOutcome> {
        if state.in_flight {
            state.pending = true;
            info!(group = %self.group, "auto-solve in flight, check deferred");
            return Err(CheckOutcome::Deferred);
        }

        let hits = state
            .baseline
            .as_ref()
            .map(|baseline| self.trigger.breaches(baseline, current));
        let (reason, triggers) = match hits {
            None => (RunReason::Initial, Vec::new()),
            Some(hits) => {
                let triggers = if hits.is_empty() {
                    state.suppressed.clone()
                } else {
                    hits
                };
                if triggers.is_empty() {
                    let due = match (self.settings.fallback_ms, state.last_run_at) {
                        (Some(fallback), Some(last)) => now.since(last) >= fallback,
                        _ => false,
                    };
                    if !due {
                        return Err(CheckOutcome::Idle);
                    }
                    (RunReason::Scheduled, Vec::new())
                } else {
                    if let Some(last) = state.last_auto_at {
                        let elapsed = now.since(last);
                        if elapsed < self.settings.cooldown_ms {
                            info!(
                                group = %self.group,
                                triggers = triggers.len(),
                                retry_in_ms = self.settings.cooldown_ms - elapsed,
                                "auto-solve suppressed by cooldown"
                            );
                            state.suppressed = triggers.clone();
                            return Err(CheckOutcome::Suppressed {
                                triggers,
                                retry_in_ms: self.settings.cooldown_ms - elapsed,
                            });
                        }
                    }
                    (RunReason::Delta, triggers)
                }
            }
        };

        state.in_flight = true;
        state.suppressed.clear();
        state.last_auto_at = Some(now);
        Ok((reason, triggers))
    }

    async fn execute(
        &self,
        reason: RunReason,
        triggers: Vec<TriggerHit>,
        current: VariableSnapshot,
        now: TimeMs,
    ) -> AutoRunRecord {
        let caller = CallerRef::auto();
        info!(
            group = %self.group,
            caller = %caller,
            reason = reason.as_str(),
            triggers = ?triggers.iter().map(|t| t.variable.as_str()).collect::<Vec<_>>(),
            "auto-solve fired"
        );
        let request = SolveRequest::new(self.group, current.clone()).monte_carlo();
        let (distribution, contracts_stale, error) = match self.pipeline.solve(request, caller).await {
            Ok(outcome) => (outcome.distribution, outcome.contracts_stale, None),
            Err(err) => {
                warn!(group = %self.group, caller = %caller, error = %err, "auto-solve failed");
                (None, false, Some(err.to_string()))
            }
        };

        let (record, previous_mean) = {
            let mut state = lock(&self.state);
            state.last_run_at = Some(now);
            let previous_mean = state.last_mean;
            let mut notified = false;
            if let Some(dist) = &distribution {
                // Only a completed run moves the baseline.
                state.baseline = Some(current);
                notified = self.settings.notify.should_notify(
                    reason,
                    dist.mean,
                    previous_mean,
                    state.last_notified_at,
                    now,
                );
                if notified {
                    state.last_notified_at = Some(now);
                }
                state.last_mean = Some(dist.mean);
            }
            let record = AutoRunRecord {
                seq: state.next_seq,
                product_group: self.group,
                caller,
                reason,
                triggers,
                started_at: now,
                finished_at: TimeMs::now(),
                distribution,
                contracts_stale,
                error,
                notified,
            };
            state.next_seq += 1;
            state.history.push_back(record.clone());
            while state.history.len() > self.settings.history_len.max(1) {
                state.history.pop_front();
            }
            (record, previous_mean)
        };

        if record.notified {
            self.notify_roster(&record, previous_mean.unwrap_or(0.0)).await;
        }
        self.notifications.bus().publish(
            Topic::AutoRunner(self.group),
            DeskEvent::AutoRun(Box::new(record.clone())),
        );
        record
    }

    async fn notify_roster(&self, record: &AutoRunRecord, previous_mean: f64) {
        let Some(dist) = &record.distribution else {
            return;
        };
        let moved: Vec<&str> = record.triggers.iter().map(|t| t.variable.as_str()).collect();
        let message = format!(
            "Auto-solve on {}: mean profit ${:.0} (was ${:.0}), signal {}, triggered by {}",
            self.group,
            dist.mean,
            previous_mean,
            dist.signal,
            moved.join(", ")
        );
        let drafts = self
            .settings
            .roster
            .iter()
            .map(|t| NotificationDraft::new(t.id, self.group, NotificationType::AutoSolve, message.clone()))
            .collect();
        self.notifications.deliver(drafts).await;
    }
}
