pub mod hub;
pub mod session;
pub mod state_machine;
pub mod transitions;

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::round_store::RoundStore,
    error::ServiceError,
    services::winning_number::{self, WinningNumberPolicy},
};

pub use self::hub::{ConnectionId, EventHub, Subscription};
pub use self::session::{ActiveRound, SessionReader, SessionSnapshot, SessionWriter};
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};
use self::state_machine::{SchedulerEvent, SchedulerPhase, SchedulerStateMachine};

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests sent to the scheduler by components that may not write the session themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerSignal {
    /// The session references a round the store reports as completed or missing.
    StaleSession {
        /// Round the session still pointed at.
        round_id: Uuid,
    },
}

/// Everything the single scheduler task owns exclusively.
pub struct SchedulerSeat {
    /// Sole write handle on the session cell.
    pub writer: SessionWriter,
    /// Signals from the participation gateway.
    pub signals: mpsc::UnboundedReceiver<SchedulerSignal>,
}

/// Why a round was left ACTIVE without a close timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandReason {
    /// The scheduler shut down while the round was open.
    Shutdown,
    /// Writing the completion to the store failed.
    CompletionFailed,
    /// The store already held the ACTIVE round when the scheduler started.
    FoundAtStartup,
    /// The round was completed but marking its winners failed.
    WinnersUnmarked,
}

/// A round that needs manual reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandedRound {
    /// Identifier of the affected round.
    pub round_id: Uuid,
    /// How it got stranded.
    pub reason: StrandReason,
    /// When it was recorded.
    pub since: SystemTime,
}

/// Central application state shared by the scheduler, the gateway and the HTTP layer.
pub struct AppState {
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
    winning_number: Arc<dyn WinningNumberPolicy>,
    round_store: RwLock<Option<Arc<dyn RoundStore>>>,
    degraded: watch::Sender<bool>,
    hub: EventHub,
    session: SessionReader,
    seat: Mutex<Option<SchedulerSeat>>,
    signals: mpsc::UnboundedSender<SchedulerSignal>,
    scheduler: RwLock<SchedulerStateMachine>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
    stranded: DashMap<Uuid, StrandedRound>,
}

impl AppState {
    /// Construct a new [`AppState`] on the system clock.
    ///
    /// The application starts in degraded mode until a round store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Construct a new [`AppState`] reading time from `clock`.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (writer, reader) = session::session_cell();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let winning_number = winning_number::policy_for(&config);

        Arc::new(Self {
            hub: EventHub::new(config.broadcast_capacity()),
            config: Arc::new(config),
            clock,
            winning_number,
            round_store: RwLock::new(None),
            degraded: degraded_tx,
            session: reader,
            seat: Mutex::new(Some(SchedulerSeat {
                writer,
                signals: signals_rx,
            })),
            signals: signals_tx,
            scheduler: RwLock::new(SchedulerStateMachine::new()),
            transition_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
            stranded: DashMap::new(),
        })
    }

    /// Process-wide configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Unix-epoch milliseconds according to the state's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The state's clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Policy that picks each round's winning number.
    pub fn winning_number_policy(&self) -> &dyn WinningNumberPolicy {
        self.winning_number.as_ref()
    }

    /// Obtain a handle to the current round store, if one is installed.
    pub async fn round_store(&self) -> Option<Arc<dyn RoundStore>> {
        let guard = self.round_store.read().await;
        guard.as_ref().cloned()
    }

    /// The installed round store, or [`ServiceError::Degraded`].
    pub async fn require_round_store(&self) -> Result<Arc<dyn RoundStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.round_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a round store implementation and leave degraded mode.
    pub async fn set_round_store(&self, store: Arc<dyn RoundStore>) {
        {
            let mut guard = self.round_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current round store and enter degraded mode.
    pub async fn clear_round_store(&self) {
        {
            let mut guard = self.round_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only on change.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Broadcast hub for every connected subscriber.
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Consistent copy of the session cell.
    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Hand out the session writer and signal queue. Succeeds exactly once per state.
    pub async fn claim_scheduler_seat(&self) -> Option<SchedulerSeat> {
        self.seat.lock().await.take()
    }

    /// Ask the scheduler to act on an observation it must handle as the session's sole writer.
    pub fn signal_scheduler(&self, signal: SchedulerSignal) {
        if self.signals.send(signal).is_err() {
            warn!(?signal, "scheduler is not running; signal dropped");
        }
    }

    /// Record a round left ACTIVE without a close timer.
    ///
    /// The first recorded reason for a round is kept.
    pub fn record_stranded(&self, round_id: Uuid, reason: StrandReason) {
        if self.stranded.contains_key(&round_id) {
            return;
        }
        warn!(
            round_id = %round_id,
            reason = ?reason,
            "round left ACTIVE without a close timer; manual reconciliation required"
        );
        self.stranded.entry(round_id).or_insert_with(|| StrandedRound {
            round_id,
            reason,
            since: self.clock.now(),
        });
    }

    /// Stranded rounds, oldest first.
    pub fn stranded_rounds(&self) -> Vec<StrandedRound> {
        let mut rounds: Vec<StrandedRound> = self
            .stranded
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        rounds.sort_by_key(|round| round.since);
        rounds
    }

    /// Snapshot the scheduler phase machine.
    pub async fn scheduler_snapshot(&self) -> Snapshot {
        let sm = self.scheduler.read().await;
        sm.snapshot()
    }

    /// Current scheduler phase.
    pub async fn scheduler_phase(&self) -> SchedulerPhase {
        self.scheduler.read().await.phase()
    }

    async fn plan_transition(&self, event: SchedulerEvent) -> Result<Plan, PlanError> {
        let mut sm = self.scheduler.write().await;
        sm.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<SchedulerPhase, ApplyError> {
        let mut sm = self.scheduler.write().await;
        sm.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.scheduler.write().await;
        sm.abort(plan_id)
    }

    /// Plan `event`, run `work`, then apply the plan on success or abort it on failure or timeout.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: SchedulerEvent,
        work: F,
    ) -> Result<(T, SchedulerPhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan { id: plan_id, .. } = self.plan_transition(event).await?;

        let work_future = work();
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }
}
