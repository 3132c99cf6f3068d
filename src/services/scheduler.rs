//! The round scheduler: the only task that opens and closes rounds.
//!
//! Each cycle waits for the next interval boundary, opens a round if anyone is connected, arms a
//! close timer for the round duration and completes the round when it fires. Store work runs
//! inside planned phase-machine transitions; a failed cycle is abandoned and the loop re-arms.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::until_next_boundary_ms,
    dto::round::ParticipantResult,
    error::ServiceError,
    services::events,
    state::{
        ActiveRound, SchedulerSeat, SchedulerSignal, SessionWriter, SharedState, StrandReason,
        state_machine::{SchedulerEvent, SchedulerPhase},
        transitions::{run_logged_transition, transition},
    },
};

/// Handle on the running scheduler task.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancel every pending timer and wait for the loop to exit.
    ///
    /// A round open at that moment is left ACTIVE and recorded as stranded.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!(error = %err, "round scheduler task failed");
        }
    }
}

/// Start the scheduler loop. Fails if a scheduler already runs on this state.
pub async fn spawn(state: SharedState) -> Result<SchedulerHandle, ServiceError> {
    let seat = state
        .claim_scheduler_seat()
        .await
        .ok_or_else(|| ServiceError::InvalidState("round scheduler already running".into()))?;
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(state, seat, cancel.clone()));
    Ok(SchedulerHandle { cancel, task })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerOutcome {
    Fired,
    Cancelled,
}

/// A one-shot timer task that can be cancelled through its token. Dropping it cancels it.
struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<TimerOutcome>,
}

impl ScheduledTask {
    fn arm(parent: &CancellationToken, delay: Duration) -> Self {
        let token = parent.child_token();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => TimerOutcome::Cancelled,
                _ = sleep(delay) => TimerOutcome::Fired,
            }
        });
        Self { token, handle }
    }

    /// Wait for the timer. Must be awaited to completion at most once.
    async fn wait(&mut self) -> TimerOutcome {
        (&mut self.handle).await.unwrap_or(TimerOutcome::Cancelled)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(state: SharedState, seat: SchedulerSeat, cancel: CancellationToken) {
    let SchedulerSeat {
        mut writer,
        mut signals,
    } = seat;
    let mut startup_checked = false;
    info!(
        interval_ms = state.config().cycle_interval_ms(),
        duration_ms = state.config().round_duration_ms(),
        "round scheduler started"
    );

    'cycles: loop {
        if !startup_checked {
            startup_checked = record_leftover_rounds(&state).await;
        }

        if let Err(err) = transition(&state, SchedulerEvent::Arm).await {
            error!(error = %err, "failed to arm scheduler; stopping");
            break;
        }

        let delay_ms = until_next_boundary_ms(state.now_ms(), state.config().cycle_interval_ms());
        debug!(delay_ms, "waiting for next boundary");
        let mut boundary = ScheduledTask::arm(&cancel, Duration::from_millis(delay_ms));
        let outcome = loop {
            tokio::select! {
                outcome = boundary.wait() => break outcome,
                Some(signal) = signals.recv() => {
                    debug!(?signal, "no round open; ignoring scheduler signal");
                }
            }
        };
        drop(boundary);

        if outcome == TimerOutcome::Cancelled {
            abandon(&state, "shutdown").await;
            break;
        }

        let active = match open_round(&state, &mut writer).await {
            Ok(Some(active)) => active,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "failed to open round; cycle abandoned");
                writer.clear();
                abandon(&state, "open failed").await;
                continue;
            }
        };

        let mut close_timer =
            ScheduledTask::arm(&cancel, Duration::from_millis(active.round.duration_ms));
        loop {
            tokio::select! {
                outcome = close_timer.wait() => {
                    if outcome == TimerOutcome::Cancelled {
                        if writer.clear_if(active.id()) {
                            state.record_stranded(active.id(), StrandReason::Shutdown);
                        }
                        abandon(&state, "shutdown").await;
                        break 'cycles;
                    }
                    if let Err(err) = close_round(&state, &mut writer, &active).await {
                        error!(round_id = %active.id(), error = %err, "round completion failed; cycle abandoned");
                        if writer.clear_if(active.id()) {
                            state.record_stranded(active.id(), StrandReason::CompletionFailed);
                        }
                        abandon(&state, "close failed").await;
                    }
                    break;
                }
                Some(signal) = signals.recv() => match signal {
                    SchedulerSignal::StaleSession { round_id } if writer.holds(round_id) => {
                        warn!(round_id = %round_id, "store reports open round closed; clearing session");
                        close_timer.token.cancel();
                        writer.clear();
                        abandon(&state, "stale session").await;
                        break;
                    }
                    other => debug!(signal = ?other, "ignoring signal for a round no longer open"),
                },
            }
        }
    }

    info!("round scheduler stopped");
}

/// Open a round at a boundary, or skip it when no one is connected.
async fn open_round(
    state: &SharedState,
    writer: &mut SessionWriter,
) -> Result<Option<ActiveRound>, ServiceError> {
    if state.hub().connected_count() == 0 {
        writer.clear();
        transition(state, SchedulerEvent::Skip).await?;
        info!("no subscribers connected; skipping round");
        return Ok(None);
    }

    let duration_ms = state.config().round_duration_ms();
    let started_at_ms = state.now_ms();
    let started_at = state.clock().now();
    let round = run_logged_transition(state, SchedulerEvent::Open, || async move {
        let store = state.require_round_store().await?;
        Ok(store.create_round(duration_ms, started_at).await?)
    })
    .await?;

    let active = writer.publish(round, started_at_ms);
    info!(round_id = %active.id(), duration_ms, "round opened");
    events::broadcast_session_started(state, &active);
    Ok(Some(active))
}

/// Complete the round captured when it opened.
///
/// A no-op when the session no longer holds it, so a second call for the same round has no
/// effect. The session is cleared before the winning number is picked, so no guess can land
/// after the pick.
pub(crate) async fn close_round(
    state: &SharedState,
    writer: &mut SessionWriter,
    captured: &ActiveRound,
) -> Result<(), ServiceError> {
    let round_id = captured.id();
    if !writer.holds(round_id) {
        debug!(round_id = %round_id, "round already closed; nothing to do");
        return Ok(());
    }

    transition(state, SchedulerEvent::CloseTimerFired).await?;
    writer.clear();
    let winning_number = state.winning_number_policy().pick();

    let completed = AtomicBool::new(false);
    let winners_marked = AtomicBool::new(false);
    let outcome = run_logged_transition(state, SchedulerEvent::Complete, || async {
        let store = state.require_round_store().await?;
        let ended_at = state.clock().now();
        if !store.complete_round(round_id, winning_number, ended_at).await? {
            return Ok(None);
        }
        completed.store(true, Ordering::SeqCst);
        let winners = store.mark_winners(round_id, winning_number).await?;
        winners_marked.store(true, Ordering::SeqCst);
        Ok(Some(winners))
    })
    .await;

    let winners = match outcome {
        Ok(Some(winners)) => winners,
        Ok(None) => {
            warn!(round_id = %round_id, "round was already completed in the store");
            state.hub().close_room(round_id);
            return Ok(());
        }
        Err(err) => {
            if !completed.load(Ordering::SeqCst) {
                state.record_stranded(round_id, StrandReason::CompletionFailed);
            } else if !winners_marked.load(Ordering::SeqCst) {
                error!(round_id = %round_id, winning_number, "round completed but winners were not marked");
                state.record_stranded(round_id, StrandReason::WinnersUnmarked);
            }
            state.hub().close_room(round_id);
            return Err(err);
        }
    };

    let participants = match state.require_round_store().await {
        Ok(store) => match store.list_participants(round_id).await {
            Ok(participants) => Some(participants),
            Err(err) => {
                warn!(round_id = %round_id, error = %err, "failed to list participants of completed round");
                None
            }
        },
        Err(err) => {
            warn!(round_id = %round_id, error = %err, "no store to list participants of completed round");
            None
        }
    };

    info!(
        round_id = %round_id,
        winning_number,
        participants = participants.as_ref().map(Vec::len),
        winners,
        "round completed"
    );

    let next_ms = until_next_boundary_ms(state.now_ms(), state.config().cycle_interval_ms());
    events::broadcast_session_ended(state, round_id, winning_number, next_ms);

    let members = state.hub().close_room(round_id);
    if let (Some(members), Some(participants)) = (members, participants) {
        let payload = events::current_session_ended_payload(
            round_id,
            winning_number,
            captured.round.duration_ms,
            participants.iter().map(ParticipantResult::from).collect(),
        );
        events::send_current_session_ended(state, &members, &payload);
    }

    Ok(())
}

/// Record rounds a previous process left ACTIVE. Returns `false` while no store is reachable.
async fn record_leftover_rounds(state: &SharedState) -> bool {
    let Ok(store) = state.require_round_store().await else {
        return false;
    };
    match store.list_active_rounds().await {
        Ok(rounds) => {
            for round in rounds {
                state.record_stranded(round.id, StrandReason::FoundAtStartup);
            }
            true
        }
        Err(err) => {
            warn!(error = %err, "failed to list leftover active rounds");
            false
        }
    }
}

/// Return the phase machine to idle after a failed or interrupted cycle.
async fn abandon(state: &SharedState, reason: &'static str) {
    let phase = state.scheduler_phase().await;
    if phase == SchedulerPhase::Idle {
        return;
    }
    match transition(state, SchedulerEvent::Abandon).await {
        Ok(()) => debug!(reason, "scheduler cycle abandoned"),
        Err(err) => error!(reason, error = %err, "failed to abandon scheduler cycle"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{AppConfig, WinningNumberConfig},
        dao::round_store::{InMemoryRoundStore, RoundStore},
        state::AppState,
    };

    async fn open_state() -> (SharedState, SessionWriter, Arc<InMemoryRoundStore>) {
        let config = AppConfig::default()
            .with_winning_number(WinningNumberConfig::Fixed { value: 6 })
            .unwrap();
        let state = AppState::new(config);
        let store = Arc::new(InMemoryRoundStore::new());
        state.set_round_store(store.clone()).await;
        let seat = state.claim_scheduler_seat().await.unwrap();
        (state, seat.writer, store)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (state, mut writer, store) = open_state().await;
        let _subscriber = state.hub().connect("u1");

        transition(&state, SchedulerEvent::Arm).await.unwrap();
        let active = open_round(&state, &mut writer).await.unwrap().unwrap();

        close_round(&state, &mut writer, &active).await.unwrap();
        let round = store.get_round(active.id()).await.unwrap().unwrap();
        assert_eq!(round.winning_number, Some(6));
        assert!(state.session().active.is_none());
        let version = state.scheduler_snapshot().await.version;

        close_round(&state, &mut writer, &active).await.unwrap();
        assert_eq!(state.scheduler_snapshot().await.version, version);
        assert_eq!(store.get_round(active.id()).await.unwrap(), Some(round));
    }

    #[tokio::test]
    async fn empty_boundary_is_skipped() {
        let (state, mut writer, store) = open_state().await;

        transition(&state, SchedulerEvent::Arm).await.unwrap();
        assert!(open_round(&state, &mut writer).await.unwrap().is_none());
        assert!(store.list_active_rounds().await.unwrap().is_empty());
        assert_eq!(state.scheduler_phase().await, SchedulerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timers_never_fire() {
        let parent = CancellationToken::new();
        let mut timer = ScheduledTask::arm(&parent, Duration::from_secs(1));
        timer.token.cancel();
        assert_eq!(timer.wait().await, TimerOutcome::Cancelled);

        let mut timer = ScheduledTask::arm(&parent, Duration::from_secs(1));
        assert_eq!(timer.wait().await, TimerOutcome::Fired);

        let mut timer = ScheduledTask::arm(&parent, Duration::from_secs(1));
        parent.cancel();
        assert_eq!(timer.wait().await, TimerOutcome::Cancelled);
    }
}
