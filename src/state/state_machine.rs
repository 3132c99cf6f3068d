use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Phases the round scheduler cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Not started, or between two cycles.
    Idle,
    /// A boundary timer is armed.
    WaitingForBoundary,
    /// A round is open and accepting joins and guesses.
    Open,
    /// The close timer fired and completion is in progress.
    Closing,
}

impl SchedulerPhase {
    /// Stable lowercase label used in logs and the health payload.
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerPhase::Idle => "idle",
            SchedulerPhase::WaitingForBoundary => "waiting_for_boundary",
            SchedulerPhase::Open => "open",
            SchedulerPhase::Closing => "closing",
        }
    }
}

/// Events that drive the scheduler phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Arm the timer for the next boundary.
    Arm,
    /// A boundary passed with no connected client; no round is opened.
    Skip,
    /// A boundary passed and a round was opened.
    Open,
    /// The round's close timer fired.
    CloseTimerFired,
    /// Completion finished.
    Complete,
    /// The cycle was abandoned after a failure or on shutdown.
    Abandon,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SchedulerPhase,
    /// The event that cannot be applied from this phase.
    pub event: SchedulerEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    #[error("a scheduler transition is already pending")]
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// No transition is currently pending.
    #[error("no scheduler transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("plan {got} does not match the pending plan {expected}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    #[error("phase changed during transition (expected {expected:?}, got {actual:?})")]
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SchedulerPhase,
        /// Current phase.
        actual: SchedulerPhase,
    },
    /// State machine version changed since the plan was created.
    #[error("version changed during transition (expected {expected}, got {actual})")]
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// No transition is currently pending.
    #[error("no scheduler transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("plan {got} does not match the pending plan {expected}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SchedulerPhase,
    /// Phase the state machine will transition to.
    pub to: SchedulerPhase,
    /// Event that triggered this transition.
    pub event: SchedulerEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: SchedulerPhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<SchedulerPhase>,
}

/// Phase machine for the boundary / open / close cycle.
#[derive(Debug, Clone)]
pub struct SchedulerStateMachine {
    phase: SchedulerPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SchedulerStateMachine {
    fn default() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            version: 0,
            pending: None,
        }
    }
}

impl SchedulerStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    pub fn plan(&mut self, event: SchedulerEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, returning the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SchedulerPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Drop a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: SchedulerEvent) -> Result<SchedulerPhase, InvalidTransition> {
        use SchedulerEvent as E;
        use SchedulerPhase as P;

        let next = match (self.phase, event) {
            (P::Idle, E::Arm) => P::WaitingForBoundary,
            (P::WaitingForBoundary, E::Skip) => P::Idle,
            (P::WaitingForBoundary, E::Open) => P::Open,
            (P::Open, E::CloseTimerFired) => P::Closing,
            (P::Closing, E::Complete) => P::Idle,
            (P::WaitingForBoundary | P::Open | P::Closing, E::Abandon) => P::Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SchedulerStateMachine, event: SchedulerEvent) -> SchedulerPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = SchedulerStateMachine::new();
        assert_eq!(sm.phase(), SchedulerPhase::Idle);
        assert_eq!(sm.snapshot().version, 0);
    }

    #[test]
    fn full_cycle_returns_to_idle() {
        let mut sm = SchedulerStateMachine::new();

        assert_eq!(
            apply(&mut sm, SchedulerEvent::Arm),
            SchedulerPhase::WaitingForBoundary
        );
        assert_eq!(apply(&mut sm, SchedulerEvent::Open), SchedulerPhase::Open);
        assert_eq!(
            apply(&mut sm, SchedulerEvent::CloseTimerFired),
            SchedulerPhase::Closing
        );
        assert_eq!(apply(&mut sm, SchedulerEvent::Complete), SchedulerPhase::Idle);
        assert_eq!(sm.snapshot().version, 4);
    }

    #[test]
    fn empty_boundary_skips_back_to_idle() {
        let mut sm = SchedulerStateMachine::new();
        apply(&mut sm, SchedulerEvent::Arm);
        assert_eq!(apply(&mut sm, SchedulerEvent::Skip), SchedulerPhase::Idle);
    }

    #[test]
    fn abandon_is_allowed_from_every_busy_phase() {
        let mut sm = SchedulerStateMachine::new();
        apply(&mut sm, SchedulerEvent::Arm);
        assert_eq!(apply(&mut sm, SchedulerEvent::Abandon), SchedulerPhase::Idle);

        apply(&mut sm, SchedulerEvent::Arm);
        apply(&mut sm, SchedulerEvent::Open);
        assert_eq!(apply(&mut sm, SchedulerEvent::Abandon), SchedulerPhase::Idle);

        apply(&mut sm, SchedulerEvent::Arm);
        apply(&mut sm, SchedulerEvent::Open);
        apply(&mut sm, SchedulerEvent::CloseTimerFired);
        assert_eq!(apply(&mut sm, SchedulerEvent::Abandon), SchedulerPhase::Idle);
    }

    #[test]
    fn second_close_is_rejected() {
        let mut sm = SchedulerStateMachine::new();
        apply(&mut sm, SchedulerEvent::Arm);
        apply(&mut sm, SchedulerEvent::Open);
        apply(&mut sm, SchedulerEvent::CloseTimerFired);

        let err = sm.plan(SchedulerEvent::CloseTimerFired).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: SchedulerPhase::Closing,
                event: SchedulerEvent::CloseTimerFired,
            })
        );
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = SchedulerStateMachine::new();
        let err = sm.plan(SchedulerEvent::Open).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, SchedulerPhase::Idle);
                assert_eq!(invalid.event, SchedulerEvent::Open);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pending_plan_blocks_new_plans_until_aborted() {
        let mut sm = SchedulerStateMachine::new();
        let plan = sm.plan(SchedulerEvent::Arm).unwrap();
        assert_eq!(sm.snapshot().pending, Some(SchedulerPhase::WaitingForBoundary));
        assert_eq!(
            sm.plan(SchedulerEvent::Arm).unwrap_err(),
            PlanError::AlreadyPending
        );

        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), SchedulerPhase::Idle);
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan_pending() {
        let mut sm = SchedulerStateMachine::new();
        let plan = sm.plan(SchedulerEvent::Arm).unwrap();
        let other = Uuid::new_v4();
        assert_eq!(
            sm.apply(other).unwrap_err(),
            ApplyError::IdMismatch {
                expected: plan.id,
                got: other
            }
        );
        assert_eq!(sm.apply(plan.id).unwrap(), SchedulerPhase::WaitingForBoundary);
    }
}
