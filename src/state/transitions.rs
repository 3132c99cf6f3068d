use std::future::Future;

use tracing::debug;

use crate::{
    error::ServiceError,
    state::{SharedState, state_machine::SchedulerEvent},
};

/// Execute a planned scheduler transition and log the resulting phase.
pub async fn run_logged_transition<F, Fut, T>(
    state: &SharedState,
    event: SchedulerEvent,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let (res, next) = state.run_transition(event, work).await?;
    debug!(event = ?event, phase = next.as_str(), "scheduler transition applied");
    Ok(res)
}

/// Apply a transition that carries no store work.
pub async fn transition(state: &SharedState, event: SchedulerEvent) -> Result<(), ServiceError> {
    run_logged_transition(state, event, || async { Ok(()) }).await
}
