use tracing::warn;

use crate::{
    dto::health::{HealthResponse, StrandedRoundDto},
    state::SharedState,
};

/// Report store connectivity, scheduler phase and rounds awaiting reconciliation.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_round_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let status = if state.is_degraded() { "degraded" } else { "ok" };

    HealthResponse {
        status: status.to_owned(),
        phase: state.scheduler_phase().await.as_str().to_owned(),
        subscribers: state.hub().connected_count(),
        stranded_rounds: state
            .stranded_rounds()
            .iter()
            .map(StrandedRoundDto::from)
            .collect(),
    }
}
