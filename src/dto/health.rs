use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::format_system_time,
    state::{StrandReason, StrandedRound},
};

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Current scheduler phase.
    pub phase: String,
    /// Number of connected WebSocket subscribers.
    pub subscribers: usize,
    /// Rounds left ACTIVE in the store without a close timer.
    pub stranded_rounds: Vec<StrandedRoundDto>,
}

/// A round that needs manual reconciliation.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StrandedRoundDto {
    pub round_id: Uuid,
    /// `shutdown`, `completion_failed`, `found_at_startup` or `winners_unmarked`.
    pub reason: String,
    pub since: String,
}

impl From<&StrandedRound> for StrandedRoundDto {
    fn from(value: &StrandedRound) -> Self {
        let reason = match value.reason {
            StrandReason::Shutdown => "shutdown",
            StrandReason::CompletionFailed => "completion_failed",
            StrandReason::FoundAtStartup => "found_at_startup",
            StrandReason::WinnersUnmarked => "winners_unmarked",
        };
        Self {
            round_id: value.round_id,
            reason: reason.to_owned(),
            since: format_system_time(value.since),
        }
    }
}
