use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    clock::ms_to_secs,
    dao::models::{ParticipationEntity, RoundEntity, UserStatsEntity},
    dto::format_system_time,
};

/// Public view of a round.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub id: Uuid,
    /// `ACTIVE` or `COMPLETED`.
    pub status: String,
    /// Declared duration in seconds.
    pub duration: f64,
    pub winning_number: Option<u8>,
    pub player_count: u32,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl From<&RoundEntity> for RoundSummary {
    fn from(value: &RoundEntity) -> Self {
        Self {
            id: value.id,
            status: value.status.as_str().to_owned(),
            duration: ms_to_secs(value.duration_ms),
            winning_number: value.winning_number,
            player_count: value.player_count,
            started_at: format_system_time(value.started_at),
            ended_at: value.ended_at.map(format_system_time),
        }
    }
}

/// One participant's outcome in a round.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResult {
    pub user_id: String,
    pub selected_number: Option<u8>,
    pub is_winner: bool,
}

impl From<&ParticipationEntity> for ParticipantResult {
    fn from(value: &ParticipationEntity) -> Self {
        Self {
            user_id: value.user_id.clone(),
            selected_number: value.selected_number,
            is_winner: value.is_winner,
        }
    }
}

/// Response for `GET /rounds/{id}`.
///
/// Participant outcomes are only disclosed once the round is completed.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundDetails {
    #[serde(flatten)]
    pub round: RoundSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<ParticipantResult>>,
}

/// Snapshot served on connect, on demand, and by `GET /sessions/current`.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentState {
    /// The open round, or `null` between rounds.
    pub session: Option<RoundSummary>,
    /// Seconds left in the open round; `0` when none is open.
    pub time_left: f64,
    /// Seconds until the next boundary.
    pub next_session_start: f64,
}

/// Response for `GET /users/{id}/stats`.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_games: u64,
    pub total_wins: u64,
    pub total_losses: u64,
    /// Share of games won, between 0 and 100.
    pub win_percentage: f64,
}

impl From<UserStatsEntity> for UserStats {
    fn from(value: UserStatsEntity) -> Self {
        let UserStatsEntity {
            total_games,
            total_wins,
        } = value;
        let win_percentage = if total_games == 0 {
            0.0
        } else {
            total_wins as f64 / total_games as f64 * 100.0
        };

        Self {
            total_games,
            total_wins,
            total_losses: total_games.saturating_sub(total_wins),
            win_percentage,
        }
    }
}
