use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Lifecycle status of a persisted round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    /// Round is open for joins and guesses.
    Active,
    /// Round has been closed and its winners computed.
    Completed,
}

impl RoundStatus {
    /// Storage label used by document backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Active => "ACTIVE",
            RoundStatus::Completed => "COMPLETED",
        }
    }
}

/// Round record as stored by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: RoundStatus,
    /// Declared duration of the round in milliseconds.
    pub duration_ms: u64,
    /// Winning number, unset until completion.
    pub winning_number: Option<u8>,
    /// Number of users who joined.
    pub player_count: u32,
    /// Wall-clock instant at which the round opened.
    pub started_at: SystemTime,
    /// Wall-clock instant at which the round completed.
    pub ended_at: Option<SystemTime>,
}

/// A user's membership and guess within one round, unique per `(user_id, round_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipationEntity {
    /// Identifier supplied by the external identity layer.
    pub user_id: String,
    /// Round the user joined.
    pub round_id: Uuid,
    /// Guess, absent until the user picks a number; set at most once.
    pub selected_number: Option<u8>,
    /// Set only at round completion.
    pub is_winner: bool,
    /// Join instant, used to order participant lists.
    pub joined_at: SystemTime,
}

/// Aggregated participation counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStatsEntity {
    /// Number of rounds the user joined.
    pub total_games: u64,
    /// Number of those rounds the user won.
    pub total_wins: u64,
}
