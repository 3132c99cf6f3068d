pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{ParticipationEntity, RoundEntity, UserStatsEntity},
    storage::StorageResult,
};

pub use memory::InMemoryRoundStore;

/// Abstraction over the durable record of rounds and per-user participation.
///
/// Conditional writes are the source of truth for the at-most-once rules:
/// `create_participation` fails with [`StorageError::Conflict`] when the `(user, round)` pair
/// already exists, `set_selected_number` fails with a conflict when a number is already set, and
/// both fail with [`StorageError::RoundClosed`] once the round has left the ACTIVE status.
///
/// [`StorageError::Conflict`]: crate::dao::storage::StorageError::Conflict
/// [`StorageError::RoundClosed`]: crate::dao::storage::StorageError::RoundClosed
pub trait RoundStore: Send + Sync {
    /// Persist a new ACTIVE round.
    fn create_round(
        &self,
        duration_ms: u64,
        started_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<RoundEntity>>;
    /// Mark an ACTIVE round COMPLETED. Returns `false` when it was already completed.
    fn complete_round(
        &self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn get_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    fn create_participation(
        &self,
        user_id: String,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<ParticipationEntity>>;
    fn set_selected_number(
        &self,
        user_id: String,
        round_id: Uuid,
        number: u8,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn increment_player_count(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Participations of a round in join order.
    fn list_participants(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipationEntity>>>;
    /// Flag every participation whose guess equals `winning_number`. Returns the winner count.
    fn mark_winners(
        &self,
        round_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'static, StorageResult<u64>>;
    fn list_active_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    fn user_stats(&self, user_id: String) -> BoxFuture<'static, StorageResult<UserStatsEntity>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
