//! Process-local round store. Every operation runs under a single lock, which makes the
//! conditional inserts and updates transactional.

use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::RoundStore;
use crate::dao::{
    models::{ParticipationEntity, RoundEntity, RoundStatus, UserStatsEntity},
    storage::{StorageError, StorageResult},
};

#[derive(Clone, Default)]
pub struct InMemoryRoundStore {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    rounds: IndexMap<Uuid, RoundEntity>,
    participations: IndexMap<(String, Uuid), ParticipationEntity>,
}

impl Tables {
    fn require_active(&self, round_id: Uuid) -> StorageResult<&RoundEntity> {
        match self.rounds.get(&round_id) {
            Some(round) if round.status == RoundStatus::Active => Ok(round),
            _ => Err(StorageError::RoundClosed { round_id }),
        }
    }
}

impl InMemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoundStore for InMemoryRoundStore {
    fn create_round(
        &self,
        duration_ms: u64,
        started_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<RoundEntity>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let round = RoundEntity {
                id: Uuid::new_v4(),
                status: RoundStatus::Active,
                duration_ms,
                winning_number: None,
                player_count: 0,
                started_at,
                ended_at: None,
            };
            tables.lock().await.rounds.insert(round.id, round.clone());
            Ok(round)
        })
    }

    fn complete_round(
        &self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let round = guard
                .rounds
                .get_mut(&id)
                .ok_or_else(|| StorageError::not_found(format!("round `{id}`")))?;
            if round.status == RoundStatus::Completed {
                return Ok(false);
            }
            round.status = RoundStatus::Completed;
            round.winning_number = Some(winning_number);
            round.ended_at = Some(ended_at);
            Ok(true)
        })
    }

    fn get_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.rounds.get(&id).cloned()) })
    }

    fn create_participation(
        &self,
        user_id: String,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<ParticipationEntity>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            guard.require_active(round_id)?;

            let key = (user_id.clone(), round_id);
            if guard.participations.contains_key(&key) {
                return Err(StorageError::conflict(format!(
                    "user `{user_id}` already joined round `{round_id}`"
                )));
            }

            let participation = ParticipationEntity {
                user_id,
                round_id,
                selected_number: None,
                is_winner: false,
                joined_at: SystemTime::now(),
            };
            guard.participations.insert(key, participation.clone());
            Ok(participation)
        })
    }

    fn set_selected_number(
        &self,
        user_id: String,
        round_id: Uuid,
        number: u8,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            guard.require_active(round_id)?;

            let participation = guard
                .participations
                .get_mut(&(user_id.clone(), round_id))
                .ok_or_else(|| {
                    StorageError::not_found(format!(
                        "user `{user_id}` has not joined round `{round_id}`"
                    ))
                })?;
            if participation.selected_number.is_some() {
                return Err(StorageError::conflict(format!(
                    "user `{user_id}` already picked a number in round `{round_id}`"
                )));
            }
            participation.selected_number = Some(number);
            Ok(())
        })
    }

    fn increment_player_count(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let round = guard
                .rounds
                .get_mut(&round_id)
                .ok_or_else(|| StorageError::not_found(format!("round `{round_id}`")))?;
            round.player_count += 1;
            Ok(())
        })
    }

    fn list_participants(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipationEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .participations
                .values()
                .filter(|p| p.round_id == round_id)
                .cloned()
                .collect())
        })
    }

    fn mark_winners(
        &self,
        round_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let mut winners = 0;
            for participation in guard
                .participations
                .values_mut()
                .filter(|p| p.round_id == round_id && p.selected_number == Some(winning_number))
            {
                participation.is_winner = true;
                winners += 1;
            }
            Ok(winners)
        })
    }

    fn list_active_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .rounds
                .values()
                .filter(|round| round.status == RoundStatus::Active)
                .cloned()
                .collect())
        })
    }

    fn user_stats(&self, user_id: String) -> BoxFuture<'static, StorageResult<UserStatsEntity>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            let stats = guard
                .participations
                .values()
                .filter(|p| p.user_id == user_id)
                .fold(UserStatsEntity::default(), |mut acc, p| {
                    acc.total_games += 1;
                    if p.is_winner {
                        acc.total_wins += 1;
                    }
                    acc
                });
            Ok(stats)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_round(store: &InMemoryRoundStore) -> RoundEntity {
        store.create_round(30_000, SystemTime::now()).await.unwrap()
    }

    #[tokio::test]
    async fn second_participation_for_same_pair_conflicts() {
        let store = InMemoryRoundStore::new();
        let round = open_round(&store).await;

        store
            .create_participation("u1".into(), round.id)
            .await
            .unwrap();
        let err = store
            .create_participation("u1".into(), round.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let participants = store.list_participants(round.id).await.unwrap();
        assert_eq!(participants.len(), 1);
    }

    #[tokio::test]
    async fn selected_number_is_set_at_most_once() {
        let store = InMemoryRoundStore::new();
        let round = open_round(&store).await;
        store
            .create_participation("u1".into(), round.id)
            .await
            .unwrap();

        store
            .set_selected_number("u1".into(), round.id, 6)
            .await
            .unwrap();
        let err = store
            .set_selected_number("u1".into(), round.id, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let participants = store.list_participants(round.id).await.unwrap();
        assert_eq!(participants[0].selected_number, Some(6));
    }

    #[tokio::test]
    async fn guess_without_join_is_not_found() {
        let store = InMemoryRoundStore::new();
        let round = open_round(&store).await;

        let err = store
            .set_selected_number("ghost".into(), round.id, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn completed_round_rejects_joins_and_guesses() {
        let store = InMemoryRoundStore::new();
        let round = open_round(&store).await;
        store
            .create_participation("u1".into(), round.id)
            .await
            .unwrap();
        assert!(
            store
                .complete_round(round.id, 4, SystemTime::now())
                .await
                .unwrap()
        );

        let join = store
            .create_participation("u2".into(), round.id)
            .await
            .unwrap_err();
        assert!(matches!(join, StorageError::RoundClosed { .. }));

        let guess = store
            .set_selected_number("u1".into(), round.id, 4)
            .await
            .unwrap_err();
        assert!(matches!(guess, StorageError::RoundClosed { .. }));
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let store = InMemoryRoundStore::new();
        let round = open_round(&store).await;

        assert!(
            store
                .complete_round(round.id, 4, SystemTime::now())
                .await
                .unwrap()
        );
        assert!(
            !store
                .complete_round(round.id, 9, SystemTime::now())
                .await
                .unwrap()
        );

        let stored = store.get_round(round.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RoundStatus::Completed);
        assert_eq!(stored.winning_number, Some(4));
        assert!(store.list_active_rounds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn winners_and_stats_follow_selected_numbers() {
        let store = InMemoryRoundStore::new();
        let round = open_round(&store).await;
        for (user, number) in [("u1", 6), ("u2", 2), ("u3", 6)] {
            store
                .create_participation(user.into(), round.id)
                .await
                .unwrap();
            store.increment_player_count(round.id).await.unwrap();
            store
                .set_selected_number(user.into(), round.id, number)
                .await
                .unwrap();
        }
        store
            .create_participation("u4".into(), round.id)
            .await
            .unwrap();

        assert_eq!(store.mark_winners(round.id, 6).await.unwrap(), 2);

        let participants = store.list_participants(round.id).await.unwrap();
        let winners: Vec<_> = participants
            .iter()
            .filter(|p| p.is_winner)
            .map(|p| p.user_id.as_str())
            .collect();
        assert_eq!(winners, vec!["u1", "u3"]);

        let stored = store.get_round(round.id).await.unwrap().unwrap();
        assert_eq!(stored.player_count, 3);

        let stats = store.user_stats("u1".into()).await.unwrap();
        assert_eq!(stats.total_games, 1);
        assert_eq!(stats.total_wins, 1);
        let stats = store.user_stats("nobody".into()).await.unwrap();
        assert_eq!(stats, UserStatsEntity::default());
    }
}
