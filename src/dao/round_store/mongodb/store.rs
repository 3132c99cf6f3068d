use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Bson, DateTime, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoParticipationDocument, MongoRoundDocument, PARTICIPATION_COLLECTION_NAME,
        ROUND_COLLECTION_NAME, doc_id, pair_filter,
    },
};
use crate::dao::{
    models::{ParticipationEntity, RoundEntity, RoundStatus, UserStatsEntity},
    round_store::RoundStore,
    storage::{StorageError, StorageResult},
};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed round store.
///
/// The unique `(user_id, round_id)` index is what makes joins exactly-once across processes;
/// guesses and completion rely on conditional `update_one` filters.
#[derive(Clone)]
pub struct MongoRoundStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    client: RwLock<Client>,
    config: MongoConfig,
}

impl MongoInner {
    async fn database(&self) -> Database {
        self.client.read().await.database(&self.config.database_name)
    }

    async fn ping(&self) -> MongoResult<()> {
        self.database()
            .await
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    /// Swap in a freshly pinged client; handles taken before the swap keep the old one.
    async fn reconnect(&self) -> MongoResult<()> {
        let client = establish_connection(&self.config).await?;
        *self.client.write().await = client;
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

impl MongoRoundStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let client = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            client: RwLock::new(client),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let participation_index = IndexModel::builder()
            .keys(doc! {"user_id": 1, "round_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("participation_pair_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.participations()
            .await
            .create_index(participation_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PARTICIPATION_COLLECTION_NAME,
                index: "user_id,round_id",
                source,
            })?;

        let status_index = IndexModel::builder()
            .keys(doc! {"status": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("round_status_idx".to_owned()))
                    .build(),
            )
            .build();

        self.rounds()
            .await
            .create_index(status_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROUND_COLLECTION_NAME,
                index: "status",
                source,
            })?;

        Ok(())
    }

    async fn rounds(&self) -> Collection<MongoRoundDocument> {
        self.inner
            .database()
            .await
            .collection::<MongoRoundDocument>(ROUND_COLLECTION_NAME)
    }

    async fn participations(&self) -> Collection<MongoParticipationDocument> {
        self.inner
            .database()
            .await
            .collection::<MongoParticipationDocument>(PARTICIPATION_COLLECTION_NAME)
    }

    async fn create_round(&self, duration_ms: u64, started_at: SystemTime) -> MongoResult<RoundEntity> {
        let round = RoundEntity {
            id: Uuid::new_v4(),
            status: RoundStatus::Active,
            duration_ms,
            winning_number: None,
            player_count: 0,
            started_at,
            ended_at: None,
        };
        let document = MongoRoundDocument::from(&round);

        self.rounds()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::WriteRound {
                id: document.id.clone(),
                source,
            })?;

        Ok(round)
    }

    async fn complete_round(
        &self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> StorageResult<bool> {
        let result = self
            .rounds()
            .await
            .update_one(
                doc! {"_id": id.to_string(), "status": RoundStatus::Active.as_str()},
                doc! {"$set": {
                    "status": RoundStatus::Completed.as_str(),
                    "winning_number": i32::from(winning_number),
                    "ended_at": DateTime::from_system_time(ended_at),
                }},
            )
            .await
            .map_err(|source| MongoDaoError::WriteRound {
                id: id.to_string(),
                source,
            })?;

        if result.modified_count > 0 {
            return Ok(true);
        }

        match self.find_round(id).await? {
            Some(_) => Ok(false),
            None => Err(StorageError::not_found(format!("round `{id}`"))),
        }
    }

    async fn find_round(&self, id: Uuid) -> MongoResult<Option<RoundEntity>> {
        self.rounds()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadRound {
                id: id.to_string(),
                source,
            })?
            .map(RoundEntity::try_from)
            .transpose()
    }

    async fn require_active(&self, round_id: Uuid) -> StorageResult<()> {
        match self.find_round(round_id).await? {
            Some(round) if round.status == RoundStatus::Active => Ok(()),
            _ => Err(StorageError::RoundClosed { round_id }),
        }
    }

    async fn create_participation(
        &self,
        user_id: String,
        round_id: Uuid,
    ) -> StorageResult<ParticipationEntity> {
        self.require_active(round_id).await?;

        let joined_at = SystemTime::now();
        let document = MongoParticipationDocument {
            user_id: user_id.clone(),
            round_id: round_id.to_string(),
            selected_number: None,
            is_winner: false,
            joined_at: DateTime::from_system_time(joined_at),
        };

        let collection = self.participations().await;
        match collection.insert_one(&document).await {
            Ok(_) => {}
            Err(err) if is_duplicate_key(&err) => {
                return Err(StorageError::conflict(format!(
                    "user `{user_id}` already joined round `{round_id}`"
                )));
            }
            Err(source) => {
                return Err(MongoDaoError::WriteParticipation {
                    user_id,
                    round_id: round_id.to_string(),
                    source,
                }
                .into());
            }
        }

        // Completion may have landed between the status check and the insert; undo in that case
        // so a completed round never gains members.
        if let Err(StorageError::RoundClosed { .. }) = self.require_active(round_id).await {
            if let Err(err) = collection.delete_one(pair_filter(&user_id, round_id)).await {
                warn!(%user_id, %round_id, error = %err, "failed to roll back late participation");
            }
            return Err(StorageError::RoundClosed { round_id });
        }

        Ok(ParticipationEntity {
            user_id,
            round_id,
            selected_number: None,
            is_winner: false,
            joined_at,
        })
    }

    async fn set_selected_number(
        &self,
        user_id: String,
        round_id: Uuid,
        number: u8,
    ) -> StorageResult<()> {
        self.require_active(round_id).await?;

        let collection = self.participations().await;
        let mut filter = pair_filter(&user_id, round_id);
        filter.insert("selected_number", Bson::Null);

        let result = collection
            .update_one(
                filter,
                doc! {"$set": {"selected_number": i32::from(number)}},
            )
            .await
            .map_err(|source| MongoDaoError::WriteParticipation {
                user_id: user_id.clone(),
                round_id: round_id.to_string(),
                source,
            })?;

        if result.modified_count > 0 {
            return self.settle_guess(&collection, &user_id, round_id, number).await;
        }

        let existing = collection
            .find_one(pair_filter(&user_id, round_id))
            .await
            .map_err(|source| MongoDaoError::LoadParticipations { source })?;
        match existing {
            Some(_) => Err(StorageError::conflict(format!(
                "user `{user_id}` already picked a number in round `{round_id}`"
            ))),
            None => Err(StorageError::not_found(format!(
                "user `{user_id}` has not joined round `{round_id}`"
            ))),
        }
    }

    /// Keep a written guess only if its round was still ACTIVE after the write.
    ///
    /// Completion may land between the status check and the update. The guess is then reset,
    /// including a winner flag the completion may already have set, so a completed round never
    /// gains guesses.
    async fn settle_guess(
        &self,
        collection: &Collection<MongoParticipationDocument>,
        user_id: &str,
        round_id: Uuid,
        number: u8,
    ) -> StorageResult<()> {
        let Err(StorageError::RoundClosed { .. }) = self.require_active(round_id).await else {
            return Ok(());
        };

        let mut filter = pair_filter(user_id, round_id);
        filter.insert("selected_number", i32::from(number));
        if let Err(err) = collection
            .update_one(
                filter,
                doc! {"$set": {"selected_number": Bson::Null, "is_winner": false}},
            )
            .await
        {
            warn!(%user_id, %round_id, error = %err, "failed to roll back late guess");
        }
        Err(StorageError::RoundClosed { round_id })
    }

    async fn increment_player_count(&self, round_id: Uuid) -> StorageResult<()> {
        let result = self
            .rounds()
            .await
            .update_one(doc_id(round_id), doc! {"$inc": {"player_count": 1_i64}})
            .await
            .map_err(|source| MongoDaoError::WriteRound {
                id: round_id.to_string(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(StorageError::not_found(format!("round `{round_id}`")));
        }
        Ok(())
    }

    async fn list_participants(&self, round_id: Uuid) -> MongoResult<Vec<ParticipationEntity>> {
        let documents: Vec<MongoParticipationDocument> = self
            .participations()
            .await
            .find(doc! {"round_id": round_id.to_string()})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(|source| MongoDaoError::LoadParticipations { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadParticipations { source })?;

        documents
            .into_iter()
            .map(ParticipationEntity::try_from)
            .collect()
    }

    async fn mark_winners(&self, round_id: Uuid, winning_number: u8) -> MongoResult<u64> {
        let result = self
            .participations()
            .await
            .update_many(
                doc! {
                    "round_id": round_id.to_string(),
                    "selected_number": i32::from(winning_number),
                },
                doc! {"$set": {"is_winner": true}},
            )
            .await
            .map_err(|source| MongoDaoError::WriteRound {
                id: round_id.to_string(),
                source,
            })?;

        Ok(result.modified_count)
    }

    async fn list_active_rounds(&self) -> MongoResult<Vec<RoundEntity>> {
        let documents: Vec<MongoRoundDocument> = self
            .rounds()
            .await
            .find(doc! {"status": RoundStatus::Active.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadRound {
                id: "*".into(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadRound {
                id: "*".into(),
                source,
            })?;

        documents.into_iter().map(RoundEntity::try_from).collect()
    }

    async fn user_stats(&self, user_id: String) -> MongoResult<UserStatsEntity> {
        let collection = self.participations().await;
        let total_games = collection
            .count_documents(doc! {"user_id": user_id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadParticipations { source })?;
        let total_wins = collection
            .count_documents(doc! {"user_id": user_id.as_str(), "is_winner": true})
            .await
            .map_err(|source| MongoDaoError::LoadParticipations { source })?;

        Ok(UserStatsEntity {
            total_games,
            total_wins,
        })
    }
}

impl RoundStore for MongoRoundStore {
    fn create_round(
        &self,
        duration_ms: u64,
        started_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<RoundEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .create_round(duration_ms, started_at)
                .await
                .map_err(Into::into)
        })
    }

    fn complete_round(
        &self,
        id: Uuid,
        winning_number: u8,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.complete_round(id, winning_number, ended_at).await })
    }

    fn get_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_round(id).await.map_err(Into::into) })
    }

    fn create_participation(
        &self,
        user_id: String,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<ParticipationEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_participation(user_id, round_id).await })
    }

    fn set_selected_number(
        &self,
        user_id: String,
        round_id: Uuid,
        number: u8,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_selected_number(user_id, round_id, number).await })
    }

    fn increment_player_count(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.increment_player_count(round_id).await })
    }

    fn list_participants(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipationEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_participants(round_id).await.map_err(Into::into) })
    }

    fn mark_winners(
        &self,
        round_id: Uuid,
        winning_number: u8,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .mark_winners(round_id, winning_number)
                .await
                .map_err(Into::into)
        })
    }

    fn list_active_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_rounds().await.map_err(Into::into) })
    }

    fn user_stats(&self, user_id: String) -> BoxFuture<'static, StorageResult<UserStatsEntity>> {
        let store = self.clone();
        Box::pin(async move { store.user_stats(user_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
