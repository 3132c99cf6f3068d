use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{ParticipationEntity, RoundEntity, RoundStatus};

pub const ROUND_COLLECTION_NAME: &str = "rounds";
pub const PARTICIPATION_COLLECTION_NAME: &str = "participations";

/// Round document; ids are stored as hyphenated strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoundDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: String,
    pub duration_ms: i64,
    pub winning_number: Option<i32>,
    pub player_count: i64,
    pub started_at: DateTime,
    pub ended_at: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipationDocument {
    pub user_id: String,
    pub round_id: String,
    pub selected_number: Option<i32>,
    pub is_winner: bool,
    pub joined_at: DateTime,
}

impl From<&RoundEntity> for MongoRoundDocument {
    fn from(value: &RoundEntity) -> Self {
        Self {
            id: value.id.to_string(),
            status: value.status.as_str().to_owned(),
            duration_ms: i64::try_from(value.duration_ms).unwrap_or(i64::MAX),
            winning_number: value.winning_number.map(i32::from),
            player_count: i64::from(value.player_count),
            started_at: DateTime::from_system_time(value.started_at),
            ended_at: value.ended_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoRoundDocument> for RoundEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRoundDocument) -> Result<Self, Self::Error> {
        let decode = |reason: String| MongoDaoError::Decode {
            collection: ROUND_COLLECTION_NAME,
            id: value.id.clone(),
            reason,
        };

        let id = Uuid::parse_str(&value.id).map_err(|err| decode(err.to_string()))?;
        let status = match value.status.as_str() {
            "ACTIVE" => RoundStatus::Active,
            "COMPLETED" => RoundStatus::Completed,
            other => return Err(decode(format!("unknown status `{other}`"))),
        };
        let winning_number = value
            .winning_number
            .map(u8::try_from)
            .transpose()
            .map_err(|err| decode(err.to_string()))?;

        Ok(Self {
            id,
            status,
            duration_ms: u64::try_from(value.duration_ms).map_err(|err| decode(err.to_string()))?,
            winning_number,
            player_count: u32::try_from(value.player_count)
                .map_err(|err| decode(err.to_string()))?,
            started_at: value.started_at.to_system_time(),
            ended_at: value.ended_at.map(|at| at.to_system_time()),
        })
    }
}

impl TryFrom<MongoParticipationDocument> for ParticipationEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoParticipationDocument) -> Result<Self, Self::Error> {
        let decode = |reason: String| MongoDaoError::Decode {
            collection: PARTICIPATION_COLLECTION_NAME,
            id: format!("{}/{}", value.user_id, value.round_id),
            reason,
        };

        Ok(Self {
            round_id: Uuid::parse_str(&value.round_id).map_err(|err| decode(err.to_string()))?,
            selected_number: value
                .selected_number
                .map(u8::try_from)
                .transpose()
                .map_err(|err| decode(err.to_string()))?,
            is_winner: value.is_winner,
            joined_at: value.joined_at.to_system_time(),
            user_id: value.user_id,
        })
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn pair_filter(user_id: &str, round_id: Uuid) -> Document {
    doc! {"user_id": user_id, "round_id": round_id.to_string()}
}
