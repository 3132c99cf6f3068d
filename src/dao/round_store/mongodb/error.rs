use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to write round `{id}`")]
    WriteRound {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load round `{id}`")]
    LoadRound {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write participation of `{user_id}` in round `{round_id}`")]
    WriteParticipation {
        user_id: String,
        round_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load participations")]
    LoadParticipations {
        #[source]
        source: MongoError,
    },
    #[error("malformed document `{id}` in `{collection}`: {reason}")]
    Decode {
        collection: &'static str,
        id: String,
        reason: String,
    },
}
