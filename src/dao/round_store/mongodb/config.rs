use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "number_rush";
const APP_NAME: &str = "number-rush-back";
const DEFAULT_PING_ATTEMPTS: u32 = 3;

/// Connection settings for the MongoDB round store.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
    /// Pings tried before a connection attempt is reported as failed. The storage supervisor
    /// retries failed attempts with its own backoff.
    pub ping_attempts: u32,
}

impl MongoConfig {
    /// Parse `uri`, defaulting the database to `number_rush`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
            ping_attempts: DEFAULT_PING_ATTEMPTS,
        })
    }
}
