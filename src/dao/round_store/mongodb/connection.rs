use std::time::Duration;

use mongodb::{Client, bson::doc};
use tokio::time::sleep;
use tracing::debug;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

const FIRST_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Build a client for `config` and wait until the database answers a ping.
pub async fn establish_connection(config: &MongoConfig) -> MongoResult<Client> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let attempts = config.ping_attempts.max(1);
    let mut attempt = 1;
    let mut delay = FIRST_RETRY_DELAY;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok(client),
            Err(source) if attempt >= attempts => {
                return Err(MongoDaoError::InitialPing { attempts, source });
            }
            Err(err) => {
                debug!(attempt, error = %err, "MongoDB ping failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
                attempt += 1;
            }
        }
    }
}
