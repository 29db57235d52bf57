use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::debug;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Build a client for `config` and return its database once a ping succeeds.
pub async fn establish_connection(config: &MongoConfig) -> MongoResult<Database> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut delay = FIRST_RETRY_DELAY;
    for attempt in 1..CONNECT_ATTEMPTS {
        match ping(&database, attempt).await {
            Ok(()) => return Ok(database),
            Err(err) => {
                debug!(attempt, error = %err, "MongoDB not answering yet");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }
    }

    ping(&database, CONNECT_ATTEMPTS).await?;
    Ok(database)
}

/// Round-trip a `ping` command; `attempts` is reported on failure.
pub async fn ping(database: &Database, attempts: u32) -> MongoResult<()> {
    database
        .run_command(doc! { "ping": 1 })
        .await
        .map(drop)
        .map_err(|source| MongoDaoError::Unreachable { attempts, source })
}
