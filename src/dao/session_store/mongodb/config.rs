use std::env;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

/// Database used when `MONGO_DB` is not set.
pub const DEFAULT_DATABASE: &str = "tandem_grid";

/// Parsed client options plus the database holding sessions and grants.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    pub async fn from_uri(uri: &str, database_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;

        Ok(Self {
            options,
            database_name: database_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
        })
    }

    /// `MONGO_URI` (required) and `MONGO_DB`.
    pub async fn from_env() -> MongoResult<Self> {
        let Ok(uri) = env::var("MONGO_URI") else {
            return Err(MongoDaoError::MissingEnvVar { var: "MONGO_URI" });
        };
        Self::from_uri(&uri, env::var("MONGO_DB").ok().as_deref()).await
    }
}
