mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateKey { key, .. } => StorageError::unique_violation(key),
            MongoDaoError::ConditionFailed { key, .. } => StorageError::conflict(key),
            MongoDaoError::Missing { key, .. } => StorageError::not_found(key),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
