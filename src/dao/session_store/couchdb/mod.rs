mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchSessionStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::DocumentExists { key } => StorageError::unique_violation(key),
            CouchDaoError::StaleDocument { key } => StorageError::conflict(key),
            CouchDaoError::MissingDocument { key } => StorageError::not_found(key),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
