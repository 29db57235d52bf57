//! Failures of the MongoDB session store.

use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Everything the MongoDB adapter can report; the conditional-write outcomes
/// map onto the shared [`StorageError`](crate::dao::storage::StorageError) kinds.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
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
    /// `ping` kept failing.
    #[error("MongoDB did not answer a ping after {attempts} attempt(s)")]
    Unreachable {
        attempts: u32,
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
    /// Unique index hit on insert.
    #[error("duplicate key `{key}` in collection `{collection}`")]
    DuplicateKey {
        collection: &'static str,
        key: String,
    },
    #[error("document `{key}` in collection `{collection}` changed since it was read")]
    ConditionFailed {
        collection: &'static str,
        key: String,
    },
    #[error("document `{key}` not found in collection `{collection}`")]
    Missing {
        collection: &'static str,
        key: String,
    },
    #[error("failed to write `{key}` to collection `{collection}`")]
    Write {
        collection: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to read from collection `{collection}`")]
    Read {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("invalid document `{id}` in collection `{collection}`: {reason}")]
    InvalidDocument {
        collection: &'static str,
        id: String,
        reason: String,
    },
}
