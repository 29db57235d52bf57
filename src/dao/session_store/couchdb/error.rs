//! Failures of the CouchDB session store.

use reqwest::StatusCode;
use thiserror::Error;

pub type CouchResult<T> = Result<T, CouchDaoError>;

#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build CouchDB client")]
    Client(#[source] reqwest::Error),
    /// The request could not be sent or its body could not be read.
    #[error("CouchDB {operation} on `{target}` failed")]
    Http {
        operation: &'static str,
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for `{target}`")]
    UnexpectedStatus { target: String, status: StatusCode },
    #[error("malformed CouchDB document in `{target}`")]
    Malformed {
        target: String,
        #[source]
        source: serde_json::Error,
    },
    /// `409` on create.
    #[error("document `{key}` already exists")]
    DocumentExists { key: String },
    /// The stored document no longer matches the expected prior state.
    #[error("document `{key}` changed since it was read")]
    StaleDocument { key: String },
    #[error("document `{key}` not found")]
    MissingDocument { key: String },
}

impl CouchDaoError {
    pub(super) fn http(operation: &'static str, target: &str) -> impl FnOnce(reqwest::Error) -> Self {
        let target = target.to_string();
        move |source| CouchDaoError::Http {
            operation,
            target,
            source,
        }
    }

    pub(super) fn status(target: &str, status: StatusCode) -> Self {
        CouchDaoError::UnexpectedStatus {
            target: target.to_string(),
            status,
        }
    }
}
