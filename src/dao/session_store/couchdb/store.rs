use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        models::{GrantEntity, SessionEntity},
        session_store::SessionStore,
        storage::StorageResult,
    },
    state::grant::GrantStatus,
};

use super::{
    config::{BasicAuth, CouchConfig},
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchGrantDocument, CouchSessionDocument, END_SUFFIX, GRANT_PREFIX,
        grant_doc_id, session_doc_id,
    },
};

/// Session store keeping one CouchDB document per session row and per grant.
///
/// Conditional writes read the current document, compare it with the expected
/// prior state and PUT with its `_rev`, so a concurrent writer surfaces as `409`.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    database_url: Arc<str>,
    auth: Option<Arc<BasicAuth>>,
}

impl CouchSessionStore {
    /// Build the client and create the database when missing.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder().build().map_err(CouchDaoError::Client)?;
        let database_url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.database
        );

        let store = Self {
            client,
            database_url: Arc::from(database_url),
            auth: config.auth.map(Arc::new),
        };
        store.ensure_database().await?;
        Ok(store)
    }

    /// Request against the database itself (`path == None`) or one of its documents.
    fn request(&self, method: Method, path: Option<&str>) -> reqwest::RequestBuilder {
        let url = match path {
            Some(path) => format!("{}/{path}", self.database_url),
            None => self.database_url.to_string(),
        };
        let builder = self.client.request(method, url);
        match &self.auth {
            Some(auth) => builder.basic_auth(&auth.username, Some(&auth.password)),
            None => builder,
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let target = self.database_url.as_ref();
        let response = self
            .request(Method::GET, None)
            .send()
            .await
            .map_err(CouchDaoError::http("database lookup", target))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let created = self
                    .request(Method::PUT, None)
                    .send()
                    .await
                    .map_err(CouchDaoError::http("database creation", target))?
                    .status();
                // 412: created concurrently by another relay.
                if created.is_success() || created == StatusCode::PRECONDITION_FAILED {
                    debug!(database = target, "CouchDB database ready");
                    Ok(())
                } else {
                    Err(CouchDaoError::status(target, created))
                }
            }
            other => Err(CouchDaoError::status(target, other)),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, Some(doc_id))
            .send()
            .await
            .map_err(CouchDaoError::http("read", doc_id))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(CouchDaoError::http("decode", doc_id)),
            other => Err(CouchDaoError::status(doc_id, other)),
        }
    }

    /// PUT a document; a `409` is reported as `on_conflict`.
    async fn put_document<T>(
        &self,
        doc_id: &str,
        document: &T,
        on_conflict: CouchDaoError,
    ) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let status = self
            .request(Method::PUT, Some(doc_id))
            .json(document)
            .send()
            .await
            .map_err(CouchDaoError::http("write", doc_id))?
            .status();

        match status {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(on_conflict),
            other => Err(CouchDaoError::status(doc_id, other)),
        }
    }

    /// Every document whose id starts with `prefix`.
    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, Some(ALL_DOCS))
            .query(&query)
            .send()
            .await
            .map_err(CouchDaoError::http("listing", ALL_DOCS))?;
        if !response.status().is_success() {
            return Err(CouchDaoError::status(ALL_DOCS, response.status()));
        }

        let payload = response
            .json::<AllDocsResponse>()
            .await
            .map_err(CouchDaoError::http("decode", ALL_DOCS))?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::Malformed {
                    target: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn insert_session(&self, session: SessionEntity) -> CouchResult<()> {
        let key = session.session_id.clone();
        let doc_id = session_doc_id(&key);
        let doc = CouchSessionDocument::from((session, None));
        self.put_document(&doc_id, &doc, CouchDaoError::DocumentExists { key: key.clone() })
            .await?;
        debug!(session_id = %key, "session document created");
        Ok(())
    }

    async fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> CouchResult<()> {
        let key = session.session_id.clone();
        let doc_id = session_doc_id(&key);
        let existing = self
            .get_document::<CouchSessionDocument>(&doc_id)
            .await?
            .ok_or_else(|| CouchDaoError::MissingDocument { key: key.clone() })?;

        if existing.session.revision != expected_revision {
            return Err(CouchDaoError::StaleDocument { key });
        }

        // A write landing between the GET and this PUT bumps `_rev` and yields 409.
        let doc = CouchSessionDocument::from((session, existing.rev));
        self.put_document(&doc_id, &doc, CouchDaoError::StaleDocument { key })
            .await
    }

    async fn update_grant(&self, grant: GrantEntity) -> CouchResult<()> {
        let doc_id = grant_doc_id(grant.id);
        let key = grant.id.to_string();
        let existing = self
            .get_document::<CouchGrantDocument>(&doc_id)
            .await?
            .ok_or_else(|| CouchDaoError::MissingDocument { key: key.clone() })?;

        if existing.grant.status != GrantStatus::Pending {
            return Err(CouchDaoError::StaleDocument { key });
        }

        let doc = CouchGrantDocument::from((grant, existing.rev));
        self.put_document(&doc_id, &doc, CouchDaoError::StaleDocument { key })
            .await
    }

    async fn health_check(&self) -> CouchResult<()> {
        let target = self.database_url.as_ref();
        let status = self
            .request(Method::GET, None)
            .send()
            .await
            .map_err(CouchDaoError::http("health check", target))?
            .status();

        if status.is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::status(target, status))
        }
    }
}

impl SessionStore for CouchSessionStore {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = session_doc_id(&session_id);
            let maybe_doc = store.get_document::<CouchSessionDocument>(&doc_id).await?;
            Ok(maybe_doc.map(|doc| doc.session))
        })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session(session, expected_revision)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = grant_doc_id(grant.id);
            let key = grant.id.to_string();
            let doc = CouchGrantDocument::from((grant, None));
            store
                .put_document(&doc_id, &doc, CouchDaoError::DocumentExists { key })
                .await
                .map_err(Into::into)
        })
    }

    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_grant(grant).await.map_err(Into::into) })
    }

    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = grant_doc_id(id);
            let maybe_doc = store.get_document::<CouchGrantDocument>(&doc_id).await?;
            Ok(maybe_doc.map(|doc| doc.grant))
        })
    }

    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchGrantDocument>(GRANT_PREFIX)
                .await?;
            let mut grants = docs
                .into_iter()
                .map(|doc| doc.grant)
                .filter(|grant| grant.couple_id == couple_id)
                .collect::<Vec<_>>();
            grants.sort_by_key(|grant| grant.created_at);
            Ok(grants)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.health_check().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
