use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::{establish_connection, ping},
    error::{MongoDaoError, MongoResult},
    models::{
        GRANT_COLLECTION_NAME, MongoGrantDocument, MongoSessionDocument, SESSION_COLLECTION_NAME,
    },
};
use crate::dao::{
    models::{GrantEntity, SessionEntity},
    session_store::SessionStore,
    storage::StorageResult,
};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed store. The database handle is swapped on reconnect.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn database(&self) -> Database {
        self.database.read().await.clone()
    }

    async fn ping(&self) -> MongoResult<()> {
        ping(&self.database().await, 1).await
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database = establish_connection(&self.config).await?;
        *self.database.write().await = database;
        debug!(database = %self.config.database_name, "MongoDB handle replaced");
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = establish_connection(&config).await?;
        let inner = Arc::new(MongoInner {
            database: RwLock::new(database),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let sessions = self.sessions().await;
        let session_index = mongodb::IndexModel::builder()
            .keys(doc! {"sessionId": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_id_unique_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        sessions
            .create_index(session_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "sessionId",
                source,
            })?;

        let grants = self.grants().await;
        let grant_index = mongodb::IndexModel::builder()
            .keys(doc! {"coupleId": 1, "createdAt": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("grant_couple_idx".to_owned()))
                    .build(),
            )
            .build();

        grants
            .create_index(grant_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GRANT_COLLECTION_NAME,
                index: "coupleId,createdAt",
                source,
            })?;

        Ok(())
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.inner
            .database()
            .await
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn grants(&self) -> Collection<MongoGrantDocument> {
        self.inner
            .database()
            .await
            .collection::<MongoGrantDocument>(GRANT_COLLECTION_NAME)
    }

    async fn find_session(&self, session_id: &str) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! {"sessionId": session_id})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SESSION_COLLECTION_NAME,
                source,
            })?;

        document.map(SessionEntity::try_from).transpose()
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let key = session.session_id.clone();
        let document = MongoSessionDocument::from(session);

        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateKey {
                        collection: SESSION_COLLECTION_NAME,
                        key: key.clone(),
                    }
                } else {
                    MongoDaoError::Write {
                        collection: SESSION_COLLECTION_NAME,
                        key: key.clone(),
                        source,
                    }
                }
            })?;

        debug!(session_id = %key, "session document inserted");
        Ok(())
    }

    async fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> MongoResult<()> {
        let key = session.session_id.clone();
        let document = MongoSessionDocument::from(session);
        let filter = doc! {
            "sessionId": key.as_str(),
            "revision": i64::from(expected_revision),
        };

        let result = self
            .sessions()
            .await
            .replace_one(filter, &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: SESSION_COLLECTION_NAME,
                key: key.clone(),
                source,
            })?;

        if result.matched_count > 0 {
            return Ok(());
        }

        match self.find_session(&key).await? {
            Some(_) => Err(MongoDaoError::ConditionFailed {
                collection: SESSION_COLLECTION_NAME,
                key,
            }),
            None => Err(MongoDaoError::Missing {
                collection: SESSION_COLLECTION_NAME,
                key,
            }),
        }
    }

    async fn insert_grant(&self, grant: GrantEntity) -> MongoResult<()> {
        let key = grant.id.to_string();
        let document = MongoGrantDocument::from(grant);

        self.grants()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateKey {
                        collection: GRANT_COLLECTION_NAME,
                        key: key.clone(),
                    }
                } else {
                    MongoDaoError::Write {
                        collection: GRANT_COLLECTION_NAME,
                        key: key.clone(),
                        source,
                    }
                }
            })?;
        Ok(())
    }

    async fn update_grant(&self, grant: GrantEntity) -> MongoResult<()> {
        let id = grant.id;
        let key = id.to_string();
        let document = MongoGrantDocument::from(grant);

        let result = self
            .grants()
            .await
            .replace_one(doc! {"_id": key.as_str(), "status": "pending"}, &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: GRANT_COLLECTION_NAME,
                key: key.clone(),
                source,
            })?;

        if result.matched_count > 0 {
            return Ok(());
        }

        match self.find_grant(id).await? {
            Some(_) => Err(MongoDaoError::ConditionFailed {
                collection: GRANT_COLLECTION_NAME,
                key,
            }),
            None => Err(MongoDaoError::Missing {
                collection: GRANT_COLLECTION_NAME,
                key,
            }),
        }
    }

    async fn find_grant(&self, id: Uuid) -> MongoResult<Option<GrantEntity>> {
        let document = self
            .grants()
            .await
            .find_one(doc! {"_id": id.to_string()})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GRANT_COLLECTION_NAME,
                source,
            })?;

        Ok(document.map(Into::into))
    }

    async fn list_grants(&self, couple_id: Uuid) -> MongoResult<Vec<GrantEntity>> {
        let documents: Vec<MongoGrantDocument> = self
            .grants()
            .await
            .find(doc! {"coupleId": couple_id.to_string()})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GRANT_COLLECTION_NAME,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GRANT_COLLECTION_NAME,
                source,
            })?;

        let mut grants = documents
            .into_iter()
            .map(GrantEntity::from)
            .collect::<Vec<_>>();
        grants.sort_by_key(|grant| grant.created_at);
        Ok(grants)
    }
}

impl SessionStore for MongoSessionStore {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(&session_id).await.map_err(Into::into) })
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
        Box::pin(async move { store.insert_grant(grant).await.map_err(Into::into) })
    }

    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_grant(grant).await.map_err(Into::into) })
    }

    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_grant(id).await.map_err(Into::into) })
    }

    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_grants(couple_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
