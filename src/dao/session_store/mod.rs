#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod feed;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{GrantEntity, SessionEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use feed::ChangeFeedStore;
pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer for game sessions and grants.
///
/// `insert_session` fails with `UniqueViolation` when a row already exists for
/// the same `sessionId`. `update_session` only succeeds while the stored
/// `revision` equals `expected_revision`, and `update_grant` only while the
/// stored grant is still pending; both report `Conflict` otherwise.
pub trait SessionStore: Send + Sync {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn insert_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>>;
    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
