//! In-process store used by the relay's `memory` backend and by tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        models::{GrantEntity, SessionEntity},
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    state::grant::GrantStatus,
};

#[derive(Debug, Error)]
#[error("in-memory store is offline")]
struct Offline;

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<String, SessionEntity>,
    grants: DashMap<Uuid, GrantEntity>,
    offline: AtomicBool,
}

/// Session store keeping every row in concurrent maps.
///
/// The store can be switched offline to simulate an outage: every call then
/// fails with [`StorageError::Unavailable`] until it is switched back.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.inner.offline.store(!available, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "in-memory store is offline".into(),
                Offline,
            ));
        }
        Ok(())
    }

    fn find_session(&self, session_id: &str) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online()?;
        Ok(self
            .inner
            .sessions
            .get(session_id)
            .map(|row| row.value().clone()))
    }

    fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        self.ensure_online()?;
        match self.inner.sessions.entry(session.session_id.clone()) {
            Entry::Occupied(_) => Err(StorageError::unique_violation(session.session_id)),
            Entry::Vacant(slot) => {
                debug!(session_id = %session.session_id, "session row created");
                slot.insert(session);
                Ok(())
            }
        }
    }

    fn update_session(&self, session: SessionEntity, expected_revision: u32) -> StorageResult<()> {
        self.ensure_online()?;
        let mut row = self
            .inner
            .sessions
            .get_mut(&session.session_id)
            .ok_or_else(|| StorageError::not_found(session.session_id.clone()))?;

        if row.revision != expected_revision {
            return Err(StorageError::conflict(session.session_id));
        }
        *row = session;
        Ok(())
    }

    fn insert_grant(&self, grant: GrantEntity) -> StorageResult<()> {
        self.ensure_online()?;
        match self.inner.grants.entry(grant.id) {
            Entry::Occupied(_) => Err(StorageError::unique_violation(grant.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(grant);
                Ok(())
            }
        }
    }

    fn update_grant(&self, grant: GrantEntity) -> StorageResult<()> {
        self.ensure_online()?;
        let mut row = self
            .inner
            .grants
            .get_mut(&grant.id)
            .ok_or_else(|| StorageError::not_found(grant.id.to_string()))?;

        if row.status != GrantStatus::Pending {
            return Err(StorageError::conflict(grant.id.to_string()));
        }
        *row = grant;
        Ok(())
    }

    fn find_grant(&self, id: Uuid) -> StorageResult<Option<GrantEntity>> {
        self.ensure_online()?;
        Ok(self.inner.grants.get(&id).map(|row| row.value().clone()))
    }

    fn list_grants(&self, couple_id: Uuid) -> StorageResult<Vec<GrantEntity>> {
        self.ensure_online()?;
        let mut grants = self
            .inner
            .grants
            .iter()
            .filter(|row| row.couple_id == couple_id)
            .map(|row| row.value().clone())
            .collect::<Vec<_>>();
        grants.sort_by_key(|grant| grant.created_at);
        Ok(grants)
    }
}

impl SessionStore for MemorySessionStore {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(&session_id) })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session) })
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(session, expected_revision) })
    }

    fn insert_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_grant(grant) })
    }

    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_grant(grant) })
    }

    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_grant(id) })
    }

    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_grants(couple_id) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}
