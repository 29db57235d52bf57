//! Row-change notifications layered over any [`SessionStore`].

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GrantEntity, SessionEntity},
        session_store::SessionStore,
        storage::StorageResult,
    },
    dto::bus::BusMessage,
    state::bus::{BusHub, Topic},
};

/// Store decorator that publishes a row-change message after every successful
/// write: session rows on `game:<sessionId>`, grant rows on `couple:<coupleId>`.
#[derive(Clone)]
pub struct ChangeFeedStore {
    inner: Arc<dyn SessionStore>,
    hub: Arc<BusHub>,
}

impl ChangeFeedStore {
    /// Wrap `inner`, publishing changes through `hub`.
    pub fn new(inner: Arc<dyn SessionStore>, hub: Arc<BusHub>) -> Self {
        Self { inner, hub }
    }

    fn emit(hub: &BusHub, topic: Topic, message: BusMessage) {
        match message.encode(topic) {
            Ok(frame) => {
                let delivered = hub.publish(frame);
                debug!(event = message.event(), delivered, "row change published");
            }
            Err(err) => warn!(error = %err, "failed to encode row change"),
        }
    }

    fn write_session(
        &self,
        session: SessionEntity,
        write: BoxFuture<'static, StorageResult<()>>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let hub = self.hub.clone();
        Box::pin(async move {
            write.await?;
            let topic = Topic::Game(session.session_id.clone());
            Self::emit(&hub, topic, BusMessage::SessionChanged(session));
            Ok(())
        })
    }

    fn write_grant(
        &self,
        grant: GrantEntity,
        write: BoxFuture<'static, StorageResult<()>>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let hub = self.hub.clone();
        Box::pin(async move {
            write.await?;
            let topic = Topic::Couple(grant.couple_id);
            Self::emit(&hub, topic, BusMessage::GrantChanged(grant));
            Ok(())
        })
    }
}

impl SessionStore for ChangeFeedStore {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session(session_id)
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let write = self.inner.insert_session(session.clone());
        self.write_session(session, write)
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let write = self
            .inner
            .update_session(session.clone(), expected_revision);
        self.write_session(session, write)
    }

    fn insert_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let write = self.inner.insert_grant(grant.clone());
        self.write_grant(grant, write)
    }

    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let write = self.inner.update_grant(grant.clone());
        self.write_grant(grant, write)
    }

    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>> {
        self.inner.find_grant(id)
    }

    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>> {
        self.inner.list_grants(couple_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}
