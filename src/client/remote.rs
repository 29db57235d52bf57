//! Adapters that let a client reach a remote relay: the session store over
//! REST and the bus over WebSocket.

use std::{sync::Arc, time::Duration};

use async_stream::stream;
use dashmap::DashSet;
use futures::{
    SinkExt, StreamExt,
    future::{BoxFuture, ready},
    stream::BoxStream,
};
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::sleep,
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    client::transport::{ConnectionStatus, Transport, TransportError},
    dao::{
        models::{GrantEntity, SessionEntity},
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    dto::{
        bus::{BusClientMessage, BusFrame, BusServerMessage},
        session::UpdateSessionRequest,
    },
    state::bus::{BusHub, DEFAULT_BUS_CAPACITY, Topic},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum RelayError {
    #[error("request to `{path}` failed")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("relay answered {status} for `{path}`")]
    Status { path: String, status: StatusCode },
    #[error("relay is degraded")]
    Degraded,
}

impl From<RelayError> for StorageError {
    fn from(err: RelayError) -> Self {
        StorageError::unavailable("relay request failed".into(), err)
    }
}

/// [`SessionStore`] backed by the relay's REST routes.
#[derive(Clone)]
pub struct HttpSessionStore {
    client: Client,
    base_url: Arc<str>,
}

impl HttpSessionStore {
    /// Client for the relay listening at `base_url`.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            client: Client::new(),
            base_url: Arc::from(base_url.as_ref().trim_end_matches('/')),
        }
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, RelayError> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(|source| RelayError::Request {
            path: path.to_string(),
            source,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> StorageResult<Option<T>> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response
                    .json::<T>()
                    .await
                    .map(Some)
                    .map_err(|source| {
                        RelayError::Request {
                            path: path.to_string(),
                            source,
                        }
                        .into()
                    })
            }
            status => Err(RelayError::Status {
                path: path.to_string(),
                status,
            }
            .into()),
        }
    }

    /// Map the status of a write, with `on_conflict` building the 409 error.
    async fn write<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        key: &str,
        on_conflict: fn(String) -> StorageError,
    ) -> StorageResult<()> {
        let response = self.send(method, path, Some(body)).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(on_conflict(key.to_string())),
            StatusCode::NOT_FOUND => Err(StorageError::not_found(key)),
            status => Err(RelayError::Status {
                path: path.to_string(),
                status,
            }
            .into()),
        }
    }

    async fn find_session(&self, session_id: String) -> StorageResult<Option<SessionEntity>> {
        self.get_json(&format!("/sessions/{session_id}")).await
    }

    async fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        let key = session.session_id.clone();
        self.write(
            Method::POST,
            "/sessions",
            &session,
            &key,
            |key| StorageError::unique_violation(key),
        )
        .await
    }

    async fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> StorageResult<()> {
        let key = session.session_id.clone();
        let body = UpdateSessionRequest {
            session,
            expected_revision,
        };
        self.write(
            Method::PUT,
            &format!("/sessions/{key}"),
            &body,
            &key,
            |key| StorageError::conflict(key),
        )
        .await
    }

    async fn insert_grant(&self, grant: GrantEntity) -> StorageResult<()> {
        let key = grant.id.to_string();
        self.write(
            Method::POST,
            "/grants",
            &grant,
            &key,
            |key| StorageError::unique_violation(key),
        )
        .await
    }

    async fn update_grant(&self, grant: GrantEntity) -> StorageResult<()> {
        let key = grant.id.to_string();
        self.write(
            Method::PUT,
            &format!("/grants/{key}"),
            &grant,
            &key,
            |key| StorageError::conflict(key),
        )
        .await
    }

    async fn find_grant(&self, id: Uuid) -> StorageResult<Option<GrantEntity>> {
        self.get_json(&format!("/grants/{id}")).await
    }

    async fn list_grants(&self, couple_id: Uuid) -> StorageResult<Vec<GrantEntity>> {
        Ok(self
            .get_json(&format!("/couples/{couple_id}/grants"))
            .await?
            .unwrap_or_default())
    }

    async fn health_check(&self) -> StorageResult<()> {
        #[derive(serde::Deserialize)]
        struct Health {
            status: String,
        }

        match self.get_json::<Health>("/healthcheck").await? {
            Some(health) if health.status == "ok" => Ok(()),
            _ => Err(RelayError::Degraded.into()),
        }
    }
}

impl SessionStore for HttpSessionStore {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(session_id).await })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await })
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(session, expected_revision).await })
    }

    fn insert_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_grant(grant).await })
    }

    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_grant(grant).await })
    }

    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_grant(id).await })
    }

    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_grants(couple_id).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.health_check().await })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.health_check().await })
    }
}

/// Bus transport over the relay's `/ws` endpoint.
///
/// Frames are demultiplexed through a local [`BusHub`]. The connection is
/// re-established with exponential backoff and every wanted topic is
/// subscribed again after each reconnect.
#[derive(Clone)]
pub struct WsTransport {
    hub: Arc<BusHub>,
    topics: Arc<DashSet<Topic>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    outbound: mpsc::UnboundedSender<BusClientMessage>,
}

impl WsTransport {
    /// Start connecting to `url` (e.g. `ws://localhost:8080/ws`).
    pub fn connect(url: impl Into<String>) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            hub: Arc::new(BusHub::new(DEFAULT_BUS_CAPACITY)),
            topics: Arc::new(DashSet::new()),
            status: Arc::new(status),
            outbound,
        };

        tokio::spawn(drive(
            url.into(),
            transport.hub.clone(),
            transport.topics.clone(),
            transport.status.clone(),
            outbound_rx,
        ));
        transport
    }
}

/// Drops the remote subscription once the last local stream of a topic ends.
struct SubscriptionGuard {
    topic: Topic,
    hub: Arc<BusHub>,
    topics: Arc<DashSet<Topic>>,
    outbound: mpsc::UnboundedSender<BusClientMessage>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.hub.receiver_count(&self.topic) > 0 {
            return;
        }
        self.hub.prune();
        if self.topics.remove(&self.topic).is_some() {
            let _ = self.outbound.send(BusClientMessage::Unsubscribe {
                topic: self.topic.clone(),
            });
        }
    }
}

impl Transport for WsTransport {
    fn subscribe(&self, topic: Topic) -> BoxStream<'static, BusFrame> {
        let guard = SubscriptionGuard {
            topic: topic.clone(),
            hub: self.hub.clone(),
            topics: self.topics.clone(),
            outbound: self.outbound.clone(),
        };
        let receiver = self.hub.subscribe(&topic);
        if self.topics.insert(topic.clone()) {
            let _ = self.outbound.send(BusClientMessage::Subscribe {
                topic: topic.clone(),
            });
        }

        stream! {
            let _guard = guard;
            let mut frames = BroadcastStream::new(receiver);
            while let Some(delivered) = frames.next().await {
                match delivered {
                    Ok(frame) => yield frame,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, "bus subscriber lagging; frames skipped");
                    }
                }
            }
        }
        .boxed()
    }

    fn publish(&self, frame: BusFrame) -> BoxFuture<'static, Result<(), TransportError>> {
        let status = *self.status.borrow();
        let result = if !status.is_connected() {
            Err(TransportError::NotConnected(status))
        } else {
            self.outbound
                .send(BusClientMessage::Publish { frame })
                .map_err(|_| TransportError::Closed)
        };
        Box::pin(ready(result))
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

/// Connection loop; ends once every [`WsTransport`] clone is gone.
async fn drive(
    url: String,
    hub: Arc<BusHub>,
    topics: Arc<DashSet<Topic>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    mut outbound: mpsc::UnboundedReceiver<BusClientMessage>,
) {
    let mut delay = INITIAL_DELAY;

    loop {
        status.send_replace(ConnectionStatus::Connecting);
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!(%url, "bus connected");
                delay = INITIAL_DELAY;
                let (mut sink, mut incoming) = socket.split();

                let wanted: Vec<Topic> = topics.iter().map(|topic| topic.key().clone()).collect();
                let mut healthy = true;
                for topic in wanted {
                    if send_client_message(&mut sink, &BusClientMessage::Subscribe { topic })
                        .await
                        .is_err()
                    {
                        healthy = false;
                        break;
                    }
                }
                if healthy {
                    status.send_replace(ConnectionStatus::Connected);
                }

                while healthy {
                    tokio::select! {
                        command = outbound.recv() => {
                            let Some(command) = command else {
                                let _ = sink.close().await;
                                status.send_replace(ConnectionStatus::Disconnected);
                                return;
                            };
                            if send_client_message(&mut sink, &command).await.is_err() {
                                break;
                            }
                        }
                        message = incoming.next() => match message {
                            Some(Ok(Message::Text(text))) => relay_server_message(&hub, text.as_str()),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "bus connection error");
                                break;
                            }
                        }
                    }
                }
                warn!(%url, "bus connection lost");
            }
            Err(err) => warn!(%url, error = %err, "bus connection attempt failed"),
        }

        status.send_replace(ConnectionStatus::Error);
        if outbound.is_closed() {
            status.send_replace(ConnectionStatus::Disconnected);
            return;
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

async fn send_client_message<S>(sink: &mut S, message: &BusClientMessage) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "failed to encode bus client message");
            return Ok(());
        }
    };
    sink.send(Message::text(text)).await.map_err(|_| ())
}

fn relay_server_message(hub: &BusHub, text: &str) {
    match serde_json::from_str::<BusServerMessage>(text) {
        Ok(BusServerMessage::Frame { frame }) => {
            hub.publish(frame);
        }
        Ok(BusServerMessage::Subscribed { topic }) => debug!(%topic, "bus subscription confirmed"),
        Ok(BusServerMessage::Unsubscribed { topic }) => debug!(%topic, "bus subscription dropped"),
        Ok(BusServerMessage::Error { message }) => warn!(%message, "relay reported a bus error"),
        Err(err) => warn!(error = %err, "undecodable relay message"),
    }
}
