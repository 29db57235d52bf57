//! Client side of the propagation bus.

use std::sync::Arc;

use futures::{
    StreamExt,
    future::{BoxFuture, ready},
    stream::BoxStream,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, warn};

use crate::{
    dto::bus::BusFrame,
    state::bus::{BusHub, Topic},
};

/// Connection state of a bus transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// First connection (or a reconnect) in progress.
    Connecting,
    /// Frames flow.
    Connected,
    /// The last attempt failed; a retry is scheduled.
    Error,
    /// The transport was shut down.
    Disconnected,
}

impl ConnectionStatus {
    /// Whether frames currently flow.
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// Failure to hand a frame to the bus.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bus is not connected ({0:?})")]
    NotConnected(ConnectionStatus),
    #[error("bus connection closed")]
    Closed,
    #[error("failed to encode bus frame")]
    Encode(#[from] serde_json::Error),
}

/// Publish/subscribe access to the bus.
///
/// `subscribe` registers the subscription before returning, so no frame
/// published afterwards is missed while the stream is not yet polled.
pub trait Transport: Send + Sync {
    fn subscribe(&self, topic: Topic) -> BoxStream<'static, BusFrame>;
    fn publish(&self, frame: BusFrame) -> BoxFuture<'static, Result<(), TransportError>>;
    fn status(&self) -> watch::Receiver<ConnectionStatus>;
}

/// Transport over an in-process [`BusHub`]. Its status can be forced to
/// simulate outages: while not connected, frames are dropped and publishes fail.
#[derive(Clone)]
pub struct LocalTransport {
    hub: Arc<BusHub>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl LocalTransport {
    /// Connected transport over `hub`.
    pub fn new(hub: Arc<BusHub>) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::Connected);
        Self {
            hub,
            status: Arc::new(status),
        }
    }

    /// Force the reported status.
    pub fn set_status(&self, status: ConnectionStatus) {
        debug!(?status, "local transport status forced");
        self.status.send_replace(status);
    }
}

impl Transport for LocalTransport {
    fn subscribe(&self, topic: Topic) -> BoxStream<'static, BusFrame> {
        let status = self.status.subscribe();
        BroadcastStream::new(self.hub.subscribe(&topic))
            .filter_map(move |delivered| {
                let frame = match delivered {
                    Ok(frame) if status.borrow().is_connected() => Some(frame),
                    Ok(frame) => {
                        debug!(topic = %frame.topic, "transport down; frame dropped");
                        None
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, "subscriber lagging; frames skipped");
                        None
                    }
                };
                ready(frame)
            })
            .boxed()
    }

    fn publish(&self, frame: BusFrame) -> BoxFuture<'static, Result<(), TransportError>> {
        let status = *self.status.borrow();
        let result = if status.is_connected() {
            self.hub.publish(frame);
            Ok(())
        } else {
            Err(TransportError::NotConnected(status))
        };
        Box::pin(ready(result))
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(topic: &Topic) -> BusFrame {
        BusFrame {
            topic: topic.clone(),
            event: "love_grant_created".into(),
            payload: json!({}),
        }
    }

    #[test]
    fn encode_failures_become_transport_errors() {
        let err = serde_json::from_str::<BusFrame>("not json").unwrap_err();
        let err = TransportError::from(err);
        assert!(matches!(err, TransportError::Encode(_)));
        assert_eq!(err.to_string(), "failed to encode bus frame");
    }

    #[tokio::test]
    async fn frames_flow_only_while_connected() {
        let transport = LocalTransport::new(Arc::new(BusHub::new(8)));
        let topic = Topic::Grants("couple-42".into());
        let mut stream = transport.subscribe(topic.clone());

        transport.set_status(ConnectionStatus::Error);
        assert!(matches!(
            transport.publish(frame(&topic)).await,
            Err(TransportError::NotConnected(ConnectionStatus::Error))
        ));

        transport.set_status(ConnectionStatus::Connected);
        transport.publish(frame(&topic)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().topic, topic);
    }

    #[tokio::test]
    async fn frames_published_during_outage_are_lost() {
        let hub = Arc::new(BusHub::new(8));
        let transport = LocalTransport::new(hub.clone());
        let topic = Topic::Game("couple-42".into());
        let mut stream = transport.subscribe(topic.clone());

        transport.set_status(ConnectionStatus::Disconnected);
        hub.publish(frame(&topic));
        let idle = tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
        assert!(idle.is_err());

        transport.set_status(ConnectionStatus::Connected);
        let mut marker = frame(&topic);
        marker.event = "game_session_changed".into();
        hub.publish(marker);

        assert_eq!(stream.next().await.unwrap().event, "game_session_changed");
    }
}
