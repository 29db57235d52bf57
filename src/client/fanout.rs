//! Single publisher pushing a new grant over every broadcast route.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    client::transport::{Transport, TransportError},
    dao::models::GrantEntity,
    dto::bus::BusMessage,
    state::bus::Topic,
};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Routes that accepted the frame.
    pub delivered: usize,
    /// Routes that failed.
    pub failed: usize,
}

impl FanoutReport {
    /// Whether at least one route carried the grant.
    pub fn reached_any(&self) -> bool {
        self.delivered > 0
    }
}

/// Publishes `love_grant_created` on the game topic, the dedicated grant topic
/// and the couple topic. A failing route never prevents the others.
#[derive(Clone)]
pub struct GrantPublisher {
    transport: Arc<dyn Transport>,
    routes: Vec<Topic>,
}

impl GrantPublisher {
    /// Publisher for one match.
    pub fn new(transport: Arc<dyn Transport>, routes: Vec<Topic>) -> Self {
        Self { transport, routes }
    }

    /// Push `grant` over every route.
    pub async fn publish(&self, grant: &GrantEntity) -> FanoutReport {
        let message = BusMessage::GrantCreated(grant.clone());
        let sends = self.routes.iter().map(|topic| {
            let topic = topic.clone();
            let encoded = message.encode(topic.clone());
            let transport = self.transport.clone();
            async move {
                let result = match encoded {
                    Ok(frame) => transport.publish(frame).await,
                    Err(err) => Err(TransportError::from(err)),
                };
                (topic, result)
            }
        });

        let mut report = FanoutReport::default();
        for (topic, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(%topic, grant_id = %grant.id, error = %err, "grant broadcast route failed");
                    report.failed += 1;
                }
            }
        }

        debug!(grant_id = %grant.id, delivered = report.delivered, failed = report.failed, "grant fan-out done");
        report
    }
}

#[cfg(test)]
mod tests {
    use futures::{
        StreamExt,
        future::{BoxFuture, ready},
        stream::BoxStream,
    };
    use tokio::sync::watch;
    use uuid::Uuid;

    use super::*;
    use crate::{
        client::transport::{ConnectionStatus, LocalTransport},
        dto::bus::BusFrame,
        state::{board::Mark, bus::BusHub, grant::Grant},
    };

    fn routes(couple: Uuid) -> Vec<Topic> {
        vec![
            Topic::Game("couple-42".into()),
            Topic::Grants("couple-42".into()),
            Topic::Couple(couple),
        ]
    }

    fn grant(couple: Uuid) -> GrantEntity {
        Grant::pending(couple, Uuid::new_v4(), Uuid::new_v4(), "Sam", Mark::B, "Dinner").into()
    }

    /// Transport whose `grants:` route always fails.
    struct FlakyGrantsRoute(LocalTransport);

    impl Transport for FlakyGrantsRoute {
        fn subscribe(&self, topic: Topic) -> BoxStream<'static, BusFrame> {
            self.0.subscribe(topic)
        }

        fn publish(&self, frame: BusFrame) -> BoxFuture<'static, Result<(), TransportError>> {
            if matches!(frame.topic, Topic::Grants(_)) {
                return Box::pin(ready(Err(TransportError::Closed)));
            }
            self.0.publish(frame)
        }

        fn status(&self) -> watch::Receiver<ConnectionStatus> {
            self.0.status()
        }
    }

    #[tokio::test]
    async fn every_route_carries_the_grant() {
        let couple = Uuid::new_v4();
        let transport = LocalTransport::new(Arc::new(BusHub::new(8)));
        let mut streams: Vec<_> = routes(couple)
            .into_iter()
            .map(|topic| transport.subscribe(topic))
            .collect();

        let publisher = GrantPublisher::new(Arc::new(transport), routes(couple));
        let grant = grant(couple);
        let report = publisher.publish(&grant).await;
        assert_eq!(report, FanoutReport { delivered: 3, failed: 0 });

        for stream in &mut streams {
            let frame = stream.next().await.unwrap();
            assert_eq!(
                BusMessage::decode(&frame).unwrap(),
                BusMessage::GrantCreated(grant.clone())
            );
        }
    }

    #[tokio::test]
    async fn one_failing_route_is_isolated() {
        let couple = Uuid::new_v4();
        let transport = FlakyGrantsRoute(LocalTransport::new(Arc::new(BusHub::new(8))));
        let publisher = GrantPublisher::new(Arc::new(transport), routes(couple));

        let report = publisher.publish(&grant(couple)).await;
        assert_eq!(report, FanoutReport { delivered: 2, failed: 1 });
        assert!(report.reached_any());
    }
}
