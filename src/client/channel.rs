//! Owned bus subscriptions of a match view.

use std::future::Future;

use futures::{StreamExt, stream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    client::transport::Transport,
    dto::bus::BusMessage,
    state::bus::Topic,
};

/// A set of topic subscriptions feeding one handler. Release it with
/// [`ChannelHandle::close`]; dropping it also releases the subscriptions but
/// logs a warning.
#[derive(Debug)]
pub struct ChannelHandle {
    name: &'static str,
    topics: Vec<Topic>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Subscribe to `topics` and route every decoded message to `handler`.
    ///
    /// Frames that fail to decode are logged and dropped.
    pub fn open<H, Fut>(
        transport: &dyn Transport,
        name: &'static str,
        topics: Vec<Topic>,
        mut handler: H,
    ) -> Self
    where
        H: FnMut(BusMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut frames = stream::select_all(
            topics
                .iter()
                .map(|topic| transport.subscribe(topic.clone())),
        );

        let task = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                match BusMessage::decode(&frame) {
                    Ok(message) => handler(message).await,
                    Err(err) => {
                        warn!(channel = name, topic = %frame.topic, error = %err, "dropping undecodable frame");
                    }
                }
            }
            debug!(channel = name, "channel streams ended");
        });

        debug!(channel = name, topics = ?topics, "channel opened");
        Self {
            name,
            topics,
            task: Some(task),
        }
    }

    /// Topics this handle listens to.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Release the subscriptions.
    pub fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(channel = self.name, "channel closed");
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!(channel = self.name, "channel dropped without close; releasing it");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        client::transport::LocalTransport,
        dto::bus::BusFrame,
        state::bus::BusHub,
    };
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn close_releases_the_subscription() {
        let hub = Arc::new(BusHub::new(8));
        let transport = LocalTransport::new(hub.clone());
        let topic = Topic::Game("couple-42".into());
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = ChannelHandle::open(&transport, "game", vec![topic.clone()], move |message| {
            let _ = tx.send(message);
            async {}
        });
        assert_eq!(handle.topics(), &[topic.clone()]);

        handle.close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.prune();
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn undecodable_frames_do_not_stop_the_channel() {
        let hub = Arc::new(BusHub::new(8));
        let transport = LocalTransport::new(hub.clone());
        let topic = Topic::Game("couple-42".into());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = ChannelHandle::open(&transport, "game", vec![topic.clone()], move |message| {
            let _ = tx.send(message);
            async {}
        });

        hub.publish(BusFrame {
            topic: topic.clone(),
            event: "game_session_changed".into(),
            payload: json!({"board": "{oops"}),
        });
        hub.publish(BusFrame {
            topic,
            event: "typing".into(),
            payload: json!({}),
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
        handle.close();
    }
}
