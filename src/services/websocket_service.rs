use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::{
    StreamMap,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::bus::{BusClientMessage, BusFrame, BusServerMessage},
    state::{SharedState, bus::Topic},
};

/// Handle the full lifecycle of one bus WebSocket connection: topic
/// subscriptions, relayed publishes and frame delivery.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    info!(%connection_id, "bus client connected");
    let mut subscriptions: StreamMap<Topic, BroadcastStream<BusFrame>> = StreamMap::new();

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(message) = inbound else { break };
                match message {
                    Ok(Message::Text(text)) => {
                        if handle_client_text(&state, &text, &mut subscriptions, &outbound_tx).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = outbound_tx.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(frame)) => {
                        let _ = outbound_tx.send(Message::Close(frame));
                        break;
                    }
                    Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
                    Err(err) => {
                        warn!(%connection_id, error = %err, "websocket error");
                        break;
                    }
                }
            }
            Some((topic, delivered)) = subscriptions.next(), if !subscriptions.is_empty() => {
                match delivered {
                    Ok(frame) => {
                        if send_message_to_websocket(&outbound_tx, &BusServerMessage::Frame { frame }).is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%connection_id, %topic, skipped, "bus client lagging; frames skipped");
                    }
                }
            }
        }
    }

    let topics = subscriptions.len();
    drop(subscriptions);
    if topics > 0 {
        state.bus().prune();
    }
    info!(%connection_id, topics, "bus client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Apply one client message. `Err` means the writer is gone.
fn handle_client_text(
    state: &SharedState,
    text: &str,
    subscriptions: &mut StreamMap<Topic, BroadcastStream<BusFrame>>,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), WriterClosed> {
    let message = match serde_json::from_str::<BusClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "failed to parse bus client message");
            return send_message_to_websocket(
                outbound_tx,
                &BusServerMessage::Error {
                    message: format!("malformed message: {err}"),
                },
            );
        }
    };

    match message {
        BusClientMessage::Subscribe { topic } => {
            if !subscriptions.contains_key(&topic) {
                let receiver = state.bus().subscribe(&topic);
                subscriptions.insert(topic.clone(), BroadcastStream::new(receiver));
                debug!(%topic, "bus client subscribed");
            }
            send_message_to_websocket(outbound_tx, &BusServerMessage::Subscribed { topic })
        }
        BusClientMessage::Unsubscribe { topic } => {
            if subscriptions.remove(&topic).is_some() {
                state.bus().prune();
                debug!(%topic, "bus client unsubscribed");
            }
            send_message_to_websocket(outbound_tx, &BusServerMessage::Unsubscribed { topic })
        }
        BusClientMessage::Publish { frame } => {
            let delivered = state.bus().publish(frame.clone());
            debug!(topic = %frame.topic, event = %frame.event, delivered, "relayed bus frame");
            Ok(())
        }
        BusClientMessage::Unknown => send_message_to_websocket(
            outbound_tx,
            &BusServerMessage::Error {
                message: "unsupported message type".into(),
            },
        ),
    }
}

#[derive(Debug)]
struct WriterClosed;

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// A serialization failure is logged and swallowed; only a closed writer is
/// reported.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), WriterClosed>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| WriterClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
