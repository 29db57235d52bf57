//! Wire shapes of the propagation bus: raw frames, the typed message union
//! decoded from them, and the relay WebSocket protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    dao::models::{GrantEntity, SessionEntity},
    state::bus::Topic,
};

/// Event name of a session row-change notification.
pub const SESSION_CHANGED_EVENT: &str = "game_session_changed";
/// Event name of a grant row-change notification.
pub const GRANT_CHANGED_EVENT: &str = "love_grant_changed";
/// Event name of the ad-hoc grant broadcast.
pub const GRANT_CREATED_EVENT: &str = "love_grant_created";

/// Raw frame as carried by every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BusFrame {
    /// Destination topic.
    #[schema(value_type = String, example = "game:couple-42")]
    pub topic: Topic,
    /// Event name.
    pub event: String,
    /// Event payload, a full row.
    #[schema(value_type = Object)]
    pub payload: Value,
}

/// Closed set of messages travelling on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// A session row was inserted or updated.
    SessionChanged(SessionEntity),
    /// A grant row was inserted or updated.
    GrantChanged(GrantEntity),
    /// A grant was just issued and is being pushed to its recipient.
    GrantCreated(GrantEntity),
}

/// Frame that could not be turned into a [`BusMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown bus event `{0}`")]
    UnknownEvent(String),
    #[error("malformed payload for `{event}`")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl BusMessage {
    /// Wire event name of this message.
    pub fn event(&self) -> &'static str {
        match self {
            BusMessage::SessionChanged(_) => SESSION_CHANGED_EVENT,
            BusMessage::GrantChanged(_) => GRANT_CHANGED_EVENT,
            BusMessage::GrantCreated(_) => GRANT_CREATED_EVENT,
        }
    }

    /// Single typed decode step applied to every incoming frame.
    ///
    /// Session rows accept the board either JSON-encoded or structured, so
    /// every consumer downstream sees the canonical board type.
    pub fn decode(frame: &BusFrame) -> Result<Self, DecodeError> {
        let payload_error = |source| DecodeError::Payload {
            event: frame.event.clone(),
            source,
        };

        match frame.event.as_str() {
            SESSION_CHANGED_EVENT => serde_json::from_value(frame.payload.clone())
                .map(BusMessage::SessionChanged)
                .map_err(payload_error),
            GRANT_CHANGED_EVENT => serde_json::from_value(frame.payload.clone())
                .map(BusMessage::GrantChanged)
                .map_err(payload_error),
            GRANT_CREATED_EVENT => serde_json::from_value(frame.payload.clone())
                .map(BusMessage::GrantCreated)
                .map_err(payload_error),
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }

    /// Encode the message as a frame addressed to `topic`.
    pub fn encode(&self, topic: Topic) -> Result<BusFrame, serde_json::Error> {
        let payload = match self {
            BusMessage::SessionChanged(session) => serde_json::to_value(session)?,
            BusMessage::GrantChanged(grant) | BusMessage::GrantCreated(grant) => {
                serde_json::to_value(grant)?
            }
        };

        Ok(BusFrame {
            topic,
            event: self.event().to_string(),
            payload,
        })
    }
}

/// Messages accepted from bus WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusClientMessage {
    Subscribe {
        #[schema(value_type = String)]
        topic: Topic,
    },
    Unsubscribe {
        #[schema(value_type = String)]
        topic: Topic,
    },
    Publish {
        frame: BusFrame,
    },
    #[serde(other)]
    Unknown,
}

/// Messages sent by the relay to bus WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusServerMessage {
    Subscribed {
        #[schema(value_type = String)]
        topic: Topic,
    },
    Unsubscribed {
        #[schema(value_type = String)]
        topic: Topic,
    },
    Frame {
        frame: BusFrame,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        board::{Board, Mark, Position},
        session::{GameSession, Seats},
    };
    use serde_json::json;
    use uuid::Uuid;

    fn session_row() -> SessionEntity {
        let seats = Seats {
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        };
        let mut session = GameSession::new("couple-42", seats, seats.b);
        session.board = Board::empty().with_mark(Position::new(0, 0).unwrap(), Mark::A);
        session.move_count = 1;
        session.into()
    }

    #[test]
    fn session_change_survives_the_wire() {
        let row = session_row();
        let topic = Topic::Game("couple-42".into());
        let frame = BusMessage::SessionChanged(row.clone()).encode(topic).unwrap();
        assert_eq!(frame.event, SESSION_CHANGED_EVENT);

        let text = serde_json::to_string(&frame).unwrap();
        let back: BusFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(
            BusMessage::decode(&back).unwrap(),
            BusMessage::SessionChanged(row)
        );
    }

    #[test]
    fn structured_board_payload_is_normalized() {
        let row = session_row();
        let mut payload = serde_json::to_value(&row).unwrap();
        payload["board"] = json!([["A", null, null], [null, null, null], [null, null, null]]);

        let frame = BusFrame {
            topic: Topic::Game("couple-42".into()),
            event: SESSION_CHANGED_EVENT.into(),
            payload,
        };
        assert_eq!(
            BusMessage::decode(&frame).unwrap(),
            BusMessage::SessionChanged(row)
        );
    }

    #[test]
    fn unknown_event_and_bad_payload_are_rejected() {
        let unknown = BusFrame {
            topic: Topic::Game("couple-42".into()),
            event: "typing".into(),
            payload: json!({}),
        };
        assert!(matches!(
            BusMessage::decode(&unknown),
            Err(DecodeError::UnknownEvent(event)) if event == "typing"
        ));

        let mut payload = serde_json::to_value(session_row()).unwrap();
        payload["board"] = json!("{not json");
        let broken = BusFrame {
            topic: Topic::Game("couple-42".into()),
            event: SESSION_CHANGED_EVENT.into(),
            payload,
        };
        assert!(matches!(
            BusMessage::decode(&broken),
            Err(DecodeError::Payload { .. })
        ));
    }

    #[test]
    fn client_messages_use_snake_case_tags() {
        let parsed: BusClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topic":"grants:couple-42"}"#).unwrap();
        assert!(matches!(
            parsed,
            BusClientMessage::Subscribe { topic: Topic::Grants(key) } if key == "couple-42"
        ));

        let unknown: BusClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(unknown, BusClientMessage::Unknown));
    }
}
