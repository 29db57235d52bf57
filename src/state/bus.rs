use std::{fmt, str::FromStr};

use dashmap::DashMap;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::dto::{bus::BusFrame, validation::validate_session_key};

/// Default capacity of every per-topic broadcast channel.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Address of a bus channel, rendered as `game:<key>`, `grants:<key>` or
/// `couple:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum Topic {
    /// Session row changes and ad-hoc game broadcasts.
    Game(String),
    /// Dedicated grant broadcasts for a session.
    Grants(String),
    /// Grant row changes and generic broadcasts for a couple.
    Couple(Uuid),
}

/// Topic string that does not match any known shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid topic `{0}`")]
pub struct InvalidTopic(pub String);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Game(key) => write!(f, "game:{key}"),
            Topic::Grants(key) => write!(f, "grants:{key}"),
            Topic::Couple(id) => write!(f, "couple:{id}"),
        }
    }
}

impl FromStr for Topic {
    type Err = InvalidTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTopic(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "game" | "grants" => {
                validate_session_key(rest).map_err(|_| invalid())?;
                Ok(if kind == "game" {
                    Topic::Game(rest.to_string())
                } else {
                    Topic::Grants(rest.to_string())
                })
            }
            "couple" => Uuid::parse_str(rest).map(Topic::Couple).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// In-process fan-out of bus frames, one broadcast channel per topic.
pub struct BusHub {
    topics: DashMap<Topic, broadcast::Sender<BusFrame>>,
    capacity: usize,
}

impl BusHub {
    /// Create a hub whose channels buffer up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber on `topic`, creating the channel on first use.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<BusFrame> {
        self.topics
            .entry(topic.clone())
            .or_insert_with(|| {
                debug!(%topic, "opening bus topic");
                broadcast::channel(self.capacity).0
            })
            .subscribe()
    }

    /// Deliver a frame to the current subscribers of its topic, returning how
    /// many received it.
    pub fn publish(&self, frame: BusFrame) -> usize {
        let Some(sender) = self.topics.get(&frame.topic).map(|entry| entry.clone()) else {
            trace!(topic = %frame.topic, "no subscribers for frame");
            return 0;
        };
        sender.send(frame).unwrap_or(0)
    }

    /// Drop channels nobody listens to anymore.
    pub fn prune(&self) {
        self.topics.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Live receivers on `topic`.
    pub fn receiver_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Number of open topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for BusHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
