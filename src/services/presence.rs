//! Presence and partner-notification collaborators consumed by the match core.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::state::session::PlayerId;

/// Something worth telling a partner who is not looking at the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartnerEvent {
    /// A move was committed and the partner is up next.
    YourTurn {
        /// Session key of the match.
        session_id: String,
    },
    /// The game reached a terminal state.
    GameFinished {
        /// Session key of the match.
        session_id: String,
    },
    /// A grant addressed to the partner was issued.
    GrantReceived {
        /// Identifier of the grant.
        grant_id: Uuid,
    },
}

/// Liveness signal of players.
pub trait Presence: Send + Sync {
    /// Announce that `player` is alive.
    fn heartbeat(&self, player: PlayerId) -> BoxFuture<'static, ()>;
    /// Whether `player` announced themselves recently enough.
    fn is_online(&self, player: PlayerId) -> BoxFuture<'static, bool>;
}

/// Delivery of out-of-band notifications (push, mail...).
pub trait Notifier: Send + Sync {
    /// Tell `partner` about `event`.
    fn notify_partner(&self, partner: PlayerId, event: PartnerEvent) -> BoxFuture<'static, ()>;
}

/// In-process presence table: a player is online when a heartbeat was seen
/// within twice the heartbeat interval.
#[derive(Debug)]
pub struct PresenceBoard {
    last_seen: DashMap<PlayerId, Instant>,
    ttl: Duration,
}

impl PresenceBoard {
    /// Board for clients re-announcing every `heartbeat_interval`.
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            last_seen: DashMap::new(),
            ttl: heartbeat_interval * 2,
        }
    }

    /// Record a heartbeat for `player`.
    pub fn touch(&self, player: PlayerId) {
        self.last_seen.insert(player, Instant::now());
    }

    /// Whether `player` is currently considered online.
    pub fn online(&self, player: PlayerId) -> bool {
        self.last_seen
            .get(&player)
            .is_some_and(|seen| seen.elapsed() <= self.ttl)
    }

    /// Forget players whose heartbeat expired.
    pub fn expire(&self) {
        let ttl = self.ttl;
        self.last_seen.retain(|_, seen| seen.elapsed() <= ttl);
    }
}

impl Presence for PresenceBoard {
    fn heartbeat(&self, player: PlayerId) -> BoxFuture<'static, ()> {
        self.touch(player);
        Box::pin(async {})
    }

    fn is_online(&self, player: PlayerId) -> BoxFuture<'static, bool> {
        let online = self.online(player);
        Box::pin(async move { online })
    }
}

/// Notifier that only writes a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_partner(&self, partner: PlayerId, event: PartnerEvent) -> BoxFuture<'static, ()> {
        info!(%partner, event = ?event, "notifying offline partner");
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_marks_player_online() {
        let board = PresenceBoard::new(Duration::from_secs(30));
        let player = Uuid::new_v4();
        assert!(!board.is_online(player).await);

        board.heartbeat(player).await;
        assert!(board.is_online(player).await);
        assert!(!board.is_online(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn stale_heartbeat_expires() {
        let board = PresenceBoard::new(Duration::from_millis(5));
        let player = Uuid::new_v4();
        board.touch(player);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!board.online(player));
        board.expire();
        assert!(board.last_seen.is_empty());
    }

    #[test]
    fn partner_events_are_tagged() {
        let event = PartnerEvent::YourTurn {
            session_id: "couple-42".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"kind": "your_turn", "session_id": "couple-42"})
        );
    }
}
