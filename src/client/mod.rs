//! Client core of a match: bootstrap, optimistic moves, propagation, polling
//! fallback and the grant exchange.

pub mod channel;
pub mod fanout;
pub mod inbox;
pub mod match_view;
pub mod poller;
#[cfg(feature = "ws-client")]
pub mod remote;
pub mod transport;

use uuid::Uuid;

use crate::state::{bus::Topic, session::Participant};

pub use match_view::{CommitError, GrantError, MatchServices, MatchView};

/// Who plays which match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchContext {
    /// External session key shared by both clients.
    pub session_key: String,
    /// Couple the grants belong to.
    pub couple_id: Uuid,
    /// The local player.
    pub me: Participant,
    /// The partner.
    pub partner: Participant,
}

impl MatchContext {
    /// `game:<sessionKey>`: row changes and ad-hoc game broadcasts.
    pub fn game_topic(&self) -> Topic {
        Topic::Game(self.session_key.clone())
    }

    /// `grants:<sessionKey>`: dedicated grant broadcasts.
    pub fn grants_topic(&self) -> Topic {
        Topic::Grants(self.session_key.clone())
    }

    /// `couple:<coupleId>`: grant row changes and couple broadcasts.
    pub fn couple_topic(&self) -> Topic {
        Topic::Couple(self.couple_id)
    }
}
