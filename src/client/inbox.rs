//! Exactly-once prompting of grants that arrive over several paths.

use std::collections::HashSet;

use uuid::Uuid;

use crate::state::{
    grant::{Grant, GrantStatus},
    session::PlayerId,
};

/// What happened to one grant arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// First pending arrival for this grant: open the response prompt.
    Prompted,
    /// This grant id was already seen.
    Duplicate,
    /// Addressed to someone else.
    NotForMe,
    /// First arrival, but the grant is already answered.
    NotPending,
}

/// Deduplicates grant arrivals by grant id, whatever path carried them.
#[derive(Debug)]
pub struct GrantInbox {
    me: PlayerId,
    seen: HashSet<Uuid>,
}

impl GrantInbox {
    /// Inbox of `me`.
    pub fn new(me: PlayerId) -> Self {
        Self {
            me,
            seen: HashSet::new(),
        }
    }

    /// Register an arrival. Any arrival addressed to us marks the id as seen,
    /// so a stale pending copy landing after the answer never prompts.
    pub fn offer(&mut self, grant: &Grant) -> Offer {
        if grant.recipient_id != self.me {
            return Offer::NotForMe;
        }
        if !self.seen.insert(grant.id) {
            return Offer::Duplicate;
        }
        if grant.status != GrantStatus::Pending {
            return Offer::NotPending;
        }
        Offer::Prompted
    }
}
