//! Optimistic view of one session: a planned snapshot is shown immediately and
//! either confirmed or rolled back once the durable write resolves.

use thiserror::Error;
use uuid::Uuid;

use crate::state::session::GameSession;

/// Unique identifier for a planned snapshot.
pub type PlanId = Uuid;

/// A snapshot applied locally but not yet committed.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Snapshot visible before the plan; restored on rollback.
    pub before: GameSession,
    /// Snapshot shown while the write is in flight.
    pub planned: GameSession,
}

/// Errors that can occur when planning a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A plan is already pending and must be confirmed or rolled back.
    #[error("a write is already pending")]
    AlreadyPending,
}

/// Errors that can occur when resolving a pending plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No plan is currently pending.
    #[error("no write is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("pending write {expected} does not match {got}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// What a rollback did to the visible snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// The pre-move snapshot is visible again.
    Restored,
    /// A newer remote snapshot had already replaced the planned one and stays.
    Superseded,
}

/// Locally visible session plus at most one pending plan.
#[derive(Debug, Clone)]
pub struct LocalSession {
    visible: GameSession,
    pending: Option<Plan>,
}

impl LocalSession {
    /// Start from a confirmed snapshot.
    pub fn new(session: GameSession) -> Self {
        Self {
            visible: session,
            pending: None,
        }
    }

    /// Snapshot currently shown to the user.
    pub fn visible(&self) -> &GameSession {
        &self.visible
    }

    /// Snapshot moves are validated against: the pre-move snapshot while a
    /// plan is pending, the visible one otherwise.
    pub fn basis(&self) -> &GameSession {
        self.pending
            .as_ref()
            .map(|plan| &plan.before)
            .unwrap_or(&self.visible)
    }

    /// Whether a write is in flight.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Show `next` immediately, remembering the current snapshot for rollback.
    pub fn plan(&mut self, next: GameSession) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let plan = Plan {
            id: Uuid::new_v4(),
            before: self.visible.clone(),
            planned: next.clone(),
        };
        self.visible = next;
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// The write committed: keep what is visible and forget the pre-move snapshot.
    pub fn confirm(&mut self, plan_id: PlanId) -> Result<(), ResolveError> {
        self.take_pending(plan_id)?;
        Ok(())
    }

    /// The write failed: restore the pre-move snapshot unless a remote
    /// snapshot already replaced the planned one.
    pub fn rollback(&mut self, plan_id: PlanId) -> Result<Rollback, ResolveError> {
        let plan = self.take_pending(plan_id)?;
        if self.visible == plan.planned {
            self.visible = plan.before;
            Ok(Rollback::Restored)
        } else {
            Ok(Rollback::Superseded)
        }
    }

    /// Replace the visible snapshot wholesale with a remote one.
    ///
    /// Returns whether anything changed. While a plan is pending, a snapshot
    /// equal to the pre-move one is the stale pre-image and is ignored.
    pub fn apply_remote(&mut self, remote: GameSession) -> bool {
        if let Some(plan) = &self.pending
            && plan.before == remote
        {
            return false;
        }
        if self.visible == remote {
            return false;
        }
        self.visible = remote;
        true
    }

    fn take_pending(&mut self, plan_id: PlanId) -> Result<Plan, ResolveError> {
        let plan = self.pending.take().ok_or(ResolveError::NoPending)?;
        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ResolveError::IdMismatch {
                expected,
                got: plan_id,
            });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        board::{Mark, Position},
        session::Seats,
    };

    fn fresh() -> GameSession {
        let seats = Seats {
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        };
        GameSession::new("couple-1", seats, seats.a)
    }

    fn with_move(session: &GameSession, row: usize, col: usize, mark: Mark) -> GameSession {
        let mut next = session.clone();
        next.board = next.board.with_mark(Position::new(row, col).unwrap(), mark);
        next.move_count += 1;
        next
    }

    #[test]
    fn rollback_round_trips_to_identity() {
        let start = fresh();
        let mut local = LocalSession::new(start.clone());
        let plan = local.plan(with_move(&start, 0, 0, Mark::A)).unwrap();
        assert_ne!(local.visible(), &start);
        assert_eq!(local.basis(), &start);

        assert_eq!(local.rollback(plan.id), Ok(Rollback::Restored));
        assert_eq!(local.visible(), &start);
        assert!(!local.is_pending());
    }

    #[test]
    fn second_plan_is_rejected_while_pending() {
        let start = fresh();
        let mut local = LocalSession::new(start.clone());
        let plan = local.plan(with_move(&start, 0, 0, Mark::A)).unwrap();
        assert_eq!(
            local.plan(with_move(&start, 1, 1, Mark::A)).unwrap_err(),
            PlanError::AlreadyPending
        );

        local.confirm(plan.id).unwrap();
        assert_eq!(local.basis(), &with_move(&start, 0, 0, Mark::A));
    }

    #[test]
    fn newer_remote_snapshot_wins_over_rollback() {
        let start = fresh();
        let mut local = LocalSession::new(start.clone());
        let plan = local.plan(with_move(&start, 0, 0, Mark::A)).unwrap();

        let remote = with_move(&start, 2, 2, Mark::A);
        assert!(local.apply_remote(remote.clone()));
        assert_eq!(local.rollback(plan.id), Ok(Rollback::Superseded));
        assert_eq!(local.visible(), &remote);
    }

    #[test]
    fn stale_pre_image_is_ignored_while_pending() {
        let start = fresh();
        let mut local = LocalSession::new(start.clone());
        let planned = with_move(&start, 0, 0, Mark::A);
        local.plan(planned.clone()).unwrap();

        assert!(!local.apply_remote(start));
        assert_eq!(local.visible(), &planned);
    }

    #[test]
    fn resolving_unknown_plan_keeps_pending() {
        let start = fresh();
        let mut local = LocalSession::new(start.clone());
        let plan = local.plan(with_move(&start, 0, 0, Mark::A)).unwrap();

        let other = Uuid::new_v4();
        assert_eq!(
            local.confirm(other),
            Err(ResolveError::IdMismatch {
                expected: plan.id,
                got: other
            })
        );
        assert!(local.is_pending());
    }
}
