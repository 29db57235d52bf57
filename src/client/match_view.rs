//! One open match on one client.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    client::{
        MatchContext,
        channel::ChannelHandle,
        fanout::GrantPublisher,
        inbox::{GrantInbox, Offer},
        poller::PollingReconciler,
        transport::Transport,
    },
    config::{AppConfig, GrantTexts, SyncSettings},
    dao::{
        models::{GrantEntity, SessionEntity},
        session_store::SessionStore,
        storage::StorageError,
    },
    dto::bus::BusMessage,
    services::{
        bootstrap::{BootstrapError, bootstrap},
        grant_service::grants_for_outcome,
        move_service::{MoveError, abandon_session, reset_session, submit_move},
        presence::{Notifier, PartnerEvent, Presence},
    },
    state::{
        grant::{Grant, GrantResponse, GrantTransitionError},
        optimistic::{LocalSession, Plan, Rollback},
        session::GameSession,
    },
};

/// Failure of a move, reset or abandon.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Rejected(#[from] MoveError),
    #[error("could not save the move; try again")]
    Write(#[source] StorageError),
    #[error("the game changed before the move was saved")]
    Stale,
    #[error("saving the move timed out; try again")]
    Timeout,
    #[error("the game view is closed")]
    Closed,
}

/// Failure of a grant response.
#[derive(Debug, Error)]
pub enum GrantError {
    #[error("grant {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Transition(#[from] GrantTransitionError),
    #[error("could not save the answer; try again")]
    Write(#[from] StorageError),
    #[error("saving the answer timed out; try again")]
    Timeout,
    #[error("the game view is closed")]
    Closed,
}

/// External collaborators of a match.
#[derive(Clone)]
pub struct MatchServices {
    /// Shared session store.
    pub store: Arc<dyn SessionStore>,
    /// Bus access.
    pub transport: Arc<dyn Transport>,
    /// Liveness of players.
    pub presence: Arc<dyn Presence>,
    /// Out-of-band notifications for an offline partner.
    pub notifier: Arc<dyn Notifier>,
}

struct Inner {
    ctx: MatchContext,
    store: Arc<dyn SessionStore>,
    presence: Arc<dyn Presence>,
    notifier: Arc<dyn Notifier>,
    publisher: GrantPublisher,
    sync: SyncSettings,
    texts: GrantTexts,
    local: Mutex<LocalSession>,
    state_tx: watch::Sender<GameSession>,
    inbox: Mutex<GrantInbox>,
    prompts_tx: mpsc::UnboundedSender<Grant>,
    history_tx: watch::Sender<IndexMap<Uuid, Grant>>,
    unissued: Mutex<Vec<GrantEntity>>,
    closed: AtomicBool,
}

/// A match as seen by one player.
///
/// Owns the two channel handles (game events, grant events), the polling
/// fallback and the presence heartbeat. Release everything with
/// [`MatchView::close`].
pub struct MatchView {
    inner: Arc<Inner>,
    game_channel: Option<ChannelHandle>,
    grant_channel: Option<ChannelHandle>,
    poller: Option<PollingReconciler>,
    heartbeat: Option<JoinHandle<()>>,
    prompts: mpsc::UnboundedReceiver<Grant>,
}

impl MatchView {
    /// Bootstrap the session row and start listening.
    pub async fn open(
        ctx: MatchContext,
        services: MatchServices,
        config: &AppConfig,
    ) -> Result<Self, BootstrapError> {
        let session = bootstrap(
            services.store.as_ref(),
            &ctx.session_key,
            ctx.me.id,
            ctx.partner.id,
        )
        .await?;
        info!(session_id = %ctx.session_key, me = %ctx.me.id, "match opened");

        let (state_tx, _) = watch::channel(session.clone());
        let (prompts_tx, prompts) = mpsc::unbounded_channel();
        let (history_tx, _) = watch::channel(IndexMap::new());
        let publisher = GrantPublisher::new(
            services.transport.clone(),
            vec![ctx.game_topic(), ctx.grants_topic(), ctx.couple_topic()],
        );

        let inner = Arc::new(Inner {
            inbox: Mutex::new(GrantInbox::new(ctx.me.id)),
            ctx,
            store: services.store.clone(),
            presence: services.presence.clone(),
            notifier: services.notifier.clone(),
            publisher,
            sync: config.sync(),
            texts: config.grant_texts().clone(),
            local: Mutex::new(LocalSession::new(session)),
            state_tx,
            prompts_tx,
            history_tx,
            unissued: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let transport = services.transport.as_ref();
        let game_channel = ChannelHandle::open(
            transport,
            "game",
            vec![inner.ctx.game_topic()],
            message_handler(inner.clone()),
        );
        let grant_channel = ChannelHandle::open(
            transport,
            "grants",
            vec![inner.ctx.grants_topic(), inner.ctx.couple_topic()],
            message_handler(inner.clone()),
        );

        let poll_target = inner.clone();
        let poller = PollingReconciler::spawn(
            inner.store.clone(),
            inner.ctx.session_key.clone(),
            services.transport.status(),
            inner.sync.poll_interval,
            move |row| {
                let inner = poll_target.clone();
                async move { inner.apply_remote_row(row).await }
            },
        );

        let heartbeat = spawn_heartbeat(
            inner.presence.clone(),
            inner.ctx.me.id,
            inner.sync.heartbeat_interval,
        );

        inner.catch_up().await;

        Ok(Self {
            inner,
            game_channel: Some(game_channel),
            grant_channel: Some(grant_channel),
            poller: Some(poller),
            heartbeat: Some(heartbeat),
            prompts,
        })
    }

    /// Match identity.
    pub fn context(&self) -> &MatchContext {
        &self.inner.ctx
    }

    /// Visible snapshot, optimistic moves included.
    pub fn snapshot(&self) -> GameSession {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch the visible snapshot.
    pub fn state(&self) -> watch::Receiver<GameSession> {
        self.inner.state_tx.subscribe()
    }

    /// Watch every grant of the couple, in arrival order.
    pub fn grant_history(&self) -> watch::Receiver<IndexMap<Uuid, Grant>> {
        self.inner.history_tx.subscribe()
    }

    /// Next grant that should open the response prompt.
    pub async fn next_prompt(&mut self) -> Option<Grant> {
        self.prompts.recv().await
    }

    /// Prompt already waiting, if any.
    pub fn try_next_prompt(&mut self) -> Option<Grant> {
        self.prompts.try_recv().ok()
    }

    /// Play `(row, col)` for the local player.
    ///
    /// A finishing move that commits but whose grants fail to store still
    /// succeeds; the grants wait in [`MatchView::unissued_grants`].
    pub async fn submit_move(&self, row: usize, col: usize) -> Result<GameSession, CommitError> {
        let me = self.inner.ctx.me.id;
        self.inner
            .commit(|basis| submit_move(basis, row, col, me))
            .await
    }

    /// Re-initialize the board of the same row; the local player opens.
    pub async fn reset(&self) -> Result<GameSession, CommitError> {
        let me = self.inner.ctx.me.id;
        self.inner.commit(|basis| reset_session(basis, me)).await
    }

    /// Leave the running game without a winner.
    pub async fn abandon(&self) -> Result<GameSession, CommitError> {
        let me = self.inner.ctx.me.id;
        self.inner.commit(|basis| abandon_session(basis, me)).await
    }

    /// Answer a grant addressed to the local player.
    pub async fn respond_to_grant(
        &self,
        grant_id: Uuid,
        response: GrantResponse,
        response_text: Option<String>,
    ) -> Result<Grant, GrantError> {
        self.inner
            .respond(grant_id, response, response_text)
            .await
    }

    /// Grants owed for a finished game that could not be stored yet.
    pub async fn unissued_grants(&self) -> Vec<Grant> {
        self.inner
            .unissued
            .lock()
            .await
            .iter()
            .cloned()
            .map(Grant::from)
            .collect()
    }

    /// Store and broadcast the grants a previous commit could not store.
    pub async fn retry_grants(&self) -> Result<(), GrantError> {
        if self.inner.is_closed() {
            return Err(GrantError::Closed);
        }
        self.inner.retry_grants().await
    }

    /// Release both channels and stop background work. A write still in
    /// flight completes but its result is discarded.
    pub fn close(mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(channel) = self.game_channel.take() {
            channel.close();
        }
        if let Some(channel) = self.grant_channel.take() {
            channel.close();
        }
        self.stop_background();
        info!(session_id = %self.inner.ctx.session_key, "match closed");
    }

    fn stop_background(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

impl Drop for MatchView {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.stop_background();
    }
}

fn message_handler(inner: Arc<Inner>) -> impl FnMut(BusMessage) -> BoxFuture<'static, ()> + Send {
    move |message| {
        let inner = inner.clone();
        Box::pin(async move { inner.on_message(message).await })
    }
}

fn spawn_heartbeat(
    presence: Arc<dyn Presence>,
    me: Uuid,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            presence.heartbeat(me).await;
        }
    })
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn on_message(&self, message: BusMessage) {
        if self.is_closed() {
            return;
        }
        match message {
            BusMessage::SessionChanged(row) => self.apply_remote_row(row).await,
            BusMessage::GrantChanged(row) | BusMessage::GrantCreated(row) => {
                self.receive_grant(row).await
            }
        }
    }

    /// Replace the visible snapshot with a remote row (last writer wins).
    async fn apply_remote_row(&self, row: SessionEntity) {
        if self.is_closed() || row.session_id != self.ctx.session_key {
            return;
        }
        let remote = match GameSession::try_from(row) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(session_id = %self.ctx.session_key, error = %err, "dropping invalid session row");
                return;
            }
        };

        let mut local = self.local.lock().await;
        if local.apply_remote(remote) {
            debug!(session_id = %self.ctx.session_key, moves = local.visible().move_count, "remote snapshot applied");
            self.state_tx.send_replace(local.visible().clone());
        }
    }

    async fn receive_grant(&self, row: GrantEntity) {
        if row.couple_id != self.ctx.couple_id {
            return;
        }
        let grant = Grant::from(row);

        self.history_tx.send_if_modified(|history| {
            let keep_known = history.get(&grant.id).is_some_and(|known| {
                known == &grant || (known.status.is_terminal() && !grant.status.is_terminal())
            });
            if keep_known {
                return false;
            }
            history.insert(grant.id, grant.clone());
            true
        });

        let offer = self.inbox.lock().await.offer(&grant);
        debug!(grant_id = %grant.id, ?offer, "grant arrival");
        if offer == Offer::Prompted {
            let _ = self.prompts_tx.send(grant);
        }
    }

    /// Re-read the row and load existing grants once the channels listen.
    async fn catch_up(&self) {
        match self.store.find_session(self.ctx.session_key.clone()).await {
            Ok(Some(row)) => self.apply_remote_row(row).await,
            Ok(None) => warn!(session_id = %self.ctx.session_key, "session row vanished after bootstrap"),
            Err(err) => warn!(error = %err, "initial session re-read failed"),
        }

        match self.store.list_grants(self.ctx.couple_id).await {
            Ok(rows) => {
                for row in rows {
                    self.receive_grant(row).await;
                }
            }
            Err(err) => warn!(error = %err, "failed to load existing grants"),
        }
    }

    /// Validate against the confirmed snapshot, show the result, write it,
    /// then confirm or roll back.
    async fn commit<F>(&self, compute: F) -> Result<GameSession, CommitError>
    where
        F: FnOnce(&GameSession) -> Result<GameSession, MoveError>,
    {
        if self.is_closed() {
            return Err(CommitError::Closed);
        }

        let plan = {
            let mut local = self.local.lock().await;
            let next = compute(local.basis())?;
            let plan = local
                .plan(next)
                .map_err(|_| CommitError::Rejected(MoveError::MoveInProgress))?;
            self.state_tx.send_replace(local.visible().clone());
            plan
        };

        let write = self.store.update_session(
            plan.planned.clone().into(),
            plan.before.revision,
        );
        let outcome = timeout(self.sync.write_timeout, write).await;

        if self.is_closed() {
            debug!(session_id = %self.ctx.session_key, "discarding write result after close");
            return Err(CommitError::Closed);
        }

        match outcome {
            Ok(Ok(())) => {
                if let Err(err) = self.local.lock().await.confirm(plan.id) {
                    warn!(error = %err, "confirmed write no longer pending");
                }
                self.after_commit(&plan.planned).await;
                Ok(plan.planned)
            }
            Ok(Err(err)) => {
                self.roll_back(&plan).await;
                if matches!(err, StorageError::Conflict { .. }) {
                    self.catch_up_session().await;
                    Err(CommitError::Stale)
                } else {
                    Err(CommitError::Write(err))
                }
            }
            Err(_) => {
                self.roll_back(&plan).await;
                Err(CommitError::Timeout)
            }
        }
    }

    async fn roll_back(&self, plan: &Plan) {
        let mut local = self.local.lock().await;
        match local.rollback(plan.id) {
            Ok(Rollback::Restored) => {
                warn!(session_id = %self.ctx.session_key, "write failed; optimistic move rolled back");
                self.state_tx.send_replace(local.visible().clone());
            }
            Ok(Rollback::Superseded) => {
                debug!(session_id = %self.ctx.session_key, "write failed; newer remote snapshot kept");
            }
            Err(err) => warn!(error = %err, "rollback found no matching pending write"),
        }
    }

    async fn catch_up_session(&self) {
        match self.store.find_session(self.ctx.session_key.clone()).await {
            Ok(Some(row)) => self.apply_remote_row(row).await,
            Ok(None) => {}
            Err(err) => warn!(error = %err, "re-read after conflict failed"),
        }
    }

    /// Partner notifications and, on a finished game, grant issuance.
    async fn after_commit(&self, session: &GameSession) {
        let partner = self.ctx.partner.id;
        let partner_online = self.presence.is_online(partner).await;

        if !partner_online {
            if session.is_terminal() {
                self.notify(PartnerEvent::GameFinished {
                    session_id: session.session_id.clone(),
                })
                .await;
            } else if session.current_player_id == partner {
                self.notify(PartnerEvent::YourTurn {
                    session_id: session.session_id.clone(),
                })
                .await;
            }
        }

        let grants = grants_for_outcome(
            session,
            self.ctx.couple_id,
            [&self.ctx.me, &self.ctx.partner],
            &self.texts,
        );
        for grant in grants {
            let row = GrantEntity::from(grant);
            if let Err(err) = self.issue_grant(&row, partner_online).await {
                warn!(grant_id = %row.id, error = %err, "failed to store grant; kept for retry");
                self.unissued.lock().await.push(row);
            }
        }
    }

    async fn retry_grants(&self) -> Result<(), GrantError> {
        let owed = std::mem::take(&mut *self.unissued.lock().await);
        if owed.is_empty() {
            return Ok(());
        }
        let partner_online = self.presence.is_online(self.ctx.partner.id).await;

        let mut last_err = None;
        for row in owed {
            if let Err(err) = self.issue_grant(&row, partner_online).await {
                warn!(grant_id = %row.id, error = %err, "grant retry failed");
                self.unissued.lock().await.push(row);
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(GrantError::Write(err)),
            None => Ok(()),
        }
    }

    /// Store one grant, then push it over every route. A row already stored
    /// by an earlier attempt counts as issued.
    async fn issue_grant(&self, row: &GrantEntity, partner_online: bool) -> Result<(), StorageError> {
        match self.store.insert_grant(row.clone()).await {
            Ok(()) => {}
            Err(StorageError::UniqueViolation { .. }) => {
                debug!(grant_id = %row.id, "grant already stored");
            }
            Err(err) => return Err(err),
        }

        let report = self.publisher.publish(row).await;
        if !report.reached_any() {
            warn!(grant_id = %row.id, "grant broadcast reached no route; relying on the row feed");
        }
        if row.winner_user_id == self.ctx.partner.id && !partner_online {
            self.notify(PartnerEvent::GrantReceived { grant_id: row.id })
                .await;
        }
        Ok(())
    }

    async fn notify(&self, event: PartnerEvent) {
        self.notifier
            .notify_partner(self.ctx.partner.id, event)
            .await;
    }

    async fn respond(
        &self,
        grant_id: Uuid,
        response: GrantResponse,
        response_text: Option<String>,
    ) -> Result<Grant, GrantError> {
        if self.is_closed() {
            return Err(GrantError::Closed);
        }

        let known = self.history_tx.borrow().get(&grant_id).cloned();
        let grant = match known {
            Some(grant) => grant,
            None => self
                .store
                .find_grant(grant_id)
                .await?
                .map(Grant::from)
                .ok_or(GrantError::NotFound(grant_id))?,
        };

        let answered = grant.respond(self.ctx.me.id, response, response_text)?;
        let write = self.store.update_grant(answered.clone().into());
        match timeout(self.sync.write_timeout, write).await {
            Ok(result) => result?,
            Err(_) => return Err(GrantError::Timeout),
        }

        info!(grant_id = %grant_id, status = ?answered.status, "grant answered");
        self.history_tx.send_modify(|history| {
            history.insert(answered.id, answered.clone());
        });
        Ok(answered)
    }
}
