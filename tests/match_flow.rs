use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, ready};
use tandem_grid::{
    client::{
        CommitError, MatchContext, MatchServices, MatchView,
        transport::{ConnectionStatus, LocalTransport},
    },
    config::{AppConfig, GrantTexts, SyncSettings},
    dao::{
        models::{GrantEntity, SessionEntity},
        session_store::{ChangeFeedStore, MemorySessionStore, SessionStore},
        storage::{StorageError, StorageResult},
    },
    services::{
        move_service::MoveError,
        presence::{Notifier, PartnerEvent, PresenceBoard},
    },
    state::{
        board::Mark,
        bus::BusHub,
        grant::{GrantResponse, GrantStatus},
        session::{GameSession, GameStatus, Participant, PlayerId},
    },
};
use tokio::{
    sync::{oneshot, watch},
    time::timeout,
};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(PlayerId, PartnerEvent)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(PlayerId, PartnerEvent)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_partner(&self, partner: PlayerId, event: PartnerEvent) -> BoxFuture<'static, ()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((partner, event));
        }
        Box::pin(async {})
    }
}

#[derive(Debug, thiserror::Error)]
#[error("grant inserts are down")]
struct GrantsDown;

/// Store wrapper that can refuse grant inserts and hold the next session
/// update until released.
struct ScriptedStore {
    inner: Arc<dyn SessionStore>,
    grants_down: AtomicBool,
    held_update: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ScriptedStore {
    fn new(inner: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            grants_down: AtomicBool::new(false),
            held_update: Mutex::new(None),
        })
    }

    fn set_grants_down(&self, down: bool) {
        self.grants_down.store(down, Ordering::SeqCst);
    }

    /// Hold the next `update_session` until the returned sender fires.
    fn hold_next_update(&self) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        if let Ok(mut slot) = self.held_update.lock() {
            *slot = Some(held);
        }
        release
    }
}

impl SessionStore for ScriptedStore {
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session(session_id)
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.insert_session(session)
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let held = self.held_update.lock().ok().and_then(|mut slot| slot.take());
        let write = self.inner.update_session(session, expected_revision);
        Box::pin(async move {
            if let Some(held) = held {
                let _ = held.await;
            }
            write.await
        })
    }

    fn insert_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        if self.grants_down.load(Ordering::SeqCst) {
            return Box::pin(ready(Err(StorageError::unavailable(
                "grant inserts are down".into(),
                GrantsDown,
            ))));
        }
        self.inner.insert_grant(grant)
    }

    fn update_grant(&self, grant: GrantEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.update_grant(grant)
    }

    fn find_grant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GrantEntity>>> {
        self.inner.find_grant(id)
    }

    fn list_grants(&self, couple_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GrantEntity>>> {
        self.inner.list_grants(couple_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

struct Rig {
    hub: Arc<BusHub>,
    memory: MemorySessionStore,
    store: Arc<dyn SessionStore>,
    presence: Arc<PresenceBoard>,
    notifier: Arc<RecordingNotifier>,
    config: AppConfig,
    key: String,
    couple: Uuid,
    alice: Participant,
    bob: Participant,
}

impl Rig {
    fn new() -> Self {
        let hub = Arc::new(BusHub::new(64));
        let memory = MemorySessionStore::new();
        let store: Arc<dyn SessionStore> =
            Arc::new(ChangeFeedStore::new(Arc::new(memory.clone()), hub.clone()));
        let sync = SyncSettings {
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(1),
            write_timeout: Duration::from_millis(500),
        };

        Self {
            hub,
            memory,
            store,
            presence: Arc::new(PresenceBoard::new(sync.heartbeat_interval)),
            notifier: Arc::new(RecordingNotifier::default()),
            config: AppConfig::new(sync, 64, GrantTexts::default()),
            key: format!("match-{}", Uuid::new_v4().simple()),
            couple: Uuid::new_v4(),
            alice: Participant::new(Uuid::new_v4(), "Alice"),
            bob: Participant::new(Uuid::new_v4(), "Bob"),
        }
    }

    fn context(&self, me: &Participant, partner: &Participant) -> MatchContext {
        MatchContext {
            session_key: self.key.clone(),
            couple_id: self.couple,
            me: me.clone(),
            partner: partner.clone(),
        }
    }

    async fn open_on(
        &self,
        me: &Participant,
        partner: &Participant,
        store: Arc<dyn SessionStore>,
        transport: Arc<LocalTransport>,
    ) -> MatchView {
        let services = MatchServices {
            store,
            transport,
            presence: self.presence.clone(),
            notifier: self.notifier.clone(),
        };
        MatchView::open(self.context(me, partner), services, &self.config)
            .await
            .expect("match opens")
    }

    async fn open_with(
        &self,
        me: &Participant,
        partner: &Participant,
        transport: Arc<LocalTransport>,
    ) -> MatchView {
        self.open_on(me, partner, self.store.clone(), transport).await
    }

    async fn open(&self, me: &Participant, partner: &Participant) -> MatchView {
        let transport = Arc::new(LocalTransport::new(self.hub.clone()));
        self.open_with(me, partner, transport).await
    }

    async fn open_scripted(
        &self,
        me: &Participant,
        partner: &Participant,
    ) -> (MatchView, Arc<ScriptedStore>) {
        let scripted = ScriptedStore::new(self.store.clone());
        let transport = Arc::new(LocalTransport::new(self.hub.clone()));
        let view = self
            .open_on(me, partner, scripted.clone(), transport)
            .await;
        (view, scripted)
    }
}

/// Alternate moves between `first` and `second`, `first` opening.
async fn play(first: &MatchView, second: &MatchView, script: &[(usize, usize)]) {
    for (index, &(row, col)) in script.iter().enumerate() {
        let moves = index as u32;
        let (mover, other) = if index % 2 == 0 {
            (first, second)
        } else {
            (second, first)
        };
        wait_for_moves(mover, moves).await;
        mover.submit_move(row, col).await.expect("legal move");
        wait_for_moves(other, moves + 1).await;
    }
}

async fn wait_for_moves(view: &MatchView, moves: u32) -> GameSession {
    let mut state: watch::Receiver<GameSession> = view.state();
    timeout(WAIT, state.wait_for(|session| session.move_count >= moves))
        .await
        .expect("snapshot propagated in time")
        .expect("state channel open")
        .clone()
}

#[tokio::test]
async fn concurrent_open_converges_on_one_row() {
    let rig = Rig::new();

    let (alice, bob) = tokio::join!(
        rig.open(&rig.alice, &rig.bob),
        rig.open(&rig.bob, &rig.alice)
    );

    let (a, b) = (alice.snapshot(), bob.snapshot());
    assert_eq!(a.id, b.id);
    assert_eq!(a.seats, b.seats);
    assert_eq!(a.current_player_id, a.seats.a);
    assert!(a.seats.contains(rig.alice.id) && a.seats.contains(rig.bob.id));

    alice.close();
    bob.close();
}

#[tokio::test]
async fn creator_takes_seat_a_and_moves_first() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;
    let bob = rig.open(&rig.bob, &rig.alice).await;

    let session = bob.snapshot();
    assert_eq!(session.seats.a, rig.alice.id);
    assert_eq!(session.seats.b, rig.bob.id);
    assert_eq!(session.current_player_id, rig.alice.id);

    alice.close();
    bob.close();
}

#[tokio::test]
async fn out_of_turn_move_leaves_state_untouched() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;
    let bob = rig.open(&rig.bob, &rig.alice).await;
    let before = bob.snapshot();

    let err = bob.submit_move(1, 1).await.expect_err("not bob's turn");
    assert!(matches!(err, CommitError::Rejected(MoveError::NotYourTurn)));
    assert_eq!(bob.snapshot(), before);

    let err = alice.submit_move(3, 0).await.expect_err("outside the grid");
    assert!(matches!(err, CommitError::Rejected(MoveError::OutOfBounds(_))));

    alice.submit_move(0, 0).await.expect("legal move");
    let before = wait_for_moves(&bob, 1).await;
    let err = bob.submit_move(0, 0).await.expect_err("cell taken");
    assert!(matches!(err, CommitError::Rejected(MoveError::CellOccupied)));
    assert_eq!(bob.snapshot(), before);

    let abandoned = alice.abandon().await.expect("abandon stored");
    assert_eq!(abandoned.status, GameStatus::Abandoned);
    let mut state = bob.state();
    let before = timeout(
        WAIT,
        state.wait_for(|session| session.status == GameStatus::Abandoned),
    )
    .await
    .expect("abandon propagated")
    .expect("state channel open")
    .clone();
    let err = bob.submit_move(1, 1).await.expect_err("game left");
    assert!(matches!(err, CommitError::Rejected(MoveError::GameEnded)));
    assert_eq!(bob.snapshot(), before);
    assert_eq!(before.move_count, 1);
    assert_eq!(before.current_player_id, rig.bob.id);

    alice.close();
    bob.close();
}

#[tokio::test]
async fn second_submit_while_saving_is_rejected() {
    let rig = Rig::new();
    let (alice, scripted) = rig.open_scripted(&rig.alice, &rig.bob).await;
    let release = scripted.hold_next_update();

    let second = async {
        let optimistic = wait_for_moves(&alice, 1).await;
        let err = alice.submit_move(1, 1).await.expect_err("first write pending");
        assert!(matches!(err, CommitError::Rejected(MoveError::MoveInProgress)));
        assert_eq!(alice.snapshot(), optimistic);
        let _ = release.send(());
    };
    let (first, ()) = tokio::join!(alice.submit_move(0, 0), second);

    let committed = first.expect("first write stored");
    assert_eq!(committed.move_count, 1);
    assert_eq!(committed.board.rows()[0][0], Mark::A);
    assert_eq!(alice.snapshot(), committed);

    alice.close();
}

#[tokio::test]
async fn grants_that_fail_to_store_wait_for_a_retry() {
    let rig = Rig::new();
    let (alice, scripted) = rig.open_scripted(&rig.alice, &rig.bob).await;
    let mut bob = rig.open(&rig.bob, &rig.alice).await;

    play(&alice, &bob, &[(0, 0), (1, 0), (0, 1), (1, 1)]).await;
    scripted.set_grants_down(true);
    let finished = alice.submit_move(0, 2).await.expect("winning move stored");
    assert_eq!(finished.status, GameStatus::Won);

    let owed = alice.unissued_grants().await;
    assert_eq!(owed.len(), 2);
    assert!(owed.iter().any(|grant| grant.recipient_id == rig.bob.id));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(bob.try_next_prompt().is_none(), "nothing stored yet");

    assert!(alice.retry_grants().await.is_err(), "store still refusing");
    assert_eq!(alice.unissued_grants().await.len(), 2);

    scripted.set_grants_down(false);
    alice.retry_grants().await.expect("grants stored");
    assert!(alice.unissued_grants().await.is_empty());

    let prompt = timeout(WAIT, bob.next_prompt())
        .await
        .expect("bob prompted")
        .expect("prompt channel open");
    let bob_grant = owed
        .iter()
        .find(|grant| grant.recipient_id == rig.bob.id)
        .expect("bob owed a grant");
    assert_eq!(prompt.id, bob_grant.id);

    alice.close();
    bob.close();
}

#[tokio::test]
async fn won_game_issues_one_prompt_per_player() {
    let rig = Rig::new();
    let mut alice = rig.open(&rig.alice, &rig.bob).await;
    let mut bob = rig.open(&rig.bob, &rig.alice).await;

    // Alice takes the top row while Bob fills the middle one.
    play(&alice, &bob, &[(0, 0), (1, 0), (0, 1), (1, 1), (0, 2)]).await;

    let final_state = bob.snapshot();
    assert_eq!(final_state.status, GameStatus::Won);
    assert_eq!(final_state.winner_id, Some(rig.alice.id));
    assert_eq!(final_state.move_count, 5);

    let bob_prompt = timeout(WAIT, bob.next_prompt())
        .await
        .expect("bob prompted")
        .expect("prompt channel open");
    assert_eq!(bob_prompt.recipient_id, rig.bob.id);
    assert_eq!(bob_prompt.recipient_symbol, Mark::B);
    assert_eq!(bob_prompt.request_text, GrantTexts::default().loser);

    let alice_prompt = timeout(WAIT, alice.next_prompt())
        .await
        .expect("alice prompted")
        .expect("prompt channel open");
    assert_eq!(alice_prompt.recipient_id, rig.alice.id);
    assert_eq!(alice_prompt.request_text, GrantTexts::default().winner);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(bob.try_next_prompt().is_none(), "duplicate deliveries prompt once");
    assert!(alice.try_next_prompt().is_none());

    let err = bob.submit_move(2, 2).await.expect_err("game over");
    assert!(matches!(err, CommitError::Rejected(MoveError::GameEnded)));
    assert_eq!(bob.snapshot(), final_state);

    alice.close();
    bob.close();
}

#[tokio::test]
async fn grant_answer_reaches_the_issuer() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;
    let mut bob = rig.open(&rig.bob, &rig.alice).await;

    for (index, (row, col)) in [(0, 0), (1, 0), (0, 1), (1, 1), (0, 2)]
        .into_iter()
        .enumerate()
    {
        let mover = if index % 2 == 0 { &alice } else { &bob };
        wait_for_moves(mover, index as u32).await;
        mover.submit_move(row, col).await.expect("legal move");
    }

    let grant = timeout(WAIT, bob.next_prompt())
        .await
        .expect("bob prompted")
        .expect("prompt channel open");
    let answered = bob
        .respond_to_grant(grant.id, GrantResponse::Accept, Some("deal".into()))
        .await
        .expect("answer stored");
    assert_eq!(answered.status, GrantStatus::Acknowledged);

    let mut history = alice.grant_history();
    let seen = timeout(
        WAIT,
        history.wait_for(|grants| {
            grants
                .get(&grant.id)
                .is_some_and(|known| known.status == GrantStatus::Acknowledged)
        }),
    )
    .await
    .expect("answer propagated")
    .expect("history channel open")
    .clone();
    assert_eq!(seen[&grant.id].response_text.as_deref(), Some("deal"));

    let again = bob
        .respond_to_grant(grant.id, GrantResponse::Decline, None)
        .await;
    assert!(again.is_err(), "a grant is answered once");

    alice.close();
    bob.close();
}

#[tokio::test]
async fn poller_catches_up_while_bus_is_down() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;
    let bob_transport = Arc::new(LocalTransport::new(rig.hub.clone()));
    let bob = rig
        .open_with(&rig.bob, &rig.alice, bob_transport.clone())
        .await;

    bob_transport.set_status(ConnectionStatus::Error);
    alice.submit_move(2, 2).await.expect("legal move");

    let seen = wait_for_moves(&bob, 1).await;
    assert_eq!(seen.board.rows()[2][2], Mark::A);
    assert_eq!(seen.current_player_id, rig.bob.id);

    alice.close();
    bob.close();
}

#[tokio::test]
async fn failed_write_rolls_back_the_optimistic_move() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;
    let before = alice.snapshot();

    rig.memory.set_available(false);
    let err = alice.submit_move(0, 0).await.expect_err("store offline");
    assert!(matches!(err, CommitError::Write(_)));
    assert_eq!(alice.snapshot(), before);

    rig.memory.set_available(true);
    let after = alice.submit_move(0, 0).await.expect("store back");
    assert_eq!(after.move_count, 1);

    alice.close();
}

#[tokio::test]
async fn stale_write_adopts_the_stored_row() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;

    // Another device of Alice's advanced the row behind this view's back.
    let stored = alice.snapshot();
    let elsewhere = tandem_grid::services::move_service::submit_move(&stored, 1, 1, rig.alice.id)
        .expect("legal move");
    SessionStore::update_session(&rig.memory, elsewhere.clone().into(), 0)
        .await
        .expect("direct write");

    let err = alice.submit_move(0, 0).await.expect_err("row moved on");
    assert!(matches!(err, CommitError::Stale));
    assert_eq!(alice.snapshot().board, elsewhere.board);

    alice.close();
}

#[tokio::test]
async fn offline_partner_is_notified_of_their_turn() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;

    alice.submit_move(0, 0).await.expect("legal move");

    let sent = rig.notifier.sent();
    assert_eq!(
        sent,
        vec![(
            rig.bob.id,
            PartnerEvent::YourTurn {
                session_id: rig.key.clone()
            }
        )]
    );

    alice.close();
}

#[tokio::test]
async fn close_releases_bus_subscriptions() {
    let rig = Rig::new();
    let alice = rig.open(&rig.alice, &rig.bob).await;
    assert!(rig.hub.topic_count() > 0);

    alice.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.hub.prune();
    assert_eq!(rig.hub.topic_count(), 0);
}
