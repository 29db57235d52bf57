pub mod board;
pub mod bus;
pub mod grant;
pub mod optimistic;
pub mod session;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::session_store::{ChangeFeedStore, SessionStore},
    error::ServiceError,
    services::presence::PresenceBoard,
    state::bus::BusHub,
};

pub type SharedState = Arc<AppState>;

/// Relay state: the installed store, the bus hub, and the presence table.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    bus: Arc<BusHub>,
    presence: Arc<PresenceBoard>,
    degraded: watch::Sender<bool>,
    config: Arc<AppConfig>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The relay starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            bus: Arc::new(BusHub::new(config.bus_capacity())),
            presence: Arc::new(PresenceBoard::new(config.sync().heartbeat_interval)),
            degraded: degraded_tx,
            config: Arc::new(config),
        })
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install `store` behind the change feed and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        let feed: Arc<dyn SessionStore> = Arc::new(ChangeFeedStore::new(store, self.bus.clone()));
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(feed);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Bus hub shared by WebSocket sessions and the change feed.
    pub fn bus(&self) -> &Arc<BusHub> {
        &self.bus
    }

    /// Presence table fed by heartbeats.
    pub fn presence(&self) -> &Arc<PresenceBoard> {
        &self.presence
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }
}
