//! Polling fallback used while the bus is not connected.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    client::transport::ConnectionStatus,
    dao::{models::SessionEntity, session_store::SessionStore},
};

/// Re-reads one session row every `period` for as long as the bus reports a
/// status other than `Connected`, handing every row read to `on_row`.
pub struct PollingReconciler {
    task: JoinHandle<()>,
}

impl PollingReconciler {
    /// Start watching `status`.
    pub fn spawn<H, Fut>(
        store: Arc<dyn SessionStore>,
        session_id: String,
        mut status: watch::Receiver<ConnectionStatus>,
        period: Duration,
        mut on_row: H,
    ) -> Self
    where
        H: FnMut(SessionEntity) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = tokio::spawn(async move {
            loop {
                if status.wait_for(|current| !current.is_connected()).await.is_err() {
                    debug!(%session_id, "bus status closed; poller exiting");
                    return;
                }
                info!(%session_id, "bus not connected; polling session row");

                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        changed = status.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                    if status.borrow_and_update().is_connected() {
                        info!(%session_id, "bus connected; polling stopped");
                        break;
                    }

                    match store.find_session(session_id.clone()).await {
                        Ok(Some(row)) => on_row(row).await,
                        Ok(None) => warn!(%session_id, "polled session row is missing"),
                        Err(err) => warn!(%session_id, error = %err, "session poll failed"),
                    }
                }
            }
        });

        Self { task }
    }

    /// Stop polling immediately.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for PollingReconciler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::transport::{LocalTransport, Transport},
        dao::session_store::MemorySessionStore,
        state::{
            bus::BusHub,
            session::{GameSession, Seats},
        },
    };
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn polls_only_while_disconnected() {
        let store = MemorySessionStore::new();
        let seats = Seats {
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        };
        let row: SessionEntity = GameSession::new("couple-42", seats, seats.a).into();
        SessionStore::insert_session(&store, row.clone()).await.unwrap();

        let transport = LocalTransport::new(Arc::new(BusHub::new(8)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = PollingReconciler::spawn(
            Arc::new(store),
            "couple-42".into(),
            transport.status(),
            Duration::from_secs(2),
            move |row| {
                let _ = tx.send(row);
                async {}
            },
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        transport.set_status(ConnectionStatus::Error);
        tokio::time::sleep(Duration::from_millis(4_100)).await;
        assert_eq!(rx.try_recv().unwrap(), row);
        assert_eq!(rx.try_recv().unwrap(), row);
        assert!(rx.try_recv().is_err());

        transport.set_status(ConnectionStatus::Connected);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        poller.stop();
    }
}
