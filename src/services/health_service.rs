use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the relay currently has a working store, logging failures.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_session_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
                return HealthResponse::degraded();
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    if state.is_degraded().await {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::MemorySessionStore, dto::health::HealthStatus,
        state::AppState,
    };

    #[tokio::test]
    async fn reports_store_outages() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        let store = MemorySessionStore::new();
        state.set_session_store(Arc::new(store.clone())).await;
        assert_eq!(health_status(&state).await.status, HealthStatus::Ok);

        store.set_available(false);
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);
    }
}
