//! Application-level configuration: sync timings, bus sizing and grant texts.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::bus::DEFAULT_BUS_CAPACITY;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TANDEM_GRID_CONFIG_PATH";
/// Environment variable selecting the storage backend.
const STORE_ENV: &str = "TANDEM_GRID_STORE";

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Timings shared by every client of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Interval of the polling fallback while the bus is not connected.
    pub poll_interval: Duration,
    /// Interval between presence heartbeats.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single durable write.
    pub write_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

/// Request texts attached to the grants issued when a game ends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GrantTexts {
    /// Text for the winner of a game.
    pub winner: String,
    /// Text for the player who lost.
    pub loser: String,
    /// Text for both players after a draw.
    pub draw: String,
}

impl Default for GrantTexts {
    fn default() -> Self {
        Self {
            winner: "You won! Claim a treat from your partner.".into(),
            loser: "Good game! Your partner earned a treat from you.".into(),
            draw: "A draw! You both deserve a treat.".into(),
        }
    }
}

/// Storage backend installed by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// In-process maps; state is lost on restart.
    #[default]
    Memory,
    /// MongoDB, configured through `MONGO_URI` / `MONGO_DB`.
    Mongo,
    /// CouchDB, configured through the `COUCH_*` variables.
    Couch,
}

impl StoreBackend {
    /// Read the backend from `TANDEM_GRID_STORE`, defaulting to memory.
    pub fn from_env() -> Self {
        match env::var(STORE_ENV) {
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "" | "memory" => StoreBackend::Memory,
                "mongo" | "mongodb" => StoreBackend::Mongo,
                "couch" | "couchdb" => StoreBackend::Couch,
                other => {
                    warn!(value = other, "unknown storage backend; using memory");
                    StoreBackend::Memory
                }
            },
            Err(_) => StoreBackend::Memory,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    sync: SyncSettings,
    bus_capacity: usize,
    grant_texts: GrantTexts,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        poll_interval_ms = app_config.sync.poll_interval.as_millis() as u64,
                        bus_capacity = app_config.bus_capacity,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Build a configuration from explicit values.
    pub fn new(sync: SyncSettings, bus_capacity: usize, grant_texts: GrantTexts) -> Self {
        Self {
            sync,
            bus_capacity: bus_capacity.max(1),
            grant_texts,
        }
    }

    /// Client timings.
    pub fn sync(&self) -> SyncSettings {
        self.sync
    }

    /// Capacity of each bus topic channel.
    pub fn bus_capacity(&self) -> usize {
        if self.bus_capacity == 0 {
            DEFAULT_BUS_CAPACITY
        } else {
            self.bus_capacity
        }
    }

    /// Texts used for issued grants.
    pub fn grant_texts(&self) -> &GrantTexts {
        &self.grant_texts
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    poll_interval_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    bus_capacity: Option<usize>,
    grant_texts: Option<GrantTexts>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = SyncSettings::default();
        let millis = |value: Option<u64>, fallback: Duration| {
            value
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self::new(
            SyncSettings {
                poll_interval: millis(value.poll_interval_ms, defaults.poll_interval),
                heartbeat_interval: millis(value.heartbeat_interval_ms, defaults.heartbeat_interval),
                write_timeout: millis(value.write_timeout_ms, defaults.write_timeout),
            },
            value.bus_capacity.unwrap_or(DEFAULT_BUS_CAPACITY),
            value.grant_texts.unwrap_or_default(),
        )
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"pollIntervalMs": 500, "busCapacity": 8}"#).unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.sync().poll_interval, Duration::from_millis(500));
        assert_eq!(
            config.sync().write_timeout,
            Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS)
        );
        assert_eq!(config.bus_capacity(), 8);
        assert_eq!(config.grant_texts(), &GrantTexts::default());
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"heartbeatIntervalMs": 0}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(
            config.sync().heartbeat_interval,
            Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS)
        );
    }

    #[test]
    fn default_config_uses_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.sync().poll_interval, Duration::from_secs(2));
        assert_eq!(config.sync().heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.sync().write_timeout, Duration::from_secs(5));
        assert_eq!(config.bus_capacity(), DEFAULT_BUS_CAPACITY);
    }
}
