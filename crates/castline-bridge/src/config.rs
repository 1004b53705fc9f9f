use serde::{Deserialize, Serialize};

/// A single ingest connection as entered by the user.
///
/// Several connections may be configured at once; the first one with
/// `enabled == true` is the active one (see [`Config::active_connection`]).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Display name of the connection.
    pub name: String,
    /// Full ingest URL including the stream key, e.g.
    /// `rtmp://live.example.com/app/stream-key`.
    pub url: String,
    /// Whether this connection may be selected as the active one.
    pub enabled: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "Main".to_string(),
            url: "rtmp://127.0.0.1:1935/live/stream".to_string(),
            enabled: true,
        }
    }
}

/// Tuning knobs for the streaming session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of automatic reconnects before the session gives up and
    /// stays closed.
    pub max_retry_count: u32,
    /// How long a single connect attempt may take before it counts as
    /// failed, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Period of the metrics clock, in milliseconds.
    pub metrics_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 5,
            connect_timeout_ms: 10_000,
            metrics_interval_ms: 1_000,
        }
    }
}

/// Global application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Ordered list of ingest connections.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,
}

/// The active connection of an ordered list: the first enabled one.
pub fn active_connection(connections: &[ConnectionConfig]) -> Option<&ConnectionConfig> {
    connections.iter().find(|connection| connection.enabled)
}

impl Config {
    /// Returns the first enabled connection, if any.
    pub fn active_connection(&self) -> Option<&ConnectionConfig> {
        active_connection(&self.connections)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: vec![ConnectionConfig::default()],
            session: SessionConfig::default(),
        }
    }
}
