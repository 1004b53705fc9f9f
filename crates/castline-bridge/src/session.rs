//! Read-only snapshots of the streaming session published for display.

use std::fmt;

/// Discrete lifecycle state of the streaming session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing was started yet, or no connection is configured.
    #[default]
    Idle,
    /// A connect request is in flight.
    Connecting,
    /// Connected and publishing.
    Live,
    /// Stopped by the user or after the retry ceiling was reached.
    Closed,
    /// Waiting for the backoff delay before the next connect attempt.
    Retrying,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Live => "live",
            Phase::Closed => "closed",
            Phase::Retrying => "retrying",
        };
        f.write_str(name)
    }
}

/// Lifecycle view of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub retry_count: u32,
    /// Name of the active connection, if one is configured.
    pub connection_name: Option<String>,
}

/// Derived metrics recomputed on every clock tick.
///
/// All strings are empty while there is nothing meaningful to show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Elapsed time since the session went live, `HH:MM:SS`.
    pub uptime: String,
    /// Outgoing bitrate and total sent, e.g. `2.50 Mbps (10.20 MB)`.
    pub throughput: String,
    /// Frames per second reported by the transport.
    pub fps: String,
    /// Local wall-clock time, `HH:MM`.
    pub current_time: String,
    /// Smoothed number of chat posts per second.
    pub chat_posts_per_second: f32,
}
