//! Capabilities the session consumes from platform collaborators.
//!
//! The wire protocol, the capture devices and the device idle timer all live
//! outside of this crate. The session only talks to them through the traits
//! below, which keeps the lifecycle logic independent of any particular
//! streaming library.

pub mod headless;
pub mod rtmp;
pub mod status_bridge;

use std::sync::Arc;

pub use status_bridge::StatusListener;

/// Live counters reported by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransportStats {
    /// Current outgoing rate in bytes per second.
    pub bytes_per_second: u64,
    /// Bytes sent since the connection was opened.
    pub total_bytes: u64,
    /// Frames per second currently being published, if known.
    pub fps: Option<f32>,
}

/// Errors a transport may surface while setting up a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid ingest uri: {0}")]
    InvalidUri(#[from] url::ParseError),
    #[error("ingest uri `{0}` has no host")]
    MissingHost(String),
    #[error("scheme `{0}` is not supported by this transport")]
    UnsupportedScheme(String),
    #[error("ingest uri `{0}` names no application")]
    MissingApp(String),
}

/// Outbound streaming connection.
///
/// Implementations report progress asynchronously through the registered
/// [`StatusListener`], possibly from their own threads.
pub trait Transport: Send + Sync {
    /// Begin connecting to `uri`. Replaces any previous connection.
    fn connect(&self, uri: &str);
    /// Close the current connection, if any.
    fn close(&self);
    /// Register (or with `None`, drop) the status listener.
    fn set_status_listener(&self, listener: Option<StatusListener>);
    fn stats(&self) -> TransportStats;
}

/// Errors raised while binding capture devices.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no {0} device available")]
    DeviceUnavailable(&'static str),
    #[error("capture device failed: {0}")]
    Device(String),
}

/// Local audio/video capture feeding the transport.
pub trait CapturePipeline: Send + Sync {
    fn attach_audio(&self) -> Result<(), CaptureError>;
    fn attach_camera(&self) -> Result<(), CaptureError>;
    /// Start sending captured media under `stream_name`.
    fn publish(&self, stream_name: &str);
}

/// Device idle-sleep control. Sleep must be prevented while streaming.
pub trait IdleSleep: Send + Sync {
    fn set_idle_sleep_enabled(&self, enabled: bool);
}

/// The set of collaborators handed to the backend on startup.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub capture: Arc<dyn CapturePipeline>,
    pub idle_sleep: Arc<dyn IdleSleep>,
}

impl Collaborators {
    /// Collaborators for running without camera or UI: an RTMP ingest
    /// transport and logging capture/idle-sleep stand-ins.
    pub fn headless() -> Self {
        Self {
            transport: Arc::new(rtmp::RtmpTransport::default()),
            capture: Arc::new(headless::HeadlessCapture::default()),
            idle_sleep: Arc::new(headless::HeadlessIdleSleep::default()),
        }
    }
}
