//! Communication bridge between frontend and backend.
//!
//! This crate defines the types and protocols used to connect a frontend
//! (the display layer) with the asynchronous backend that owns the live
//! streaming session.
//!
//! The design is deliberately lightweight and unidirectional:
//! - The frontend sends commands (e.g., start or stop the stream, update the
//!   configuration, report chat activity).
//! - The backend pushes events (e.g., phase changes, metrics snapshots,
//!   notifications).
//!
//! Communication happens over bounded [`tokio::sync::mpsc`] channels wrapped
//! in [`BridgeChannels`]. The frontend never mutates session state directly.

pub mod config;
pub mod notification;
pub mod session;

use tokio::sync::mpsc::{self, Receiver, Sender};

/// Messages emitted by the backend to inform the frontend of state updates.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageFromBackend {
    /// Generic message for all notifications in the application.
    NotificationMessage(notification::NotificationMessage),
    /// Response to the configuration request from the frontend.
    ConfigurationResponse(config::Config),
    /// The session changed phase or retry count. Also sent in response to
    /// [`MessageToBackend::SessionStatusRequest`].
    SessionUpdate(session::SessionSnapshot),
    /// Fresh derived metrics. Also sent in response to
    /// [`MessageToBackend::SessionStatusRequest`].
    MetricsUpdate(session::MetricsSnapshot),
}

/// Commands issued by the frontend to control or query the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageToBackend {
    /// Request for the application configuration.
    ConfigurationRequest,
    /// Replace the configuration, persist it and re-resolve the endpoint.
    UpdateConfiguration(config::Config),
    /// Go live with the active connection.
    StartStream,
    /// Stop streaming and cancel any pending reconnect.
    StopStream,
    /// Ask for the current session and metrics snapshots.
    SessionStatusRequest,
    /// Number of chat posts seen since the last report.
    ChatPostsReceived(u32),
}

/// Paired `tokio::mpsc` channels for bidirectional communication between
/// frontend and backend.
pub struct BridgeChannels {
    /// Receiver used by the frontend to get messages from the backend.
    pub frontend_rx: Receiver<MessageFromBackend>,
    /// Sender used by the frontend to send commands to the backend.
    pub frontend_tx: Sender<MessageToBackend>,

    /// Receiver used by the backend to get commands from the frontend.
    pub backend_rx: Receiver<MessageToBackend>,
    /// Sender used by the backend to send events/responses to the frontend.
    pub backend_tx: Sender<MessageFromBackend>,
}

impl BridgeChannels {
    /// Creates a new pair of bridged channels with the given buffer capacity.
    pub fn new(buffer: usize) -> Self {
        let (to_backend_tx, to_backend_rx) = mpsc::channel(buffer);
        let (to_frontend_tx, to_frontend_rx) = mpsc::channel(buffer);
        Self {
            frontend_tx: to_backend_tx,
            frontend_rx: to_frontend_rx,
            backend_rx: to_backend_rx,
            backend_tx: to_frontend_tx,
        }
    }
}

impl Default for BridgeChannels {
    fn default() -> Self {
        Self::new(64)
    }
}
