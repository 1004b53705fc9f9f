//! Adapts asynchronous transport callbacks into ordered session events.
//!
//! Transports call into a [`StatusListener`] from whatever thread they run
//! on. The listener only enqueues a typed [`SessionEvent`] onto an unbounded
//! channel read by the backend's session task, so all state mutation still
//! happens in one place and in arrival order.

use castline_session::{StatusCode, TransportEvent};
use tokio::sync::mpsc::UnboundedSender;

/// Events marshaled onto the session task from outside of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    /// Something the transport reported for the listener registered under
    /// `epoch`.
    Transport { epoch: u64, event: TransportEvent },
    /// The connect attempt registered under `epoch` took too long.
    ConnectTimeout { epoch: u64 },
    /// A backoff timer armed with `generation` fired.
    RetryElapsed { generation: u64 },
}

/// Handle given to the transport for reporting status and I/O errors.
///
/// Cheap to clone and safe to call from any thread.
#[derive(Debug, Clone)]
pub struct StatusListener {
    epoch: u64,
    tx: UnboundedSender<SessionEvent>,
}

impl StatusListener {
    /// Report a raw connection status code. Codes outside of the known set
    /// are ignored.
    pub fn on_status(&self, code: &str) {
        match StatusCode::from_code(code) {
            Some(status) => self.deliver(TransportEvent::Status(status)),
            None => log::debug!("Ignoring unknown transport status `{code}`"),
        }
    }

    /// Report a socket level error.
    pub fn on_io_error(&self) {
        self.deliver(TransportEvent::IoError);
    }

    fn deliver(&self, event: TransportEvent) {
        let message = SessionEvent::Transport {
            epoch: self.epoch,
            event,
        };
        if self.tx.send(message).is_err() {
            log::debug!("Session is gone, dropping {event:?}");
        }
    }
}

/// Hands out listeners and tells current ones apart from stale ones.
#[derive(Debug)]
pub(crate) struct StatusBridge {
    epoch: u64,
    registered: bool,
    tx: UnboundedSender<SessionEvent>,
}

impl StatusBridge {
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            epoch: 0,
            registered: false,
            tx,
        }
    }

    /// Creates a listener for a new connection attempt. Listeners handed
    /// out earlier become stale.
    pub fn register(&mut self) -> StatusListener {
        self.epoch += 1;
        self.registered = true;
        StatusListener {
            epoch: self.epoch,
            tx: self.tx.clone(),
        }
    }

    /// Marks every listener handed out so far as stale.
    pub fn unregister(&mut self) {
        self.epoch += 1;
        self.registered = false;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether events tagged with `epoch` come from the live registration.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.registered && epoch == self.epoch
    }
}
