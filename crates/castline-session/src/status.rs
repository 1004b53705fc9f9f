//! Closed catalogue of transport status signals understood by the session.

/// Connection status codes reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    ConnectSuccess,
    ConnectFailed,
    ConnectClosed,
}

impl StatusCode {
    pub const CONNECT_SUCCESS: &'static str = "NetConnection.Connect.Success";
    pub const CONNECT_FAILED: &'static str = "NetConnection.Connect.Failed";
    pub const CONNECT_CLOSED: &'static str = "NetConnection.Connect.Closed";

    /// Maps a raw transport code. Anything outside the known set yields
    /// `None` and must be ignored by the caller.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            Self::CONNECT_SUCCESS => Some(Self::ConnectSuccess),
            Self::CONNECT_FAILED => Some(Self::ConnectFailed),
            Self::CONNECT_CLOSED => Some(Self::ConnectClosed),
            _ => None,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::ConnectSuccess => Self::CONNECT_SUCCESS,
            Self::ConnectFailed => Self::CONNECT_FAILED,
            Self::ConnectClosed => Self::CONNECT_CLOSED,
        }
    }
}

/// A typed event delivered from the transport into the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Status(StatusCode),
    /// Socket level failure on an established or establishing connection.
    IoError,
}
