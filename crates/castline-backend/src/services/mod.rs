//! Backend services driven by the dispatch loop.
//!
//! `config_service` answers configuration requests and persists updates,
//! `session_service` owns the streaming session and its timers. The
//! coordinator and metrics clock are helpers owned by the session service.

pub mod clock;
pub mod config_service;
pub mod coordinator;
pub mod session_service;

/// Represents a type that is used in all handlers as an application context.
pub(crate) type AppContextHandle = std::sync::Arc<crate::app::AppContext>;
