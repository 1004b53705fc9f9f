//! Backend runtime entry point and public API surface.
//!
//! This crate owns the live streaming session: it routes bridge messages to
//! services, runs the session state machine against a transport and capture
//! pipeline, and reports session and metrics snapshots back to the frontend.

mod app;
mod config;
mod runtime;
mod services;
mod state;
#[cfg(test)]
mod testing;
pub mod transport;

pub use crate::runtime::run;
pub use crate::transport::Collaborators;
