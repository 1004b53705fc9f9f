//! Streaming session lifecycle primitives.
//!
//! This crate holds the runtime-free part of the live streaming core:
//! - Resolving the active connection into an ingest endpoint.
//! - The session state machine with its bounded exponential backoff.
//! - The closed set of transport status codes it reacts to.
//! - Formatting and smoothing of the metrics shown while live.
//!
//! Nothing here performs I/O or owns a timer. The backend drives these types
//! from a single task and carries out the [`machine::Action`]s they return.

pub mod endpoint;
pub mod machine;
pub mod metrics;
pub mod status;

pub use endpoint::{Endpoint, EndpointError, TransportKind};
pub use machine::{Action, SessionMachine, SessionState};
pub use status::{StatusCode, TransportEvent};
