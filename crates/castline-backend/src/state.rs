/// Application state shared across backend tasks.
///
/// The streaming session itself is not in here: it is owned by the session
/// task (see [`crate::services::session_service`]) and only ever mutated
/// there. This struct holds what other handlers need to read, mainly the
/// current configuration.
#[derive(Debug, Clone)]
pub struct State {
    /// The loaded application configuration.
    pub config: castline_bridge::config::Config,
    /// Where the configuration is persisted. `None` when the user's
    /// directories could not be determined; changes then live in memory only.
    pub config_path: Option<std::path::PathBuf>,
}

/// Thread-safe, async-friendly shared reference to the application [`State`].
pub type SharedState = std::sync::Arc<tokio::sync::RwLock<State>>;
