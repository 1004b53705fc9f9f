//! Backend runtime setup and orchestration.
//!
//! This module wires together configuration, shared state, the session
//! service and the message dispatch loop that listens to frontend bridge
//! requests.

use std::{sync::Arc, thread};

use castline_bridge::config::Config;
use castline_bridge::{MessageFromBackend, MessageToBackend};
use tokio::sync::{
    RwLock,
    mpsc::{Receiver, Sender, unbounded_channel},
};

use crate::app::AppContext;
use crate::services::session_service::SessionService;
use crate::state::State;
use crate::transport::Collaborators;

/// Initialize backend state and start processing frontend messages.
async fn setup_backend(
    rx: Receiver<MessageToBackend>,
    tx: Sender<MessageFromBackend>,
    collaborators: Collaborators,
) {
    let (config, config_path) = match crate::config::load_config().await {
        Ok((config, path)) => (config, Some(path)),
        Err(err) => {
            log::error!("Failed to load config, falling back to defaults: {err}");
            (Config::default(), None)
        }
    };

    let (events_tx, events_rx) = unbounded_channel();
    let session = SessionService::new(&config, collaborators, events_tx);

    let state = Arc::new(RwLock::new(State {
        config,
        config_path,
    }));

    let context = Arc::new(AppContext { state, tx });
    context
        .consume_bridge_messages(rx, session, events_rx)
        .await;
    log::info!("Backend stopped");
}

/// Spawn the backend runtime and begin processing bridge messages. The
/// returned handle finishes once the frontend side of the bridge is dropped.
pub fn run(
    rx: Receiver<MessageToBackend>,
    tx: Sender<MessageFromBackend>,
    collaborators: Collaborators,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("Failed to build tokio runtime: {err}");
                return;
            }
        };
        runtime.block_on(setup_backend(rx, tx, collaborators));
    })
}
