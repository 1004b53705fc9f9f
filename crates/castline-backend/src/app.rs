//! Application context and message dispatching utilities.
//!
//! The dispatch loop is the single serialization point of the backend:
//! frontend commands, marshaled transport events, timers and metrics ticks
//! are all handled here, one at a time, against the one [`SessionService`].

use std::sync::Arc;
use std::time::Duration;

use castline_bridge::{MessageFromBackend, MessageToBackend};
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver};
use tokio::time::{Interval, MissedTickBehavior};

use crate::services;
use crate::services::session_service::SessionService;
use crate::state::SharedState;
use crate::transport::status_bridge::SessionEvent;

/// Shared application context passed to services and message handlers.
pub(crate) struct AppContext {
    /// Runtime application state shared across services.
    pub state: SharedState,
    /// Outbound channel to the frontend bridge.
    pub tx: Sender<MessageFromBackend>,
}

impl AppContext {
    /// Serve frontend messages, session events and clock ticks until the
    /// frontend goes away. User commands are polled first so a stop always
    /// wins over anything queued behind it.
    pub async fn consume_bridge_messages(
        self: &Arc<Self>,
        mut rx: Receiver<MessageToBackend>,
        mut session: SessionService,
        mut events: UnboundedReceiver<SessionEvent>,
    ) {
        let mut period = self.metrics_period().await;
        let mut ticker = metrics_ticker(tokio::time::interval(period));

        loop {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(message) => {
                        log::debug!("Got a frontend message: {message:?}");
                        let reconfigured =
                            matches!(message, MessageToBackend::UpdateConfiguration(_));
                        self.dispatch_message(&mut session, message).await;

                        if reconfigured {
                            let configured = self.metrics_period().await;
                            if configured != period {
                                log::info!(
                                    "Metrics period changed to {}ms",
                                    configured.as_millis()
                                );
                                period = configured;
                                ticker = metrics_ticker(tokio::time::interval_at(
                                    tokio::time::Instant::now() + period,
                                    period,
                                ));
                            }
                        }
                    }
                    None => break,
                },
                Some(event) = events.recv() => {
                    session.handle_event(self, event).await;
                }
                _ = ticker.tick() => session.tick(self).await,
            }
        }

        log::info!("Frontend disconnected, shutting the session down");
        session.stop(self).await;
    }

    async fn metrics_period(&self) -> Duration {
        let state = self.state.read().await;
        Duration::from_millis(state.config.session.metrics_interval_ms.max(1))
    }

    /// Dispatches the received message from frontend down to individual
    /// service handlers.
    async fn dispatch_message(
        self: &Arc<Self>,
        session: &mut SessionService,
        message: MessageToBackend,
    ) {
        match message {
            MessageToBackend::ConfigurationRequest => {
                services::config_service::handle_config_request(self.clone()).await;
            }
            MessageToBackend::UpdateConfiguration(config) => {
                services::config_service::handle_config_update(self.clone(), session, config)
                    .await;
            }
            MessageToBackend::StartStream => session.start(self).await,
            MessageToBackend::StopStream => session.stop(self).await,
            MessageToBackend::SessionStatusRequest => session.report_status(self).await,
            MessageToBackend::ChatPostsReceived(count) => session.record_chat_posts(count),
        }
    }

    /// Send a message to the frontend bridge. A closed frontend is logged,
    /// not treated as an error.
    pub async fn send(&self, message: MessageFromBackend) {
        if let Err(err) = self.tx.send(message).await {
            log::warn!("Frontend is gone, dropping {:?}", err.0);
        }
    }

    /// Send a notification message to the frontend bridge.
    pub async fn send_notification(
        &self,
        notification_type: castline_bridge::notification::NotificationType,
        content: impl Into<String>,
    ) {
        self.send(MessageFromBackend::NotificationMessage(
            castline_bridge::notification::NotificationMessage {
                notification_type,
                message: content.into(),
            },
        ))
        .await;
    }
}

fn metrics_ticker(mut ticker: Interval) -> Interval {
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
