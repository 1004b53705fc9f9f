//! Drives the session state machine on the backend's single session task.
//!
//! Every mutation of the session (user commands, transport callbacks, retry
//! and timeout timers, metrics ticks) arrives here through the dispatch loop
//! in [`crate::app`], one at a time. Timers never block: they are spawned
//! tasks that post a [`SessionEvent`] back when they fire, and stale ones are
//! filtered out by generation or epoch.

use std::time::{Duration, Instant};

use castline_bridge::MessageFromBackend;
use castline_bridge::config::Config;
use castline_bridge::notification::NotificationType;
use castline_bridge::session::{Phase, SessionSnapshot};
use castline_session::{Action, SessionMachine, StatusCode, TransportEvent, endpoint};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::app::AppContext;
use crate::services::clock::MetricsClock;
use crate::services::coordinator::PublishCoordinator;
use crate::transport::Collaborators;
use crate::transport::status_bridge::{SessionEvent, StatusBridge};

/// Current instant on tokio's clock, so paused-time tests see timers and
/// uptime move together.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub(crate) struct SessionService {
    machine: SessionMachine,
    coordinator: PublishCoordinator,
    clock: MetricsClock,
    events_tx: UnboundedSender<SessionEvent>,
    connect_timeout: Duration,
    retry_timer: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    /// Last session snapshot handed to the frontend.
    published: Option<SessionSnapshot>,
}

impl SessionService {
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        events_tx: UnboundedSender<SessionEvent>,
    ) -> Self {
        let endpoint = endpoint::resolve_endpoint(&config.connections);
        let bridge = StatusBridge::new(events_tx.clone());
        Self {
            machine: SessionMachine::new(endpoint, config.session.max_retry_count),
            coordinator: PublishCoordinator::new(collaborators, bridge),
            clock: MetricsClock::default(),
            events_tx,
            connect_timeout: Duration::from_millis(config.session.connect_timeout_ms),
            retry_timer: None,
            connect_timer: None,
            published: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    #[cfg(test)]
    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    #[cfg(test)]
    pub fn metrics(&self) -> &castline_bridge::session::MetricsSnapshot {
        self.clock.snapshot()
    }

    /// Handles [`castline_bridge::MessageToBackend::StartStream`].
    pub async fn start(&mut self, context: &AppContext) {
        if self.machine.endpoint().is_none() {
            context
                .send_notification(
                    NotificationType::Warning,
                    "No usable connection is enabled, configure one to go live.",
                )
                .await;
        }
        let actions = self.machine.start();
        self.apply(context, actions).await;
    }

    /// Handles [`castline_bridge::MessageToBackend::StopStream`].
    pub async fn stop(&mut self, context: &AppContext) {
        let actions = self.machine.stop();
        self.apply(context, actions).await;
    }

    /// Re-resolves the endpoint after the configuration was replaced.
    pub async fn configuration_changed(&mut self, context: &AppContext, config: &Config) {
        self.machine
            .set_max_retry_count(config.session.max_retry_count);
        self.connect_timeout = Duration::from_millis(config.session.connect_timeout_ms);
        self.clock.reset_chat_rate();

        let endpoint = endpoint::resolve_endpoint(&config.connections);
        let actions = self.machine.configuration_changed(endpoint);
        self.apply(context, actions).await;
    }

    /// Handles an event marshaled onto the session task.
    pub async fn handle_event(&mut self, context: &AppContext, event: SessionEvent) {
        let previous = self.machine.phase();
        let actions = match event {
            SessionEvent::Transport { epoch, event } => {
                if !self.coordinator.is_current(epoch) {
                    log::debug!("Dropping {event:?} from stale connection {epoch}");
                    return;
                }
                self.machine.handle_event(event, now())
            }
            SessionEvent::ConnectTimeout { epoch } => {
                self.connect_timer = None;
                if !self.coordinator.is_current(epoch) || previous != Phase::Connecting {
                    return;
                }
                log::warn!(
                    "Connect attempt timed out after {}ms",
                    self.connect_timeout.as_millis()
                );
                self.machine
                    .handle_event(TransportEvent::Status(StatusCode::ConnectFailed), now())
            }
            SessionEvent::RetryElapsed { generation } => {
                self.retry_timer = None;
                self.machine.retry_elapsed(generation)
            }
        };
        self.apply(context, actions).await;

        if previous != Phase::Closed && self.machine.phase() == Phase::Closed {
            context
                .send_notification(
                    NotificationType::Error,
                    format!(
                        "Connection lost, gave up after {} reconnect attempts.",
                        self.machine.state().retry_count
                    ),
                )
                .await;
        }
    }

    /// One metrics clock tick.
    pub async fn tick(&mut self, context: &AppContext) {
        let stats = self.coordinator.transport_stats();
        self.machine
            .record_throughput(stats.bytes_per_second.saturating_mul(8));
        self.clock
            .tick(self.machine.state(), stats, now(), chrono::Local::now().time());
        if let Some(metrics) = self.clock.take_changed() {
            context.send(MessageFromBackend::MetricsUpdate(metrics)).await;
        }
    }

    pub fn record_chat_posts(&mut self, count: u32) {
        self.clock.record_chat_posts(count);
    }

    /// Answers a status query with both snapshots, changed or not.
    pub async fn report_status(&self, context: &AppContext) {
        context
            .send(MessageFromBackend::SessionUpdate(self.machine.snapshot()))
            .await;
        context
            .send(MessageFromBackend::MetricsUpdate(self.clock.snapshot().clone()))
            .await;
    }

    async fn apply(&mut self, context: &AppContext, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect(endpoint) => {
                    let (epoch, warnings) = self.coordinator.connect(&endpoint);
                    for (notification_type, message) in warnings {
                        context.send_notification(notification_type, message).await;
                    }
                    self.arm_connect_timeout(epoch);
                }
                Action::Publish(stream_name) => self.coordinator.publish(&stream_name),
                Action::ScheduleRetry { delay, generation } => {
                    self.arm_retry(delay, generation);
                }
                Action::CancelRetry => {
                    if let Some(timer) = self.retry_timer.take() {
                        timer.abort();
                    }
                }
                Action::Shutdown => self.coordinator.shutdown(&mut self.clock),
            }
        }

        if self.machine.phase() != Phase::Connecting {
            if let Some(timer) = self.connect_timer.take() {
                timer.abort();
            }
        }

        self.publish_snapshots(context).await;
    }

    fn arm_retry(&mut self, delay: Duration, generation: u64) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let tx = self.events_tx.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(SessionEvent::RetryElapsed { generation }).is_err() {
                log::debug!("Session is gone, dropping retry {generation}");
            }
        }));
    }

    fn arm_connect_timeout(&mut self, epoch: u64) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
        let tx = self.events_tx.clone();
        let timeout = self.connect_timeout;
        self.connect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if tx.send(SessionEvent::ConnectTimeout { epoch }).is_err() {
                log::debug!("Session is gone, dropping connect timeout {epoch}");
            }
        }));
    }

    async fn publish_snapshots(&mut self, context: &AppContext) {
        let snapshot = self.machine.snapshot();
        if self.published.as_ref() != Some(&snapshot) {
            self.published = Some(snapshot.clone());
            context
                .send(MessageFromBackend::SessionUpdate(snapshot))
                .await;
        }
        if let Some(metrics) = self.clock.take_changed() {
            context.send(MessageFromBackend::MetricsUpdate(metrics)).await;
        }
    }
}
