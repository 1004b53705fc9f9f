//! Recording collaborators and a harness for driving the session service.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use castline_bridge::MessageFromBackend;
use castline_bridge::config::{Config, ConnectionConfig, SessionConfig};
use castline_bridge::notification::NotificationType;
use castline_bridge::session::SessionSnapshot;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver, channel, unbounded_channel};

use crate::app::AppContext;
use crate::services::session_service::SessionService;
use crate::state::State;
use crate::transport::status_bridge::SessionEvent;
use crate::transport::{
    CaptureError, CapturePipeline, Collaborators, IdleSleep, StatusListener, Transport,
    TransportStats,
};

pub(crate) fn config_with(url: &str) -> Config {
    Config {
        connections: vec![ConnectionConfig {
            name: "Main".to_string(),
            url: url.to_string(),
            enabled: true,
        }],
        session: SessionConfig::default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportCall {
    Connect(String),
    Close,
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    listener: Mutex<Option<StatusListener>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect(_)))
            .count()
    }

    pub fn listener(&self) -> Option<StatusListener> {
        self.listener.lock().unwrap().clone()
    }

    pub fn emit(&self, code: &str) {
        self.listener().expect("no status listener registered").on_status(code);
    }

    pub fn emit_io_error(&self) {
        self.listener().expect("no status listener registered").on_io_error();
    }
}

impl Transport for RecordingTransport {
    fn connect(&self, uri: &str) {
        self.calls.lock().unwrap().push(TransportCall::Connect(uri.to_string()));
    }

    fn close(&self) {
        self.calls.lock().unwrap().push(TransportCall::Close);
    }

    fn set_status_listener(&self, listener: Option<StatusListener>) {
        *self.listener.lock().unwrap() = listener;
    }

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

#[derive(Default)]
pub(crate) struct RecordingCapture {
    broken_camera: bool,
    attached: AtomicUsize,
    published: Mutex<Vec<String>>,
}

impl RecordingCapture {
    pub fn attach_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

impl CapturePipeline for RecordingCapture {
    fn attach_audio(&self) -> Result<(), CaptureError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn attach_camera(&self) -> Result<(), CaptureError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        if self.broken_camera {
            return Err(CaptureError::DeviceUnavailable("camera"));
        }
        Ok(())
    }

    fn publish(&self, stream_name: &str) {
        self.published.lock().unwrap().push(stream_name.to_string());
    }
}

#[derive(Default)]
pub(crate) struct RecordingIdleSleep {
    history: Mutex<Vec<bool>>,
}

impl RecordingIdleSleep {
    /// Last value set, if any.
    pub fn enabled(&self) -> Option<bool> {
        self.history.lock().unwrap().last().copied()
    }
}

impl IdleSleep for RecordingIdleSleep {
    fn set_idle_sleep_enabled(&self, enabled: bool) {
        self.history.lock().unwrap().push(enabled);
    }
}

pub(crate) struct Fakes {
    pub transport: Arc<RecordingTransport>,
    pub capture: Arc<RecordingCapture>,
    pub idle_sleep: Arc<RecordingIdleSleep>,
}

impl Fakes {
    pub fn new(broken_camera: bool) -> Self {
        Self {
            transport: Arc::new(RecordingTransport::default()),
            capture: Arc::new(RecordingCapture {
                broken_camera,
                ..RecordingCapture::default()
            }),
            idle_sleep: Arc::new(RecordingIdleSleep::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transport: self.transport.clone(),
            capture: self.capture.clone(),
            idle_sleep: self.idle_sleep.clone(),
        }
    }
}

/// Builds a context whose frontend end is returned alongside it.
pub(crate) fn context(
    config: Config,
    config_path: Option<PathBuf>,
) -> (Arc<AppContext>, Receiver<MessageFromBackend>) {
    let (tx, rx) = channel(1024);
    let state = Arc::new(RwLock::new(State {
        config,
        config_path,
    }));
    (Arc::new(AppContext { state, tx }), rx)
}

/// Owns a [`SessionService`] and lets tests feed it one event at a time.
pub(crate) struct Harness {
    pub session: SessionService,
    pub context: Arc<AppContext>,
    pub frontend_rx: Receiver<MessageFromBackend>,
    pub events_rx: UnboundedReceiver<SessionEvent>,
    pub transport: Arc<RecordingTransport>,
    pub capture: Arc<RecordingCapture>,
    pub idle_sleep: Arc<RecordingIdleSleep>,
    received: Vec<MessageFromBackend>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::build(config, false)
    }

    pub fn with_broken_camera(config: Config) -> Self {
        Self::build(config, true)
    }

    fn build(config: Config, broken_camera: bool) -> Self {
        let fakes = Fakes::new(broken_camera);
        let (events_tx, events_rx) = unbounded_channel();
        let session = SessionService::new(&config, fakes.collaborators(), events_tx);
        let (context, frontend_rx) = context(config, None);
        Self {
            session,
            context,
            frontend_rx,
            events_rx,
            transport: fakes.transport,
            capture: fakes.capture,
            idle_sleep: fakes.idle_sleep,
            received: Vec::new(),
        }
    }

    pub async fn start(&mut self) {
        self.session.start(&self.context).await;
    }

    pub async fn stop(&mut self) {
        self.session.stop(&self.context).await;
    }

    pub async fn tick(&mut self) {
        self.session.tick(&self.context).await;
    }

    pub async fn configuration_changed(&mut self, config: &Config) {
        self.session.configuration_changed(&self.context, config).await;
    }

    /// Waits for the next marshaled event and hands it to the session.
    pub async fn pump(&mut self) {
        let event = self.events_rx.recv().await.expect("event channel closed");
        self.session.handle_event(&self.context, event).await;
    }

    fn drain(&mut self) {
        while let Ok(message) = self.frontend_rx.try_recv() {
            self.received.push(message);
        }
    }

    pub fn notifications(&mut self) -> Vec<(NotificationType, String)> {
        self.drain();
        self.received
            .iter()
            .filter_map(|message| match message {
                MessageFromBackend::NotificationMessage(notification) => Some((
                    notification.notification_type,
                    notification.message.clone(),
                )),
                _ => None,
            })
            .collect()
    }

    pub fn session_updates(&mut self) -> Vec<SessionSnapshot> {
        self.drain();
        self.received
            .iter()
            .filter_map(|message| match message {
                MessageFromBackend::SessionUpdate(snapshot) => Some(snapshot.clone()),
                _ => None,
            })
            .collect()
    }
}
