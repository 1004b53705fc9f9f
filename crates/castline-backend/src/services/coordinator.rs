//! Side effects bound to session phase transitions.

use castline_bridge::notification::NotificationType;
use castline_session::Endpoint;

use crate::services::clock::MetricsClock;
use crate::transport::Collaborators;
use crate::transport::status_bridge::StatusBridge;

/// Carries out the connect/publish/shutdown effects requested by the
/// session state machine. The transport handle is only ever touched from
/// here, on the session task.
pub(crate) struct PublishCoordinator {
    collaborators: Collaborators,
    bridge: StatusBridge,
    devices_attached: bool,
}

impl PublishCoordinator {
    pub fn new(collaborators: Collaborators, bridge: StatusBridge) -> Self {
        Self {
            collaborators,
            bridge,
            devices_attached: false,
        }
    }

    /// Entering `Connecting`: attach capture devices on first use, register
    /// a fresh status listener, connect and keep the device awake.
    ///
    /// Returns the listener epoch of this attempt together with any
    /// warnings worth showing to the user.
    pub fn connect(&mut self, endpoint: &Endpoint) -> (u64, Vec<(NotificationType, String)>) {
        let mut warnings = Vec::new();
        if !self.devices_attached {
            self.devices_attached = true;
            if let Err(err) = self.collaborators.capture.attach_audio() {
                log::error!("Failed to attach audio: {err}");
                warnings.push((
                    NotificationType::Warning,
                    format!("Microphone unavailable: {err}"),
                ));
            }
            if let Err(err) = self.collaborators.capture.attach_camera() {
                log::error!("Failed to attach camera: {err}");
                warnings.push((NotificationType::Warning, format!("Camera unavailable: {err}")));
            }
        }

        let listener = self.bridge.register();
        let epoch = self.bridge.epoch();
        self.collaborators
            .transport
            .set_status_listener(Some(listener));
        log::info!("Connecting to {} ({})", endpoint.uri, endpoint.connection_name);
        self.collaborators.transport.connect(&endpoint.uri);
        self.collaborators.idle_sleep.set_idle_sleep_enabled(false);

        (epoch, warnings)
    }

    /// Entering `Live`: start sending captured media.
    pub fn publish(&self, stream_name: &str) {
        log::info!("Publishing stream `{stream_name}`");
        self.collaborators.capture.publish(stream_name);
    }

    /// Entering `Closed`: drop listeners, close the transport, let the
    /// device sleep again and blank the live-only metrics.
    pub fn shutdown(&mut self, clock: &mut MetricsClock) {
        self.bridge.unregister();
        self.collaborators.transport.set_status_listener(None);
        self.collaborators.transport.close();
        self.collaborators.idle_sleep.set_idle_sleep_enabled(true);
        clock.clear();
    }

    /// Whether an event tagged with `epoch` belongs to the current attempt.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.bridge.is_current(epoch)
    }

    pub fn transport_stats(&self) -> crate::transport::TransportStats {
        self.collaborators.transport.stats()
    }
}
