use std::sync::atomic::{AtomicBool, Ordering};

use super::{CaptureError, CapturePipeline, IdleSleep};

/// Capture pipeline stand-in for machines without camera access. It only
/// logs what would have been done.
#[derive(Debug, Default)]
pub struct HeadlessCapture;

impl CapturePipeline for HeadlessCapture {
    fn attach_audio(&self) -> Result<(), CaptureError> {
        log::info!("Headless capture: no microphone attached");
        Ok(())
    }

    fn attach_camera(&self) -> Result<(), CaptureError> {
        log::info!("Headless capture: no camera attached");
        Ok(())
    }

    fn publish(&self, stream_name: &str) {
        log::info!("Headless capture: publishing as `{stream_name}`");
    }
}

#[derive(Debug)]
pub struct HeadlessIdleSleep {
    enabled: AtomicBool,
}

impl Default for HeadlessIdleSleep {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl IdleSleep for HeadlessIdleSleep {
    fn set_idle_sleep_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::Relaxed) != enabled {
            log::debug!("Idle sleep {}", if enabled { "enabled" } else { "disabled" });
        }
    }
}
