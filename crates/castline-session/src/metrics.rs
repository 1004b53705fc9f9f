//! Derived, display-only metrics: uptime, throughput and event rates.

use std::fmt::Write;
use std::time::Duration;

/// Decimal SI units for byte quantities.
const BYTE_UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

/// Decimal SI units for bit rates.
const BIT_RATE_UNITS: [&str; 7] = ["bps", "kbps", "Mbps", "Gbps", "Tbps", "Pbps", "Ebps"];

/// Weight of the previous rate in the exponential smoothing.
const RATE_DECAY: f32 = 0.8;

/// Scales `value` by 1000 until it fits, then renders it with the matching
/// unit. Values below 1000 are printed exactly.
fn format_with_units(value: u64, units: [&str; 7]) -> String {
    let mut scaled = value as f64;
    let mut unit = 0;

    while scaled >= 1000.0 && unit < units.len() - 1 {
        scaled /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", value, units[unit])
    } else {
        format!("{:.2} {}", scaled, units[unit])
    }
}

/// Formats a byte count, e.g. `10.20 MB`.
pub fn format_bytes(bytes: u64) -> String {
    format_with_units(bytes, BYTE_UNITS)
}

/// Formats a rate given in bits per second, e.g. `2.50 Mbps`.
pub fn format_bit_rate(bits_per_second: u64) -> String {
    format_with_units(bits_per_second, BIT_RATE_UNITS)
}

/// Throughput display: current bit rate followed by the total sent.
pub fn format_throughput(bytes_per_second: u64, total_bytes: u64) -> String {
    format!(
        "{} ({})",
        format_bit_rate(bytes_per_second.saturating_mul(8)),
        format_bytes(total_bytes)
    )
}

/// Formats an elapsed duration as zero padded `HH:MM:SS`.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut out = String::with_capacity(8);
    // writing into a String cannot fail
    let _ = write!(&mut out, "{hours:02}:{minutes:02}:{seconds:02}");
    out
}

/// Exponentially smoothed per-tick rate of some external event, such as
/// incoming chat posts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventRate {
    rate: f32,
    pending: u32,
}

impl EventRate {
    /// Counts events seen since the last tick.
    pub fn record(&mut self, count: u32) {
        self.pending = self.pending.saturating_add(count);
    }

    /// Folds the pending count into the rate and resets it.
    pub fn tick(&mut self) -> f32 {
        self.rate = self.rate * RATE_DECAY + self.pending as f32 * (1.0 - RATE_DECAY);
        self.pending = 0;
        self.rate
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
