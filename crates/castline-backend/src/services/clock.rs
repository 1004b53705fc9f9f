//! Metrics clock: recomputes the derived display metrics on every tick.

use std::time::Instant;

use castline_bridge::session::{MetricsSnapshot, Phase};
use castline_session::SessionState;
use castline_session::metrics::{EventRate, format_throughput, format_uptime};
use chrono::NaiveTime;

use crate::transport::TransportStats;

#[derive(Debug, Default)]
pub(crate) struct MetricsClock {
    chat_rate: EventRate,
    snapshot: MetricsSnapshot,
    /// Last snapshot handed to the frontend.
    published: Option<MetricsSnapshot>,
}

impl MetricsClock {
    /// Counts chat posts for the next tick.
    pub fn record_chat_posts(&mut self, count: u32) {
        self.chat_rate.record(count);
    }

    pub fn reset_chat_rate(&mut self) {
        self.chat_rate.reset();
        self.snapshot.chat_posts_per_second = 0.0;
    }

    /// Recomputes every metric from the session state and transport
    /// counters.
    pub fn tick(
        &mut self,
        state: &SessionState,
        stats: TransportStats,
        now: Instant,
        wall_time: NaiveTime,
    ) {
        let live = state.phase == Phase::Live;

        self.snapshot.uptime = match state.start_timestamp {
            Some(started) if live => format_uptime(now.saturating_duration_since(started)),
            _ => String::new(),
        };
        self.snapshot.throughput = if live {
            format_throughput(stats.bytes_per_second, stats.total_bytes)
        } else {
            String::new()
        };
        self.snapshot.fps = match stats.fps {
            Some(fps) if live => format!("{fps:.0}"),
            _ => String::new(),
        };
        self.snapshot.current_time = wall_time.format("%H:%M").to_string();
        self.snapshot.chat_posts_per_second = self.chat_rate.tick();
    }

    /// Blanks the metrics that only make sense while live.
    pub fn clear(&mut self) {
        self.snapshot.uptime.clear();
        self.snapshot.throughput.clear();
        self.snapshot.fps.clear();
    }

    pub fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }

    /// Returns the snapshot if it differs from the one last taken here.
    pub fn take_changed(&mut self) -> Option<MetricsSnapshot> {
        if self.published.as_ref() == Some(&self.snapshot) {
            return None;
        }
        self.published = Some(self.snapshot.clone());
        self.published.clone()
    }
}
