//! Streaming session lifecycle state machine.
//!
//! The machine owns [`SessionState`] and decides every transition, but it
//! performs no I/O itself. Each operation returns the [`Action`]s the caller
//! has to carry out (connect, publish, arm or cancel a retry timer, shut the
//! transport down). This keeps the policy testable without a runtime and
//! lets the backend run it on a single serialized task.
//!
//! ```text
//!   Idle/Closed --start--> Connecting --success--> Live
//!                              ^  |                  |
//!                  retry timer |  | failed/closed    | failed/closed
//!                              |  v                  v
//!                            Retrying <--------------+
//!                              (ceiling reached -> Closed)
//! ```

use std::time::{Duration, Instant};

use castline_bridge::session::{Phase, SessionSnapshot};

use crate::endpoint::Endpoint;
use crate::status::{StatusCode, TransportEvent};

/// Default number of automatic reconnects before giving up.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 5;

/// Longest wait between two reconnect attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// Delay before the retry that is scheduled while `retry_count` retries
/// have already happened: `2^retry_count` seconds, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs(1u64 << retry_count.min(32)).min(MAX_BACKOFF)
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Register status listeners and connect the transport to the endpoint.
    Connect(Endpoint),
    /// Start publishing the capture pipeline under the given stream name.
    Publish(String),
    /// Arm a one-shot timer that calls [`SessionMachine::retry_elapsed`]
    /// with `generation` after `delay`.
    ScheduleRetry { delay: Duration, generation: u64 },
    /// Drop any armed retry timer.
    CancelRetry,
    /// Unregister listeners, close the transport and clear derived metrics.
    Shutdown,
}

/// Mutable, single-owner session record.
///
/// `start_timestamp` is `Some` exactly while `phase == Phase::Live`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub retry_count: u32,
    pub start_timestamp: Option<Instant>,
    /// Last throughput sample in bits per second, updated while live.
    pub current_throughput_bps: u64,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    endpoint: Option<Endpoint>,
    max_retry_count: u32,
    /// Bumped whenever a pending retry timer must be invalidated.
    retry_generation: u64,
    /// Whether the user asked for the stream to run.
    wanted: bool,
}

impl SessionMachine {
    pub fn new(endpoint: Option<Endpoint>, max_retry_count: u32) -> Self {
        Self {
            state: SessionState::default(),
            endpoint,
            max_retry_count,
            retry_generation: 0,
            wanted: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    pub fn set_max_retry_count(&mut self, max_retry_count: u32) {
        self.max_retry_count = max_retry_count;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.state.phase,
            retry_count: self.state.retry_count,
            connection_name: self
                .endpoint
                .as_ref()
                .map(|endpoint| endpoint.connection_name.clone()),
        }
    }

    fn enter(&mut self, phase: Phase, now: Option<Instant>) {
        if self.state.phase != phase {
            log::info!("Session phase {} -> {}", self.state.phase, phase);
        }
        self.state.phase = phase;
        self.state.start_timestamp = match phase {
            Phase::Live => now,
            _ => None,
        };
        if phase != Phase::Live {
            self.state.current_throughput_bps = 0;
        }
    }

    /// User-issued start.
    ///
    /// Without a resolved endpoint the phase is left untouched and nothing
    /// is connected.
    pub fn start(&mut self) -> Vec<Action> {
        let Some(endpoint) = self.endpoint.clone() else {
            log::warn!("Refusing to start: no active connection");
            return Vec::new();
        };
        self.wanted = true;

        match self.state.phase {
            Phase::Idle | Phase::Closed => {
                self.state.retry_count = 0;
                self.enter(Phase::Connecting, None);
                vec![Action::Connect(endpoint)]
            }
            Phase::Retrying => {
                self.retry_generation += 1;
                self.enter(Phase::Connecting, None);
                vec![Action::CancelRetry, Action::Connect(endpoint)]
            }
            Phase::Connecting | Phase::Live => {
                log::debug!("Start ignored, session is already {}", self.state.phase);
                Vec::new()
            }
        }
    }

    /// User-issued stop. Always ends in [`Phase::Closed`].
    pub fn stop(&mut self) -> Vec<Action> {
        self.wanted = false;
        self.close()
    }

    fn close(&mut self) -> Vec<Action> {
        let mut actions = Vec::with_capacity(2);
        if self.state.phase == Phase::Retrying {
            actions.push(Action::CancelRetry);
        }
        self.retry_generation += 1;
        self.enter(Phase::Closed, None);
        actions.push(Action::Shutdown);
        actions
    }

    /// Feeds a transport event in. Events that do not apply to the current
    /// phase are stale and ignored.
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Vec<Action> {
        match event {
            TransportEvent::Status(StatusCode::ConnectSuccess) => self.on_connect_success(now),
            TransportEvent::Status(StatusCode::ConnectFailed | StatusCode::ConnectClosed) => {
                self.on_connect_lost()
            }
            TransportEvent::IoError => self.on_io_error(),
        }
    }

    pub fn on_connect_success(&mut self, now: Instant) -> Vec<Action> {
        if self.state.phase != Phase::Connecting {
            log::debug!("Connect success ignored while {}", self.state.phase);
            return Vec::new();
        }
        let Some(endpoint) = self.endpoint.as_ref() else {
            return self.close();
        };
        let stream_name = endpoint.stream_name.clone();
        self.state.retry_count = 0;
        self.enter(Phase::Live, Some(now));
        vec![Action::Publish(stream_name)]
    }

    /// Connect failed or an established connection was closed by the peer.
    pub fn on_connect_lost(&mut self) -> Vec<Action> {
        if !matches!(self.state.phase, Phase::Connecting | Phase::Live) {
            log::debug!("Connection loss ignored while {}", self.state.phase);
            return Vec::new();
        }

        if self.state.retry_count > self.max_retry_count {
            log::warn!(
                "Giving up after {} reconnect attempts",
                self.state.retry_count
            );
            return self.close();
        }

        let delay = backoff_delay(self.state.retry_count);
        self.state.retry_count += 1;
        self.retry_generation += 1;
        self.enter(Phase::Retrying, None);
        log::info!(
            "Reconnect attempt {} in {}s",
            self.state.retry_count,
            delay.as_secs()
        );
        vec![Action::ScheduleRetry {
            delay,
            generation: self.retry_generation,
        }]
    }

    /// I/O errors reconnect immediately, bypassing the backoff policy.
    pub fn on_io_error(&mut self) -> Vec<Action> {
        if !matches!(self.state.phase, Phase::Connecting | Phase::Live) {
            log::debug!("I/O error ignored while {}", self.state.phase);
            return Vec::new();
        }
        let Some(endpoint) = self.endpoint.clone() else {
            return self.close();
        };
        self.enter(Phase::Connecting, None);
        vec![Action::Connect(endpoint)]
    }

    /// A retry timer fired. Only the most recently armed timer counts, and
    /// only while still retrying.
    pub fn retry_elapsed(&mut self, generation: u64) -> Vec<Action> {
        if self.state.phase != Phase::Retrying || generation != self.retry_generation {
            log::debug!("Stale retry timer {generation} ignored");
            return Vec::new();
        }
        let Some(endpoint) = self.endpoint.clone() else {
            return self.close();
        };
        self.enter(Phase::Connecting, None);
        vec![Action::Connect(endpoint)]
    }

    /// Swaps in a freshly resolved endpoint. A session the user wanted
    /// running is torn down and started again against the new endpoint.
    pub fn configuration_changed(&mut self, endpoint: Option<Endpoint>) -> Vec<Action> {
        let wanted = self.wanted;
        let mut actions = Vec::new();
        if !matches!(self.state.phase, Phase::Idle | Phase::Closed) {
            actions.extend(self.close());
        }
        self.endpoint = endpoint;
        if wanted {
            actions.extend(self.start());
        }
        actions
    }

    /// Records a throughput sample. Ignored unless live.
    pub fn record_throughput(&mut self, bits_per_second: u64) {
        if self.state.phase == Phase::Live {
            self.state.current_throughput_bps = bits_per_second;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::TransportKind;

    fn endpoint(name: &str) -> Endpoint {
        Endpoint {
            connection_name: name.to_string(),
            uri: format!("rtmp://{name}.example/app"),
            stream_name: "key".to_string(),
            kind: TransportKind::Rtmp,
        }
    }

    fn machine() -> SessionMachine {
        SessionMachine::new(Some(endpoint("main")), DEFAULT_MAX_RETRY_COUNT)
    }

    fn assert_invariant(machine: &SessionMachine) {
        assert_eq!(
            machine.state().start_timestamp.is_some(),
            machine.phase() == Phase::Live,
            "start timestamp out of sync with phase {}",
            machine.phase()
        );
    }

    fn scheduled(actions: &[Action]) -> Option<(Duration, u64)> {
        actions.iter().find_map(|action| match action {
            Action::ScheduleRetry { delay, generation } => Some((*delay, *generation)),
            _ => None,
        })
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        for n in 0..=5 {
            assert_eq!(backoff_delay(n), Duration::from_secs(2u64.pow(n)));
        }
    }

    #[test]
    fn backoff_is_capped_for_long_streaks() {
        assert_eq!(backoff_delay(9), Duration::from_secs(512));
        assert_eq!(backoff_delay(10), MAX_BACKOFF);
        assert_eq!(backoff_delay(40), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn start_without_endpoint_stays_idle() {
        let mut machine = SessionMachine::new(None, DEFAULT_MAX_RETRY_COUNT);
        assert!(machine.start().is_empty());
        assert_eq!(machine.phase(), Phase::Idle);
        assert_invariant(&machine);
    }

    #[test]
    fn start_connects_and_success_goes_live() {
        let mut machine = machine();
        assert_eq!(machine.start(), vec![Action::Connect(endpoint("main"))]);
        assert_eq!(machine.phase(), Phase::Connecting);
        assert_invariant(&machine);

        let now = Instant::now();
        assert_eq!(
            machine.on_connect_success(now),
            vec![Action::Publish("key".to_string())]
        );
        assert_eq!(machine.phase(), Phase::Live);
        assert_eq!(machine.state().start_timestamp, Some(now));
        assert_invariant(&machine);
    }

    #[test]
    fn start_is_noop_while_active() {
        let mut machine = machine();
        machine.start();
        assert!(machine.start().is_empty());
        machine.on_connect_success(Instant::now());
        assert!(machine.start().is_empty());
        assert_eq!(machine.phase(), Phase::Live);
    }

    #[test]
    fn consecutive_failures_back_off_geometrically() {
        let mut machine = machine();
        machine.start();

        let mut delays = Vec::new();
        for expected_count in 1..=3 {
            let actions = machine.on_connect_lost();
            let (delay, generation) = scheduled(&actions).unwrap();
            delays.push(delay.as_secs());
            assert_eq!(machine.state().retry_count, expected_count);
            assert_eq!(machine.phase(), Phase::Retrying);
            assert_invariant(&machine);

            assert_eq!(
                machine.retry_elapsed(generation),
                vec![Action::Connect(endpoint("main"))]
            );
            assert_eq!(machine.phase(), Phase::Connecting);
        }
        assert_eq!(delays, vec![1, 2, 4]);
    }

    #[test]
    fn retry_ceiling_closes_the_session() {
        let mut machine = machine();
        machine.start();

        let mut delays = Vec::new();
        loop {
            let actions = machine.on_connect_lost();
            match scheduled(&actions) {
                Some((delay, generation)) => {
                    delays.push(delay.as_secs());
                    machine.retry_elapsed(generation);
                }
                None => {
                    assert_eq!(actions, vec![Action::Shutdown]);
                    break;
                }
            }
        }

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(machine.phase(), Phase::Closed);
        assert_eq!(machine.state().retry_count, DEFAULT_MAX_RETRY_COUNT + 1);
        assert_invariant(&machine);

        // nothing automatic happens from here on
        assert!(machine.on_connect_lost().is_empty());
        assert!(machine.on_io_error().is_empty());
        assert!(machine.retry_elapsed(u64::MAX).is_empty());
        assert_eq!(machine.phase(), Phase::Closed);
    }

    #[test]
    fn success_resets_retry_count() {
        let mut machine = machine();
        machine.start();
        for _ in 0..4 {
            let (_, generation) = scheduled(&machine.on_connect_lost()).unwrap();
            machine.retry_elapsed(generation);
        }
        assert_eq!(machine.state().retry_count, 4);

        machine.on_connect_success(Instant::now());
        assert_eq!(machine.state().retry_count, 0);
        assert!(machine.state().start_timestamp.is_some());
    }

    #[test]
    fn loss_while_live_clears_start_timestamp() {
        let mut machine = machine();
        machine.start();
        machine.on_connect_success(Instant::now());
        machine.record_throughput(2_000_000);

        let actions = machine.on_connect_lost();
        assert_eq!(scheduled(&actions).map(|(d, _)| d), Some(Duration::from_secs(1)));
        assert_eq!(machine.state().start_timestamp, None);
        assert_eq!(machine.state().current_throughput_bps, 0);
        assert_invariant(&machine);
    }

    #[test]
    fn stop_while_retrying_cancels_the_timer() {
        let mut machine = machine();
        machine.start();
        let (_, generation) = scheduled(&machine.on_connect_lost()).unwrap();

        assert_eq!(machine.stop(), vec![Action::CancelRetry, Action::Shutdown]);
        assert_eq!(machine.phase(), Phase::Closed);

        // the timer may still fire if it raced with stop
        assert!(machine.retry_elapsed(generation).is_empty());
        assert_eq!(machine.phase(), Phase::Closed);
        assert_invariant(&machine);
    }

    #[test]
    fn restart_after_stop_begins_fresh_retry_count() {
        let mut machine = machine();
        machine.start();
        machine.on_connect_lost();
        machine.stop();
        assert_eq!(machine.state().retry_count, 1);

        machine.start();
        assert_eq!(machine.state().retry_count, 0);
        assert_eq!(machine.phase(), Phase::Connecting);
    }

    #[test]
    fn io_error_reconnects_immediately() {
        let mut machine = machine();
        machine.start();
        machine.on_connect_lost();
        let generation = machine.retry_generation;
        machine.retry_elapsed(generation);
        machine.on_connect_success(Instant::now());
        // a previous failure streak must not leak into the fast path
        assert_eq!(machine.state().retry_count, 0);

        assert_eq!(
            machine.handle_event(TransportEvent::IoError, Instant::now()),
            vec![Action::Connect(endpoint("main"))]
        );
        assert_eq!(machine.phase(), Phase::Connecting);
        assert_eq!(machine.state().retry_count, 0);
        assert_invariant(&machine);
    }

    #[test]
    fn io_error_keeps_retry_count_during_streak() {
        let mut machine = machine();
        machine.start();
        let (_, generation) = scheduled(&machine.on_connect_lost()).unwrap();
        machine.retry_elapsed(generation);
        assert_eq!(machine.state().retry_count, 1);

        machine.on_io_error();
        assert_eq!(machine.state().retry_count, 1);
        assert_eq!(machine.phase(), Phase::Connecting);
    }

    #[test]
    fn events_outside_active_phases_are_ignored() {
        let mut machine = machine();
        let now = Instant::now();
        assert!(machine.on_connect_success(now).is_empty());
        assert!(machine.on_connect_lost().is_empty());
        assert!(machine.on_io_error().is_empty());
        assert_eq!(machine.phase(), Phase::Idle);

        machine.start();
        machine.on_connect_lost();
        // stale success while waiting for the timer
        assert!(machine.on_connect_success(now).is_empty());
        assert_eq!(machine.phase(), Phase::Retrying);
        assert_invariant(&machine);
    }

    #[test]
    fn start_while_retrying_connects_now() {
        let mut machine = machine();
        machine.start();
        let (_, generation) = scheduled(&machine.on_connect_lost()).unwrap();

        assert_eq!(
            machine.start(),
            vec![Action::CancelRetry, Action::Connect(endpoint("main"))]
        );
        assert_eq!(machine.state().retry_count, 1);
        assert!(machine.retry_elapsed(generation).is_empty());
        assert_eq!(machine.phase(), Phase::Connecting);
    }

    #[test]
    fn configuration_change_restarts_wanted_session() {
        let mut machine = machine();
        machine.start();
        machine.on_connect_success(Instant::now());

        let actions = machine.configuration_changed(Some(endpoint("backup")));
        assert_eq!(
            actions,
            vec![Action::Shutdown, Action::Connect(endpoint("backup"))]
        );
        assert_eq!(machine.phase(), Phase::Connecting);
        assert_eq!(machine.snapshot().connection_name.as_deref(), Some("backup"));
    }

    #[test]
    fn configuration_change_does_not_start_idle_session() {
        let mut machine = SessionMachine::new(None, DEFAULT_MAX_RETRY_COUNT);
        assert!(machine.configuration_changed(Some(endpoint("main"))).is_empty());
        assert_eq!(machine.phase(), Phase::Idle);

        let mut stopped = machine.clone();
        stopped.start();
        stopped.stop();
        assert!(stopped.configuration_changed(Some(endpoint("other"))).is_empty());
        assert_eq!(stopped.phase(), Phase::Closed);
        assert_eq!(stopped.snapshot().connection_name.as_deref(), Some("other"));
    }

    #[test]
    fn configuration_change_to_nothing_closes() {
        let mut machine = machine();
        machine.start();
        assert_eq!(machine.configuration_changed(None), vec![Action::Shutdown]);
        assert_eq!(machine.phase(), Phase::Closed);
        assert!(machine.endpoint().is_none());
    }

    #[test]
    fn configuration_change_resumes_after_ceiling() {
        let mut machine = SessionMachine::new(Some(endpoint("main")), 0);
        machine.start();
        let (_, generation) = scheduled(&machine.on_connect_lost()).unwrap();
        machine.retry_elapsed(generation);
        assert_eq!(machine.on_connect_lost(), vec![Action::Shutdown]);

        let actions = machine.configuration_changed(Some(endpoint("main")));
        assert_eq!(actions, vec![Action::Connect(endpoint("main"))]);
        assert_eq!(machine.state().retry_count, 0);
    }

    #[test]
    fn throughput_only_recorded_while_live() {
        let mut machine = machine();
        machine.record_throughput(1_000);
        assert_eq!(machine.state().current_throughput_bps, 0);
        machine.start();
        machine.on_connect_success(Instant::now());
        machine.record_throughput(1_000);
        assert_eq!(machine.state().current_throughput_bps, 1_000);
    }
}
