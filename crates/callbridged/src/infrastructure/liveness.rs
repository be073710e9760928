//! Keepalive timers for one authenticated connection.
//!
//! The supervisor owns two fixed-period intervals (external probe, client
//! probe) and the [`PingState`] bookkeeping that yields the client deadline.
//! It does no I/O itself: the session loop polls the timers in its
//! `select!` and performs the probe on each tick.
//!
//! Timers are created at authentication and dropped with the session, so
//! nothing outlives the connection it supervises.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use callbridge_core::PingState;

use crate::domain::LivenessConfig;

/// Probe timers plus deadline bookkeeping.
///
/// The intervals are public to the crate so the session loop can poll them
/// as disjoint borrows next to the client read.
pub struct LivenessSupervisor {
    pub(crate) external_timer: Interval,
    pub(crate) client_timer: Interval,
    state: PingState,
}

impl LivenessSupervisor {
    /// Starts both timers.  The first tick of each fires one full period
    /// from now, not immediately.
    pub fn start(config: &LivenessConfig) -> Self {
        let now = Instant::now();

        let mut external_timer = interval_at(
            now + config.external_ping_interval,
            config.external_ping_interval,
        );
        external_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut client_timer = interval_at(
            now + config.client_ping_interval,
            config.client_ping_interval,
        );
        client_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            external_timer,
            client_timer,
            state: PingState::new(now.into_std(), config.pong_timeout),
        }
    }

    /// When the client is declared dead unless it sends something first.
    pub fn client_deadline(&self) -> Instant {
        Instant::from_std(self.state.client_deadline())
    }

    pub fn record_client_activity(&mut self) {
        self.state.record_client_activity(Instant::now().into_std());
    }

    pub fn record_client_ping(&mut self) {
        self.state.record_client_ping(Instant::now().into_std());
    }

    pub fn record_external_ping(&mut self) {
        self.state.record_external_ping(Instant::now().into_std());
    }

    pub fn record_external_ack(&mut self) {
        self.state.record_external_ack(Instant::now().into_std());
    }

    /// Time since the external API last answered a ping, or since the
    /// previous ping if it never has.
    pub fn external_silence(&self) -> Option<Duration> {
        self.state.external_silence(Instant::now().into_std())
    }

    pub fn state(&self) -> &PingState {
        &self.state
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
