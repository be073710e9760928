//! Liveness bookkeeping for the two keepalive probes.
//!
//! The relay probes both of its peers:
//!
//! - the **external API** gets a `PING` command every few seconds; a `PONG`
//!   back is recorded but a missing one is never fatal,
//! - the **client** gets a `PING` line every few tens of seconds and must show
//!   *some* traffic within the pong timeout, otherwise the connection is torn
//!   down.
//!
//! [`PingState`] only does the arithmetic.  Timers live in the daemon; the
//! caller passes `now` in, which keeps this module deterministic under test.

use std::time::{Duration, Instant};

/// Probe of the external API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalProbe {
    /// When the last `PING` command was issued.
    pub last_sent: Option<Instant>,
    /// When the last `PONG` was seen from the external API.
    pub last_ack: Option<Instant>,
}

/// Probe of the connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientProbe {
    /// When the last `PING` line was written to the client.
    pub last_sent: Option<Instant>,
    /// Last inbound traffic of any kind from the client.
    pub last_activity: Instant,
}

/// Both probes of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingState {
    pong_timeout: Duration,
    external: ExternalProbe,
    client: ClientProbe,
}

impl PingState {
    /// Starts bookkeeping at authentication time.  The client counts as
    /// active at `now`.
    pub fn new(now: Instant, pong_timeout: Duration) -> Self {
        Self {
            pong_timeout,
            external: ExternalProbe {
                last_sent: None,
                last_ack: None,
            },
            client: ClientProbe {
                last_sent: None,
                last_activity: now,
            },
        }
    }

    /// Records inbound client traffic; any line, not only `PONG`, counts.
    pub fn record_client_activity(&mut self, now: Instant) {
        if now > self.client.last_activity {
            self.client.last_activity = now;
        }
    }

    /// Records a `PING` line written to the client.
    pub fn record_client_ping(&mut self, now: Instant) {
        self.client.last_sent = Some(now);
    }

    /// Records a `PING` command issued to the external API.
    pub fn record_external_ping(&mut self, now: Instant) {
        self.external.last_sent = Some(now);
    }

    /// Records a `PONG` from the external API.
    pub fn record_external_ack(&mut self, now: Instant) {
        self.external.last_ack = Some(now);
    }

    /// Instant after which the client is considered dead.
    pub fn client_deadline(&self) -> Instant {
        self.client.last_activity + self.pong_timeout
    }

    /// Returns `true` once `now` has reached the client deadline.
    pub fn client_expired(&self, now: Instant) -> bool {
        now >= self.client_deadline()
    }

    /// How long the external API has gone without acknowledging a ping.
    ///
    /// `None` until at least one ping has been sent.
    pub fn external_silence(&self, now: Instant) -> Option<Duration> {
        let since = self.external.last_ack.or(self.external.last_sent)?;
        Some(now.saturating_duration_since(since))
    }

    pub fn external(&self) -> &ExternalProbe {
        &self.external
    }

    pub fn client(&self) -> &ClientProbe {
        &self.client
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
