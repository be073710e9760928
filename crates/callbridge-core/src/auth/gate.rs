//! Session gate: the two-line login state machine.
//!
//! ```text
//! AwaitingUsername ──USERNAME x──▶ AwaitingPassword ──PASSWORD y──▶ Authenticated
//!        │                                │
//!        └──────── anything else ─────────┴────────── bad pair ──▶ Rejected
//! ```
//!
//! The gate is pure: the caller reads lines off the socket, feeds them in, and
//! writes `PASSWORD OK` / `PASSWORD KO` according to the returned
//! [`GateStep`].  Lines fed after the password line (a client pipelining its
//! first commands) are kept as pending lines for the bridge.

use tracing::debug;

use crate::auth::credentials::Credentials;
use crate::protocol::messages::{keyword_value, PASSWORD_KEYWORD, USERNAME_KEYWORD};

/// Authentication state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    AwaitingUsername,
    AwaitingPassword,
    Authenticated,
    Rejected,
}

/// What the caller must do after feeding a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    /// Keep reading.
    Continue,
    /// Credentials accepted: send `PASSWORD OK` and start relaying.
    Accepted,
    /// Handshake failed: send `PASSWORD KO` and close.
    Rejected,
}

/// Per-connection login state machine.
#[derive(Debug)]
pub struct SessionGate<'a> {
    credentials: &'a Credentials,
    state: GateState,
    claimed_username: Option<String>,
    pending: Vec<String>,
}

impl<'a> SessionGate<'a> {
    /// Starts a gate in [`GateState::AwaitingUsername`].
    pub fn new(credentials: &'a Credentials) -> Self {
        Self {
            credentials,
            state: GateState::AwaitingUsername,
            claimed_username: None,
            pending: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Feeds one decoded line into the state machine.
    ///
    /// After [`GateStep::Accepted`] every further line is queued as pending.
    /// After [`GateStep::Rejected`] lines are ignored.
    pub fn feed(&mut self, line: &str) -> GateStep {
        match self.state {
            GateState::AwaitingUsername => match keyword_value(line, USERNAME_KEYWORD) {
                Some(name) => {
                    // A wrong name is only reported together with the password
                    // verdict.
                    self.claimed_username = Some(name.to_string());
                    self.state = GateState::AwaitingPassword;
                    GateStep::Continue
                }
                None => self.reject(),
            },
            GateState::AwaitingPassword => {
                let username = self.claimed_username.take().unwrap_or_default();
                match keyword_value(line, PASSWORD_KEYWORD) {
                    Some(secret) if self.credentials.verify(&username, secret) => {
                        self.state = GateState::Authenticated;
                        GateStep::Accepted
                    }
                    _ => self.reject(),
                }
            }
            GateState::Authenticated => {
                self.pending.push(line.to_string());
                GateStep::Continue
            }
            GateState::Rejected => GateStep::Rejected,
        }
    }

    /// Takes the pipelined lines queued after authentication, in arrival order.
    pub fn take_pending(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    fn reject(&mut self) -> GateStep {
        debug!(from = ?self.state, "login rejected");
        self.state = GateState::Rejected;
        self.claimed_username = None;
        self.pending.clear();
        GateStep::Rejected
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
