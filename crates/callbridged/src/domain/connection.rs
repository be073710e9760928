//! Connection lifecycle types: why a connection ended, and the outbound
//! queue that outlives it.

use std::collections::VecDeque;
use std::fmt;

/// Why a client connection was torn down.
///
/// Every connection ends with exactly one of these, no matter how many
/// failure signals fire at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    /// The client closed its side (EOF).
    ClientClosed,
    /// The client announced `SET USERSTATUS OFFLINE`.
    ClientOffline,
    /// Reading from or writing to the client failed.
    Transport(String),
    /// The client sent bytes that do not frame as lines.
    Protocol(String),
    /// The `USERNAME` / `PASSWORD` exchange failed or timed out.
    Handshake(String),
    /// The client stayed silent past the pong timeout.
    LivenessTimeout,
    /// The external event channel closed (adapter gone).
    ExternalClosed,
    /// The daemon is shutting down.
    Shutdown,
}

impl TeardownReason {
    /// Returns `true` for reasons that indicate a fault rather than an
    /// orderly goodbye.
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::ClientClosed | Self::ClientOffline | Self::Shutdown
        )
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed the connection"),
            Self::ClientOffline => f.write_str("client went offline"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::LivenessTimeout => f.write_str("client pong timeout"),
            Self::ExternalClosed => f.write_str("external API event stream closed"),
            Self::Shutdown => f.write_str("relay shutting down"),
        }
    }
}

/// Lines waiting to be written to the client.
///
/// Owned by the listener, so lines that could not be delivered before a
/// connection died are handed to the next authenticated client first.  A
/// line leaves the queue only after it was written successfully.
#[derive(Debug, Default)]
pub struct Outbox {
    lines: VecDeque<String>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues lines at the back, preserving their order.
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        self.lines.extend(lines);
    }

    /// The next line to write, without removing it.
    pub fn front(&self) -> Option<&str> {
        self.lines.front().map(String::as_str)
    }

    /// Removes the line returned by the last [`Outbox::front`] call.
    pub fn pop_delivered(&mut self) {
        self.lines.pop_front();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
