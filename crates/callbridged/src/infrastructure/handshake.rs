//! Drives the session gate over a live connection.
//!
//! Reads lines until the gate reaches a verdict, answers `PASSWORD OK` or
//! `PASSWORD KO`, and returns any commands the client pipelined behind its
//! password line.  The whole exchange is bounded by the handshake timeout.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info};

use callbridge_core::protocol::{PASSWORD_KO, PASSWORD_OK};
use callbridge_core::{Credentials, GateStep, SessionGate};

use crate::domain::TeardownReason;
use crate::infrastructure::connection::Connection;

/// Why a client did not get past the gate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Bad username, bad password, or a line that was not the expected
    /// keyword.  `PASSWORD KO` has already been sent.
    #[error("authentication failed")]
    Rejected,

    /// The client did not finish the exchange in time.
    #[error("handshake timed out after {0:?}")]
    TimedOut(Duration),

    /// The transport failed or the client hung up mid-handshake.
    #[error("connection lost during handshake: {0}")]
    Closed(TeardownReason),
}

impl HandshakeError {
    /// The reason the listener records when tearing the connection down.
    pub fn into_teardown(self) -> TeardownReason {
        match self {
            Self::Closed(reason) => reason,
            other => TeardownReason::Handshake(other.to_string()),
        }
    }
}

/// Authenticates the client on `conn`.
///
/// On success `PASSWORD OK` has been written exactly once and the returned
/// lines are the commands the client sent after its password, in order.
/// On failure the connection is left open; the caller tears it down.
///
/// # Errors
///
/// See [`HandshakeError`].
pub async fn authenticate<S>(
    conn: &mut Connection<S>,
    credentials: &Credentials,
    limit: Duration,
) -> Result<Vec<String>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let pending = timeout(limit, exchange(conn, credentials))
        .await
        .map_err(|_| HandshakeError::TimedOut(limit))??;

    info!(
        conn = %conn.id(),
        peer = %conn.peer(),
        pipelined = pending.len(),
        "client authenticated"
    );
    Ok(pending)
}

/// Reads lines until the gate reaches a verdict and writes it.
async fn exchange<S>(
    conn: &mut Connection<S>,
    credentials: &Credentials,
) -> Result<Vec<String>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut gate = SessionGate::new(credentials);

    loop {
        let lines = conn.read_lines().await.map_err(HandshakeError::Closed)?;

        let mut accepted = false;
        for line in &lines {
            match gate.feed(line) {
                GateStep::Continue => {}
                GateStep::Accepted => accepted = true,
                GateStep::Rejected => {
                    conn.set_auth_state(gate.state());
                    // The client may already be gone; the verdict stands either way.
                    if let Err(e) = conn.write_line(PASSWORD_KO).await {
                        debug!(conn = %conn.id(), "could not deliver {PASSWORD_KO}: {e}");
                    }
                    return Err(HandshakeError::Rejected);
                }
            }
        }
        conn.set_auth_state(gate.state());

        if accepted {
            conn.write_line(PASSWORD_OK)
                .await
                .map_err(HandshakeError::Closed)?;
            return Ok(gate.take_pending());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
