//! The boundary to the wrapped call/chat service.
//!
//! The service is treated as an opaque command/event API:
//!
//! - [`ExternalApi::command`] sends one text command and returns its reply
//!   lines,
//! - asynchronous notifications arrive on an [`EventReceiver`] handed out by
//!   the adapter's constructor.
//!
//! Adapters live in `infrastructure::external`; tests use recording fakes or
//! the `mockall` mock.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Receiving end of the external event queue.
pub type EventReceiver = mpsc::Receiver<String>;

/// Sending end of the external event queue, held by adapters.
pub type EventSender = mpsc::Sender<String>;

/// Errors from the external API.  None of them is fatal to the client
/// connection; the client gets an `ERROR` line instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The command did not complete within the configured bound.
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The adapter could not talk to the service (process gone, pipe broken).
    #[error("external API unavailable: {0}")]
    Transport(String),

    /// The service refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The scripted adapter received a command its transcript did not expect.
    #[error("script mismatch: {0}")]
    Script(String),
}

/// Synchronous command interface of the wrapped service.
///
/// One command is in flight at a time per connection; callers bound each
/// call with `tokio::time::timeout`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalApi: Send + Sync {
    /// Sends `command` and returns zero or more reply lines.
    async fn command(&self, command: String) -> Result<Vec<String>, ApiError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_api_error_messages() {
        assert_eq!(
            ApiError::Timeout(Duration::from_secs(10)).to_string(),
            "command timed out after 10s"
        );
        assert_eq!(
            ApiError::Transport("broken pipe".into()).to_string(),
            "external API unavailable: broken pipe"
        );
    }

    #[tokio::test]
    async fn test_mock_external_api_returns_configured_reply() {
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "GET CURRENTUSERHANDLE")
            .times(1)
            .returning(|_| Ok(vec!["CURRENTUSERHANDLE alice".to_string()]));

        let reply = api.command("GET CURRENTUSERHANDLE".to_string()).await;

        assert_eq!(reply, Ok(vec!["CURRENTUSERHANDLE alice".to_string()]));
    }
}
