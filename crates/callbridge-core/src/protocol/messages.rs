//! Fixed wire tokens and classification of client lines.

/// Liveness probe sent to the client, and to the external API.
pub const PING: &str = "PING";

/// Liveness acknowledgement.
pub const PONG: &str = "PONG";

/// Sent to the client after a successful handshake.
pub const PASSWORD_OK: &str = "PASSWORD OK";

/// Sent to the client after a failed handshake; the connection closes next.
pub const PASSWORD_KO: &str = "PASSWORD KO";

/// Prefix of the first handshake line.
pub const USERNAME_KEYWORD: &str = "USERNAME";

/// Prefix of the second handshake line.
pub const PASSWORD_KEYWORD: &str = "PASSWORD";

/// Status change that signals the gateway is going away.
pub const GO_OFFLINE: &str = "SET USERSTATUS OFFLINE";

/// Prefix of the line sent to the client when a command fails.
pub const ERROR_PREFIX: &str = "ERROR";

/// An authenticated client line, classified.
///
/// The set of locally handled lines is closed; everything else is forwarded
/// to the external API as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    /// Blank line; ignored.
    Empty,
    /// Answer to a relay `PING`; never forwarded.
    Pong,
    /// `SET USERSTATUS OFFLINE`: forwarded, then the connection is closed.
    GoOffline(String),
    /// Any other command, forwarded verbatim.
    Forward(String),
}

impl ClientLine {
    /// Classifies one decoded line.  Trailing whitespace is trimmed first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use callbridge_core::protocol::ClientLine;
    ///
    /// assert_eq!(ClientLine::parse("PONG\t "), ClientLine::Pong);
    /// assert_eq!(
    ///     ClientLine::parse("SEND bob hi  "),
    ///     ClientLine::Forward("SEND bob hi".to_string())
    /// );
    /// ```
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        match line {
            "" => Self::Empty,
            PONG => Self::Pong,
            GO_OFFLINE => Self::GoOffline(line.to_string()),
            other => Self::Forward(other.to_string()),
        }
    }

    /// The command text to send to the external API, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::GoOffline(c) | Self::Forward(c) => Some(c),
            Self::Empty | Self::Pong => None,
        }
    }
}

/// Returns `true` for the liveness acknowledgement line.
pub fn is_liveness_ack(line: &str) -> bool {
    line.trim_end() == PONG
}

/// Extracts the value of a `<KEYWORD> <value>` handshake line.
///
/// The keyword must be followed by exactly one space; the value is trimmed
/// and must not be empty.
pub fn keyword_value<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?.strip_prefix(' ')?;
    let value = rest.trim();
    (!value.is_empty()).then_some(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
