//! Line framing for the relay wire protocol.
//!
//! Wire format:
//! ```text
//! <utf-8 text>\n
//! ```
//! One record per line.  A `\r` directly before the terminator is stripped so
//! that gateways sending CRLF are accepted unchanged.
//!
//! # Partial reads
//!
//! TCP and TLS are *stream* transports: a single `read()` may return half a
//! line, or several lines at once.  [`LineBuffer`] accumulates bytes across
//! reads and only hands out complete lines; the trailing fragment stays in the
//! buffer until a later read completes it.
//!
//! # Multi-line events
//!
//! The wrapped service only prefixes the *first* line of a multi-line
//! notification with its record header:
//!
//! ```text
//! CHATMESSAGE 42 BODY first line\nsecond line
//! ```
//!
//! [`encode_event`] repeats the header on every continuation line so the
//! client always sees one self-describing record per line:
//!
//! ```text
//! CHATMESSAGE 42 BODY first line
//! CHATMESSAGE 42 BODY second line
//! ```

use thiserror::Error;

/// Longest line (in bytes, terminator excluded) accepted from a peer.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Number of whitespace-delimited tokens forming a record prefix.
pub const RECORD_PREFIX_TOKENS: usize = 3;

/// Errors raised while decoding the inbound byte stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peer sent more than [`MAX_LINE_LEN`] bytes without a newline.
    #[error("line too long: {len} bytes buffered without a terminator (limit {limit})")]
    LineTooLong { len: usize, limit: usize },
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes every complete line at the front of `bytes`.
///
/// Returns the decoded lines and the number of bytes consumed.  Bytes past
/// `consumed` belong to an unterminated line and must be kept by the caller.
///
/// # Examples
///
/// ```rust
/// use callbridge_core::protocol::decode_lines;
///
/// let (lines, consumed) = decode_lines(b"PING\r\nSEND bob hi\nPAR");
/// assert_eq!(lines, vec!["PING".to_string(), "SEND bob hi".to_string()]);
/// assert_eq!(consumed, 18);
/// ```
pub fn decode_lines(bytes: &[u8]) -> (Vec<String>, usize) {
    let mut lines = Vec::new();
    let mut consumed = 0;

    while let Some(pos) = bytes[consumed..].iter().position(|&b| b == b'\n') {
        let end = consumed + pos;
        lines.push(line_from_bytes(&bytes[consumed..end]));
        consumed = end + 1;
    }

    (lines, consumed)
}

/// Converts the bytes of one line (terminator already removed) to text.
///
/// Invalid UTF-8 is replaced rather than rejected: the gateway is a text
/// relay and one bad byte must not cost the whole connection.
fn line_from_bytes(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Accumulates inbound bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    // Never holds a `\n` between calls.
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
        }
    }

    /// Appends freshly read bytes and returns every line they completed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::LineTooLong`] when the unterminated tail grows
    /// past [`MAX_LINE_LEN`].  The complete lines decoded before that point
    /// are discarded together with the buffer; the connection is expected to
    /// be closed.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProtocolError> {
        self.buf.extend_from_slice(bytes);

        // Only the new bytes can complete a line.
        let lines = if bytes.contains(&b'\n') {
            let (lines, consumed) = decode_lines(&self.buf);
            self.buf.drain(..consumed);
            lines
        } else {
            Vec::new()
        };

        if self.buf.len() > MAX_LINE_LEN {
            let len = self.buf.len();
            self.buf.clear();
            return Err(ProtocolError::LineTooLong {
                len,
                limit: MAX_LINE_LEN,
            });
        }

        Ok(lines)
    }

    /// Number of bytes belonging to the unterminated trailing line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when no partial line is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Splits a raw event from the external API into wire lines.
///
/// Single-line events pass through untouched.  For multi-line events the
/// first [`RECORD_PREFIX_TOKENS`] space-delimited tokens form the record
/// prefix, and every line of the remaining payload is emitted behind that
/// prefix.
///
/// # Examples
///
/// ```rust
/// use callbridge_core::protocol::encode_event;
///
/// let lines = encode_event("EVT 42 BODY line1\nline2");
/// assert_eq!(lines, vec!["EVT 42 BODY line1", "EVT 42 BODY line2"]);
/// ```
pub fn encode_event(raw: &str) -> Vec<String> {
    if !raw.contains('\n') {
        return vec![raw.to_string()];
    }

    let mut tokens = raw.splitn(RECORD_PREFIX_TOKENS + 1, ' ');
    let prefix: Vec<&str> = tokens.by_ref().take(RECORD_PREFIX_TOKENS).collect();

    // A newline inside the header itself leaves nothing sensible to repeat;
    // fall back to one line per physical line.
    if prefix.len() < RECORD_PREFIX_TOKENS || prefix.iter().any(|t| t.contains('\n')) {
        return raw
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
    }

    let prefix = prefix.join(" ");
    let payload = tokens.next().unwrap_or_default();

    payload
        .split('\n')
        .map(|l| {
            let l = l.strip_suffix('\r').unwrap_or(l);
            format!("{prefix} {l}")
        })
        .collect()
}

/// Appends the line terminator and returns the bytes to put on the wire.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 1);
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
