//! Translation between external API output and client wire lines.
//!
//! Pure functions, no I/O: the infrastructure session loop feeds them what
//! the external API returned and writes whatever they produce.
//!
//! ```text
//! External → Client:  raw event / reply text → normalised wire lines
//!                     call: translate_event(), translate_reply()
//!
//! Client → External:  decoded line → ClientLine (closed set) → command
//!                     call: callbridge_core::ClientLine::parse()
//! ```

use callbridge_core::encode_event;
use callbridge_core::protocol::{is_liveness_ack, ERROR_PREFIX};

use crate::application::external_api::ApiError;

/// Client-bound lines produced from external API output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Translated {
    /// Lines to write to the client, in order.
    pub lines: Vec<String>,
    /// Number of `PONG` liveness acknowledgements swallowed.
    pub acks: usize,
}

impl Translated {
    fn push_raw(&mut self, raw: &str) {
        if is_liveness_ack(raw) {
            self.acks += 1;
        } else {
            self.lines.extend(encode_event(raw));
        }
    }
}

/// Translates one asynchronous event.
///
/// A bare `PONG` is relay-internal and produces no client line.
///
/// # Examples
///
/// ```rust
/// use callbridged::application::translate_event;
///
/// let out = translate_event("CHATMESSAGE 9 BODY hi\nthere");
/// assert_eq!(out.lines, vec!["CHATMESSAGE 9 BODY hi", "CHATMESSAGE 9 BODY there"]);
/// assert_eq!(translate_event("PONG").acks, 1);
/// ```
pub fn translate_event(raw: &str) -> Translated {
    let mut out = Translated::default();
    out.push_raw(raw);
    out
}

/// Translates the outcome of one command.
///
/// Successful replies are treated like events.  A failure becomes a single
/// `ERROR <message>` line so every command still gets an answer.
pub fn translate_reply(reply: Result<Vec<String>, ApiError>) -> Translated {
    let mut out = Translated::default();
    match reply {
        Ok(lines) => {
            for raw in &lines {
                out.push_raw(raw);
            }
        }
        Err(e) => out.lines.push(error_line(&e)),
    }
    out
}

/// Formats an external API failure for the client.
pub fn error_line(err: &ApiError) -> String {
    // Keep the reply on one line whatever the error text contains.
    let msg = err.to_string().replace(['\r', '\n'], " ");
    format!("{ERROR_PREFIX} {msg}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
