//! Transcript-driven stand-in for the external API (`--mock`).
//!
//! A transcript is a text file of expected commands and canned replies:
//!
//! ```text
//! >> SEARCH FRIENDS
//! << USERS bob, carol
//! >> GET USER bob FULLNAME
//! << USER bob FULLNAME Bob
//! ```
//!
//! Each command must match the next `>>` line exactly; the `<<` lines after it
//! are returned as the reply.  `PING` is always answered with `PONG` and does
//! not consume the transcript.  Blank lines are skipped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use callbridge_core::protocol::{PING, PONG};

use crate::application::{ApiError, EventReceiver, EventSender, ExternalApi};

const COMMAND_MARKER: &str = ">> ";
const REPLY_MARKER: &str = "<< ";

/// A transcript that cannot be used.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot read transcript {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted transcript at line {line}: {text:?}")]
    Corrupt { line: usize, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Exchange {
    command: String,
    replies: Vec<String>,
}

/// Replays a transcript.
pub struct ScriptedApi {
    exchanges: Mutex<VecDeque<Exchange>>,
    // Held so the event channel stays open for the life of the adapter.
    _events: EventSender,
}

impl ScriptedApi {
    /// Reads the transcript at `path`.
    ///
    /// # Errors
    ///
    /// [`ScriptError`] if the file is unreadable or a non-blank line does not
    /// start with `>> ` or `<< `.
    pub fn load(path: &Path, capacity: usize) -> Result<(Self, EventReceiver), ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_transcript(&text, capacity)
    }

    /// Parses transcript text.
    ///
    /// # Errors
    ///
    /// [`ScriptError::Corrupt`] for a line without a marker or a reply that
    /// precedes every command.
    pub fn from_transcript(
        text: &str,
        capacity: usize,
    ) -> Result<(Self, EventReceiver), ScriptError> {
        let exchanges = parse_transcript(text)?;
        debug!("loaded transcript with {} exchanges", exchanges.len());
        let (tx, rx) = mpsc::channel(capacity);
        Ok((
            Self {
                exchanges: Mutex::new(exchanges),
                _events: tx,
            },
            rx,
        ))
    }

    /// Exchanges not yet played.
    pub async fn remaining(&self) -> usize {
        self.exchanges.lock().await.len()
    }
}

#[async_trait]
impl ExternalApi for ScriptedApi {
    async fn command(&self, command: String) -> Result<Vec<String>, ApiError> {
        if command == PING {
            return Ok(vec![PONG.to_string()]);
        }

        let mut exchanges = self.exchanges.lock().await;
        match exchanges.front() {
            Some(next) if next.command == command => {}
            Some(next) => {
                return Err(ApiError::Script(format!(
                    "expected {:?}, got {command:?}",
                    next.command
                )))
            }
            None => {
                return Err(ApiError::Script(format!(
                    "transcript exhausted, got {command:?}"
                )))
            }
        }
        Ok(exchanges
            .pop_front()
            .map(|exchange| exchange.replies)
            .unwrap_or_default())
    }
}

fn parse_transcript(text: &str) -> Result<VecDeque<Exchange>, ScriptError> {
    let mut exchanges: VecDeque<Exchange> = VecDeque::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let corrupt = || ScriptError::Corrupt {
            line: idx + 1,
            text: line.to_string(),
        };

        if let Some(command) = line.strip_prefix(COMMAND_MARKER) {
            exchanges.push_back(Exchange {
                command: command.trim().to_string(),
                replies: Vec::new(),
            });
        } else if let Some(reply) = line.strip_prefix(REPLY_MARKER) {
            exchanges
                .back_mut()
                .ok_or_else(corrupt)?
                .replies
                .push(reply.trim().to_string());
        } else {
            return Err(corrupt());
        }
    }

    Ok(exchanges)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
