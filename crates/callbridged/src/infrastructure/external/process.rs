//! External API reached through a helper process on stdin/stdout.
//!
//! Wire format, one record per physical line in both directions:
//!
//! ```text
//! relay  → helper:  #7 SEARCH FRIENDS
//! helper → relay:   USER carol ONLINESTATUS AWAY       (event)
//! helper → relay:   CHATMESSAGE 9 BODY hi\nthere        (event spanning two lines)
//! helper → relay:   #7+ USERS bob                       (reply record, more follow)
//! helper → relay:   #7 USERS carol                      (last reply record)
//! ```
//!
//! Inside a record `\n` stands for a line break and `\\` for a backslash.
//! `#<id>` with nothing after it ends a reply; on its own it is an empty
//! reply.
//!
//! A reader task splits the helper's stdout into replies (routed to the
//! waiting command by tag) and events (queued on the event channel).  Events
//! the channel has no room for wait in the reader's backlog, so a full event
//! queue never holds up a reply.  When the helper exits, waiting commands
//! fail and the event channel closes.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::application::{ApiError, EventReceiver, EventSender, ExternalApi};

/// A command waiting for the rest of its reply.
struct Waiter {
    reply: oneshot::Sender<Vec<String>>,
    records: Vec<String>,
}

type PendingReplies = Arc<Mutex<HashMap<u64, Waiter>>>;

/// Adapter around a spawned helper program.
pub struct ProcessApi {
    stdin: Mutex<ChildStdin>,
    pending: PendingReplies,
    next_id: AtomicU64,
    exited: Arc<AtomicBool>,
    // Dropping the adapter kills the helper.
    _child: Child,
}

impl ProcessApi {
    /// Spawns `program args…` and starts routing its output.
    ///
    /// # Errors
    ///
    /// Any I/O error from spawning the process.
    pub fn spawn(
        program: &str,
        args: &[String],
        capacity: usize,
    ) -> std::io::Result<(Self, EventReceiver)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("helper stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("helper stdout not captured"))?;

        info!("spawned external API helper {program} (pid {:?})", child.id());

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let exited = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::channel(capacity);

        tokio::spawn(read_helper_output(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&exited),
            events_tx,
        ));

        Ok((
            Self {
                stdin: Mutex::new(stdin),
                pending,
                next_id: AtomicU64::new(0),
                exited,
                _child: child,
            },
            events_rx,
        ))
    }
}

#[async_trait]
impl ExternalApi for ProcessApi {
    async fn command(&self, command: String) -> Result<Vec<String>, ApiError> {
        if command.contains(['\n', '\r']) {
            return Err(ApiError::Rejected("command contains a line break".into()));
        }
        if self.exited.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("helper process exited".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            // Drop entries whose caller gave up (timed out).
            pending.retain(|_, waiter| !waiter.reply.is_closed());
            pending.insert(
                id,
                Waiter {
                    reply: reply_tx,
                    records: Vec::new(),
                },
            );
        }

        let line = format!("#{id} {command}\n");
        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(ApiError::Transport(format!("write to helper failed: {e}")));
        }

        reply_rx
            .await
            .map_err(|_| ApiError::Transport("helper process exited".into()))
    }
}

/// One line of helper output.
#[derive(Debug, PartialEq, Eq)]
enum HelperLine<'a> {
    /// A record of the reply to command `id`; `more` when further records
    /// follow.
    Reply { id: u64, record: &'a str, more: bool },
    Event(&'a str),
}

fn parse_helper_line(line: &str) -> HelperLine<'_> {
    let Some(rest) = line.strip_prefix('#') else {
        return HelperLine::Event(line);
    };
    let (tag, record) = rest.split_once(' ').unwrap_or((rest, ""));
    let (digits, more) = match tag.strip_suffix('+') {
        Some(digits) => (digits, true),
        None => (tag, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return HelperLine::Event(line);
    }
    match digits.parse() {
        Ok(id) => HelperLine::Reply { id, record, more },
        Err(_) => HelperLine::Event(line),
    }
}

/// Expands `\n` and `\\`; any other backslash is kept as is.
fn unescape(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

async fn route_reply(pending: &PendingReplies, id: u64, record: &str, more: bool) {
    let mut pending = pending.lock().await;
    let Some(waiter) = pending.get_mut(&id) else {
        debug!("dropping reply #{id} nobody waits for");
        return;
    };
    if !record.is_empty() {
        waiter.records.push(unescape(record));
    }
    if more {
        return;
    }
    if let Some(waiter) = pending.remove(&id) {
        // The caller may have timed out in the meantime.
        let _ = waiter.reply.send(waiter.records);
    }
}

async fn read_helper_output(
    stdout: ChildStdout,
    pending: PendingReplies,
    exited: Arc<AtomicBool>,
    events: EventSender,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut backlog: VecDeque<String> = VecDeque::new();

    loop {
        let read = tokio::select! {
            permit = events.reserve(), if !backlog.is_empty() => {
                match (permit, backlog.pop_front()) {
                    (Ok(permit), Some(event)) => permit.send(event),
                    (Err(_), _) => {
                        debug!("event receiver gone; dropping {} event(s)", backlog.len() + 1);
                        backlog.clear();
                    }
                    (Ok(_), None) => {}
                }
                continue;
            }
            read = lines.next_line() => read,
        };

        let line = match read {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("external API helper closed its output");
                break;
            }
            Err(e) => {
                warn!("reading from external API helper failed: {e}");
                break;
            }
        };
        let line = line.trim_end_matches('\r');

        match parse_helper_line(line) {
            HelperLine::Reply { id, record, more } => {
                route_reply(&pending, id, record, more).await;
            }
            HelperLine::Event(text) => {
                if events.is_closed() {
                    debug!("event receiver gone; dropping {text:?}");
                } else {
                    backlog.push_back(unescape(text));
                }
            }
        }
    }

    exited.store(true, Ordering::SeqCst);
    // Dropping the senders fails every waiting command.
    pending.lock().await.clear();

    // Whatever the helper said before exiting is still delivered.
    for event in backlog {
        if events.send(event).await.is_err() {
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
