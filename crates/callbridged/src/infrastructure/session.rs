//! The relay loop for one authenticated connection.
//!
//! ```text
//!            ┌──────────── tokio::select! ────────────┐
//! client ───▶│ read_lines   → ClientLine → api.command │──▶ outbox ──▶ client
//! external ─▶│ events.recv  → translate_event          │──▶ outbox ──▶ client
//!            │ external_timer → PING command           │
//!            │ client_timer   → PING line              │──────────────▶ client
//!            │ client deadline, shutdown → teardown    │
//!            └─────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one task.  A client line is handled to completion
//! (command sent, reply written) before the next branch is polled, so
//! replies never interleave with each other, and events are written in the
//! order the adapter queued them.  While a command is in flight the event
//! queue keeps being drained into the outbox, so an adapter blocked on a
//! full queue can still deliver the reply.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep_until, timeout};
use tracing::{debug, info, warn};

use callbridge_core::protocol::PING;
use callbridge_core::ClientLine;

use crate::application::{translate_event, translate_reply, ApiError, EventReceiver, ExternalApi};
use crate::domain::{LivenessConfig, Outbox, TeardownReason};
use crate::infrastructure::connection::Connection;
use crate::infrastructure::liveness::LivenessSupervisor;
use crate::infrastructure::shutdown::ShutdownSignal;

/// Everything a session borrows from the listener.
pub struct SessionContext<'a> {
    pub api: &'a dyn ExternalApi,
    pub events: &'a mut EventReceiver,
    pub outbox: &'a mut Outbox,
    pub liveness: &'a LivenessConfig,
    pub shutdown: &'a ShutdownSignal,
}

/// What woke the loop up.
enum Wake {
    Lines(Vec<String>),
    Event(String),
    ExternalProbe,
    ClientProbe,
    Stop(TeardownReason),
}

/// Relays between the client and the external API until the connection ends.
///
/// `pending` holds commands the client pipelined behind its password; they
/// are executed first, in order.  Lines left in the outbox by a previous
/// client are written before anything else.
///
/// Always tears the connection down before returning and yields the one
/// reason recorded for it.
pub async fn relay<S>(
    conn: &mut Connection<S>,
    ctx: SessionContext<'_>,
    pending: Vec<String>,
) -> TeardownReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let SessionContext {
        api,
        events,
        outbox,
        liveness: config,
        shutdown,
    } = ctx;
    let mut session = Session {
        api,
        events,
        outbox,
        liveness: LivenessSupervisor::start(config),
        command_timeout: config.command_timeout,
    };

    if !session.outbox.is_empty() {
        debug!(
            conn = %conn.id(),
            queued = session.outbox.len(),
            "delivering lines queued while disconnected"
        );
    }
    if let Err(reason) = conn.flush_outbox(session.outbox).await {
        return finish(conn, reason).await;
    }

    for line in pending {
        if let Some(reason) = session.handle_client_line(conn, &line).await {
            return finish(conn, reason).await;
        }
    }

    loop {
        let deadline = session.liveness.client_deadline();

        let wake = tokio::select! {
            biased;

            _ = shutdown.wait() => Wake::Stop(TeardownReason::Shutdown),

            read = conn.read_lines() => match read {
                Ok(lines) => Wake::Lines(lines),
                Err(reason) => Wake::Stop(reason),
            },

            event = session.events.recv() => match event {
                Some(raw) => Wake::Event(raw),
                None => Wake::Stop(TeardownReason::ExternalClosed),
            },

            _ = sleep_until(deadline) => Wake::Stop(TeardownReason::LivenessTimeout),

            _ = session.liveness.external_timer.tick() => Wake::ExternalProbe,

            _ = session.liveness.client_timer.tick() => Wake::ClientProbe,
        };

        let outcome = match wake {
            Wake::Lines(lines) => {
                // Any inbound bytes count as liveness, even a partial line.
                session.liveness.record_client_activity();
                let mut outcome = None;
                for line in lines {
                    outcome = session.handle_client_line(conn, &line).await;
                    if outcome.is_some() {
                        break;
                    }
                }
                outcome
            }
            Wake::Event(raw) => {
                session.queue_event(&raw);
                conn.flush_outbox(session.outbox).await.err()
            }
            Wake::ExternalProbe => {
                session.probe_external(conn).await;
                // Events drained during the probe go out now.
                conn.flush_outbox(session.outbox).await.err()
            }
            Wake::ClientProbe => {
                session.liveness.record_client_ping();
                match conn.write_line(PING).await {
                    Ok(()) => {
                        debug!(conn = %conn.id(), "<< {PING}");
                        None
                    }
                    Err(reason) => Some(reason),
                }
            }
            Wake::Stop(reason) => Some(reason),
        };

        if let Some(reason) = outcome {
            return finish(conn, reason).await;
        }
    }
}

/// State of one authenticated connection, borrowed from the listener.
struct Session<'a> {
    api: &'a dyn ExternalApi,
    events: &'a mut EventReceiver,
    outbox: &'a mut Outbox,
    liveness: LivenessSupervisor,
    command_timeout: Duration,
}

impl Session<'_> {
    /// Handles one client line.  Returns `Some` when the connection must end.
    async fn handle_client_line<S>(
        &mut self,
        conn: &mut Connection<S>,
        line: &str,
    ) -> Option<TeardownReason>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let parsed = ClientLine::parse(line);
        let command = match &parsed {
            ClientLine::Empty => return None,
            ClientLine::Pong => {
                debug!(conn = %conn.id(), ">> PONG (keepalive)");
                return None;
            }
            ClientLine::GoOffline(command) | ClientLine::Forward(command) => command.clone(),
        };

        debug!(conn = %conn.id(), ">> {command}");
        let reply = self.run_command(command).await;
        if let Err(e) = &reply {
            warn!(conn = %conn.id(), "command failed: {e}");
        }

        let translated = translate_reply(reply);
        for _ in 0..translated.acks {
            self.liveness.record_external_ack();
        }
        self.outbox.extend(translated.lines);
        if let Err(reason) = conn.flush_outbox(self.outbox).await {
            return Some(reason);
        }

        if matches!(parsed, ClientLine::GoOffline(_)) {
            info!(conn = %conn.id(), "client went offline; closing connection");
            return Some(TeardownReason::ClientOffline);
        }
        None
    }

    /// Sends the periodic `PING` to the external API.  Failures are logged only.
    async fn probe_external<S>(&mut self, conn: &Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let silent_for = self.liveness.external_silence();
        self.liveness.record_external_ping();
        match self.run_command(PING.to_string()).await {
            Ok(lines) => {
                let translated = translate_reply(Ok(lines));
                for _ in 0..translated.acks {
                    self.liveness.record_external_ack();
                }
                if !translated.lines.is_empty() {
                    debug!(
                        conn = %conn.id(),
                        "ignoring {} non-PONG line(s) in ping reply",
                        translated.lines.len()
                    );
                }
            }
            Err(e) => warn!(
                conn = %conn.id(),
                silent_for = ?silent_for,
                "external API ping failed: {e}"
            ),
        }
    }

    /// Runs one command under the command timeout.
    ///
    /// Events raised meanwhile are moved into the outbox ahead of the reply.
    /// A closed event queue is left for the main loop to notice.
    async fn run_command(&mut self, command: String) -> Result<Vec<String>, ApiError> {
        let limit = self.command_timeout;
        let api = self.api;
        let reply = timeout(limit, api.command(command));
        tokio::pin!(reply);
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                result = &mut reply => {
                    return result.unwrap_or_else(|_| Err(ApiError::Timeout(limit)));
                }

                event = self.events.recv(), if events_open => match event {
                    Some(raw) => self.queue_event(&raw),
                    None => events_open = false,
                },
            }
        }
    }

    /// Translates one external event into the outbox.
    fn queue_event(&mut self, raw: &str) {
        let translated = translate_event(raw);
        for _ in 0..translated.acks {
            self.liveness.record_external_ack();
        }
        self.outbox.extend(translated.lines);
    }
}

async fn finish<S>(conn: &mut Connection<S>, reason: TeardownReason) -> TeardownReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match conn.teardown(reason.clone()).await {
        Some(first) => first,
        None => conn.teardown_reason().cloned().unwrap_or(reason),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::external_api::MockExternalApi;
    use crate::infrastructure::connection::tests::peer;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::sync::mpsc;

    struct Harness {
        events_tx: mpsc::Sender<String>,
        events_rx: EventReceiver,
        outbox: Outbox,
        liveness: LivenessConfig,
        shutdown: ShutdownSignal,
    }

    impl Harness {
        fn new() -> Self {
            let (events_tx, events_rx) = mpsc::channel(16);
            Self {
                events_tx,
                events_rx,
                outbox: Outbox::new(),
                liveness: LivenessConfig::default(),
                shutdown: ShutdownSignal::new(),
            }
        }

        fn ctx<'a>(&'a mut self, api: &'a dyn ExternalApi) -> SessionContext<'a> {
            SessionContext {
                api,
                events: &mut self.events_rx,
                outbox: &mut self.outbox,
                liveness: &self.liveness,
                shutdown: &self.shutdown,
            }
        }
    }

    fn pair() -> (Connection<DuplexStream>, DuplexStream) {
        let (server, client) = duplex(4096);
        (
            Connection::new(server, peer(), Duration::from_secs(5)),
            client,
        )
    }

    /// Reads every line the relay wrote until it closed the stream.
    async fn drain(client: DuplexStream) -> Vec<String> {
        let mut lines = BufReader::new(client).lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_pipelined_commands_run_in_order() {
        // Arrange
        let mut api = MockExternalApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_command()
            .withf(|c| c == "SEARCH FRIENDS")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["USERS bob, carol".to_string()]));
        api.expect_command()
            .withf(|c| c == "GET USER bob FULLNAME")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["USER bob FULLNAME Bob".to_string()]));
        let mut h = Harness::new();
        let (mut conn, client) = pair();

        // Act: the client hangs up after its two commands
        let pending = vec![
            "SEARCH FRIENDS".to_string(),
            "GET USER bob FULLNAME".to_string(),
        ];
        let relay_task = relay(&mut conn, h.ctx(&api), pending);
        let client_task = async {
            let (read, mut write) = tokio::io::split(client);
            write.shutdown().await.unwrap();
            let mut lines = BufReader::new(read).lines();
            let mut out = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                out.push(line);
            }
            out
        };
        let (reason, written) = tokio::join!(relay_task, client_task);

        // Assert
        assert_eq!(reason, TeardownReason::ClientClosed);
        assert_eq!(written, vec!["USERS bob, carol", "USER bob FULLNAME Bob"]);
    }

    #[tokio::test]
    async fn test_go_offline_is_forwarded_then_closes() {
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "SET USERSTATUS OFFLINE")
            .times(1)
            .returning(|_| Ok(vec!["USERSTATUS OFFLINE".to_string()]));
        let mut h = Harness::new();
        let (mut conn, client) = pair();

        let reason = relay(
            &mut conn,
            h.ctx(&api),
            vec!["SET USERSTATUS OFFLINE".to_string()],
        )
        .await;

        assert_eq!(reason, TeardownReason::ClientOffline);
        assert_eq!(drain(client).await, vec!["USERSTATUS OFFLINE"]);
    }

    #[tokio::test]
    async fn test_failed_command_becomes_error_line() {
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "FOO")
            .times(1)
            .returning(|_| Err(ApiError::Rejected("unknown command".into())));
        api.expect_command()
            .withf(|c| c == "SET USERSTATUS OFFLINE")
            .returning(|_| Ok(Vec::new()));
        let mut h = Harness::new();
        let (mut conn, client) = pair();

        relay(
            &mut conn,
            h.ctx(&api),
            vec!["FOO".to_string(), "SET USERSTATUS OFFLINE".to_string()],
        )
        .await;

        assert_eq!(
            drain(client).await,
            vec!["ERROR command rejected: unknown command"]
        );
    }

    #[tokio::test]
    async fn test_client_pong_is_not_forwarded() {
        // No expectation other than the final OFFLINE: a forwarded PONG would panic.
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "SET USERSTATUS OFFLINE")
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let mut h = Harness::new();
        let (mut conn, _client) = pair();

        let reason = relay(
            &mut conn,
            h.ctx(&api),
            vec![
                "PONG".to_string(),
                String::new(),
                "SET USERSTATUS OFFLINE".to_string(),
            ],
        )
        .await;

        assert_eq!(reason, TeardownReason::ClientOffline);
    }

    #[tokio::test]
    async fn test_events_are_written_in_order_with_prefix() {
        // Arrange: two events and an API PONG raised back to back
        let api = MockExternalApi::new();
        let mut h = Harness::new();
        h.events_tx
            .send("CHATMESSAGE 42 BODY line1\nline2".to_string())
            .await
            .unwrap();
        h.events_tx
            .send("USER bob ONLINESTATUS AWAY".to_string())
            .await
            .unwrap();
        h.events_tx.send("PONG".to_string()).await.unwrap();
        let (mut conn, client) = pair();

        // Act
        let relay_task = relay(&mut conn, h.ctx(&api), Vec::new());
        let client_task = async {
            let mut lines = BufReader::new(client).lines();
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(lines.next_line().await.unwrap().unwrap());
            }
            // Dropping the client ends the session.
            out
        };
        let (reason, written) = tokio::join!(relay_task, client_task);

        // Assert
        assert_eq!(
            written,
            vec![
                "CHATMESSAGE 42 BODY line1",
                "CHATMESSAGE 42 BODY line2",
                "USER bob ONLINESTATUS AWAY",
            ]
        );
        assert!(matches!(
            reason,
            TeardownReason::ClientClosed | TeardownReason::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_outbox_from_previous_client_is_delivered_first() {
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "SET USERSTATUS OFFLINE")
            .returning(|_| Ok(Vec::new()));
        let mut h = Harness::new();
        h.outbox.extend(["CALL 7 STATUS MISSED".to_string()]);
        let (mut conn, client) = pair();

        relay(
            &mut conn,
            h.ctx(&api),
            vec!["SET USERSTATUS OFFLINE".to_string()],
        )
        .await;

        assert_eq!(drain(client).await, vec!["CALL 7 STATUS MISSED"]);
        assert!(h.outbox.is_empty());
    }

    #[tokio::test]
    async fn test_closed_event_channel_ends_session() {
        let api = MockExternalApi::new();
        let mut h = Harness::new();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        h.events_rx = rx;
        let (mut conn, _client) = pair();

        let reason = relay(&mut conn, h.ctx(&api), Vec::new()).await;

        assert_eq!(reason, TeardownReason::ExternalClosed);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let api = MockExternalApi::new();
        let mut h = Harness::new();
        h.shutdown.trigger();
        let (mut conn, _client) = pair();

        let reason = relay(&mut conn, h.ctx(&api), Vec::new()).await;

        assert_eq!(reason, TeardownReason::Shutdown);
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_is_dropped_at_pong_timeout() {
        // Arrange: the external API answers every ping; the client never speaks
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "PING")
            .returning(|_| Ok(vec!["PONG".to_string()]));
        let mut h = Harness::new();
        let (mut conn, client) = pair();
        let started = tokio::time::Instant::now();

        // Act
        let relay_task = relay(&mut conn, h.ctx(&api), Vec::new());
        let (reason, written) = tokio::join!(relay_task, drain(client));

        // Assert: two client pings (10 s, 20 s), then the 30 s deadline
        assert_eq!(reason, TeardownReason::LivenessTimeout);
        assert_eq!(written, vec!["PING", "PING"]);
        assert!(tokio::time::Instant::now() - started >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_traffic_keeps_session_alive() {
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "PING")
            .returning(|_| Ok(vec!["PONG".to_string()]));
        let mut h = Harness::new();
        let (mut conn, client) = pair();
        let started = tokio::time::Instant::now();

        let relay_task = relay(&mut conn, h.ctx(&api), Vec::new());
        let client_task = async {
            let (read, mut write) = tokio::io::split(client);
            let mut lines = BufReader::new(read).lines();
            // Answer the first three pings, then go quiet.
            for _ in 0..3 {
                assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("PING"));
                write.write_all(b"PONG\n").await.unwrap();
            }
            while lines.next_line().await.unwrap().is_some() {}
        };
        let (reason, ()) = tokio::join!(relay_task, client_task);

        // Last PONG at 30 s, so the deadline is 60 s.
        assert_eq!(reason, TeardownReason::LivenessTimeout);
        assert!(tokio::time::Instant::now() - started >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_external_ping_is_not_fatal() {
        // Arrange: every external ping fails; the client answers pings
        let mut api = MockExternalApi::new();
        api.expect_command()
            .withf(|c| c == "PING")
            .returning(|_| Err(ApiError::Transport("helper exited".into())));
        api.expect_command()
            .withf(|c| c == "SET USERSTATUS OFFLINE")
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let mut h = Harness::new();
        let (mut conn, client) = pair();

        let relay_task = relay(&mut conn, h.ctx(&api), Vec::new());
        let client_task = async {
            let (read, mut write) = tokio::io::split(client);
            let mut lines = BufReader::new(read).lines();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("PING"));
            write.write_all(b"SET USERSTATUS OFFLINE\n").await.unwrap();
            while lines.next_line().await.unwrap().is_some() {}
        };
        let (reason, ()) = tokio::join!(relay_task, client_task);

        // Assert: the session outlived two failed external pings
        assert_eq!(reason, TeardownReason::ClientOffline);
    }

    /// Raises three events on its queue before answering each command.
    struct ChattyApi {
        events: mpsc::Sender<String>,
    }

    #[async_trait::async_trait]
    impl ExternalApi for ChattyApi {
        async fn command(&self, command: String) -> Result<Vec<String>, ApiError> {
            for n in 1..=3 {
                let _ = self.events.send(format!("USER bob MOOD_TEXT {n}")).await;
            }
            Ok(vec![format!("{command} OK")])
        }
    }

    #[tokio::test]
    async fn test_full_event_queue_does_not_stall_command_reply() {
        // Arrange: a one-slot event queue, so the adapter blocks on the
        // second event until the session drains the first
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let api = ChattyApi { events: events_tx };
        let mut outbox = Outbox::new();
        let liveness = LivenessConfig {
            command_timeout: Duration::from_secs(2),
            ..LivenessConfig::default()
        };
        let shutdown = ShutdownSignal::new();
        let (mut conn, client) = pair();
        let ctx = SessionContext {
            api: &api,
            events: &mut events_rx,
            outbox: &mut outbox,
            liveness: &liveness,
            shutdown: &shutdown,
        };

        // Act
        let reason = relay(
            &mut conn,
            ctx,
            vec!["GET X".to_string(), "SET USERSTATUS OFFLINE".to_string()],
        )
        .await;

        // Assert: both commands answered, events drained ahead of the reply
        assert_eq!(reason, TeardownReason::ClientOffline);
        let written = drain(client).await;
        assert!(
            written.iter().all(|l| !l.starts_with("ERROR")),
            "got {written:?}"
        );
        assert_eq!(
            &written[..2],
            ["USER bob MOOD_TEXT 1", "USER bob MOOD_TEXT 2"]
        );
        assert!(written.contains(&"GET X OK".to_string()));
        assert_eq!(
            written.last().map(String::as_str),
            Some("SET USERSTATUS OFFLINE OK")
        );
    }
}
