//! The single live client connection.
//!
//! [`Connection`] owns the transport (TLS stream in production, any
//! `AsyncRead + AsyncWrite` in tests), the inbound line buffer and the
//! teardown latch.  It is created by the listener on accept and passed by
//! `&mut` to the handshake and the session loop; nothing else can reach it.
//!
//! # Idempotent teardown
//!
//! Several failure signals can race for the same connection (a write error
//! and an expired pong deadline, say).  [`Connection::teardown`] records the
//! first reason and shuts the write half down once; later calls are no-ops.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use callbridge_core::protocol::encode_line;
use callbridge_core::{GateState, LineBuffer};

use crate::domain::{Outbox, TeardownReason};

/// Size of one socket read.
const READ_CHUNK: usize = 4096;

/// One accepted, possibly authenticated, client connection.
pub struct Connection<S> {
    id: Uuid,
    peer: SocketAddr,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    inbound: LineBuffer,
    read_tmp: Vec<u8>,
    auth: GateState,
    write_timeout: Duration,
    closed: Option<TeardownReason>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly accepted stream.
    ///
    /// `write_timeout` bounds every individual write so a client that stops
    /// reading cannot wedge the relay.
    pub fn new(stream: S, peer: SocketAddr, write_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: Uuid::new_v4(),
            peer,
            reader,
            writer,
            inbound: LineBuffer::new(),
            read_tmp: vec![0u8; READ_CHUNK],
            auth: GateState::AwaitingUsername,
            write_timeout,
            closed: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn auth_state(&self) -> GateState {
        self.auth
    }

    pub(crate) fn set_auth_state(&mut self, state: GateState) {
        self.auth = state;
    }

    /// `true` once [`Connection::teardown`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// The reason recorded by the first teardown, if any.
    pub fn teardown_reason(&self) -> Option<&TeardownReason> {
        self.closed.as_ref()
    }

    /// Performs one read and returns the lines it completed (possibly none).
    ///
    /// Cancel safe: if the future is dropped before completion no bytes are
    /// lost, because bytes are only moved into the line buffer after `read`
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`TeardownReason::ClientClosed`] on EOF,
    /// - [`TeardownReason::Transport`] on a read error,
    /// - [`TeardownReason::Protocol`] when a line exceeds the size limit.
    pub async fn read_lines(&mut self) -> Result<Vec<String>, TeardownReason> {
        if self.closed.is_some() {
            return Err(TeardownReason::ClientClosed);
        }

        let n = match self.reader.read(&mut self.read_tmp).await {
            Ok(0) => {
                debug!(conn = %self.id, "client sent EOF");
                return Err(TeardownReason::ClientClosed);
            }
            Ok(n) => n,
            Err(e) => return Err(TeardownReason::Transport(format!("read failed: {e}"))),
        };

        self.inbound
            .extend(&self.read_tmp[..n])
            .map_err(|e| TeardownReason::Protocol(e.to_string()))
    }

    /// Writes one line plus terminator.
    ///
    /// # Errors
    ///
    /// [`TeardownReason::Transport`] if the write fails or exceeds the write
    /// timeout.
    pub async fn write_line(&mut self, line: &str) -> Result<(), TeardownReason> {
        if self.closed.is_some() {
            return Err(TeardownReason::Transport("connection already closed".into()));
        }

        let bytes = encode_line(line);
        let write_timeout = self.write_timeout;
        let writer = &mut self.writer;
        let write = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };

        match timeout(write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TeardownReason::Transport(format!("write failed: {e}"))),
            Err(_) => Err(TeardownReason::Transport(format!(
                "write timed out after {write_timeout:?}"
            ))),
        }
    }

    /// Writes queued lines until the outbox is empty.
    ///
    /// A line is removed from the outbox only after it was written, so on
    /// failure the unsent remainder stays queued for the next client.
    ///
    /// # Errors
    ///
    /// The first write error, as in [`Connection::write_line`].
    pub async fn flush_outbox(&mut self, outbox: &mut Outbox) -> Result<(), TeardownReason> {
        while let Some(line) = outbox.front() {
            let line = line.to_string();
            self.write_line(&line).await?;
            debug!(conn = %self.id, "<< {line}");
            outbox.pop_delivered();
        }
        Ok(())
    }

    /// Closes the connection once.
    ///
    /// Returns the reason on the first call and `None` on every later call;
    /// the transport is shut down exactly once.
    pub async fn teardown(&mut self, reason: TeardownReason) -> Option<TeardownReason> {
        if self.closed.is_some() {
            debug!(conn = %self.id, %reason, "teardown already done; ignoring");
            return None;
        }
        self.closed = Some(reason.clone());

        // Best effort: the peer may already be gone.
        match timeout(self.write_timeout, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = %self.id, "shutdown after teardown failed: {e}"),
            Err(_) => debug!(conn = %self.id, "shutdown after teardown timed out"),
        }

        if reason.is_error() {
            warn!(conn = %self.id, peer = %self.peer, "connection torn down: {reason}");
        } else {
            debug!(conn = %self.id, peer = %self.peer, "connection closed: {reason}");
        }
        Some(reason)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, ReadBuf};

    /// Duplex stream that counts `poll_shutdown` calls.
    pub(crate) struct CountingStream {
        pub(crate) inner: DuplexStream,
        pub(crate) shutdowns: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for CountingStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    pub(crate) fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn pair() -> (Connection<DuplexStream>, DuplexStream) {
        let (server, client) = duplex(1024);
        (Connection::new(server, peer(), Duration::from_secs(1)), client)
    }

    #[tokio::test]
    async fn test_read_lines_reassembles_partial_reads() {
        let (mut conn, mut client) = pair();

        client.write_all(b"SEND bob ").await.unwrap();
        assert!(conn.read_lines().await.unwrap().is_empty());

        client.write_all(b"hello\r\nPONG\n").await.unwrap();
        assert_eq!(conn.read_lines().await.unwrap(), vec!["SEND bob hello", "PONG"]);
    }

    #[tokio::test]
    async fn test_read_lines_eof_is_client_closed() {
        let (mut conn, client) = pair();
        drop(client);
        assert_eq!(conn.read_lines().await, Err(TeardownReason::ClientClosed));
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let (mut conn, client) = pair();
        conn.write_line("PING").await.unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("PING"));
    }

    #[tokio::test]
    async fn test_flush_outbox_writes_in_order_and_empties_queue() {
        let (mut conn, client) = pair();
        let mut outbox = Outbox::new();
        outbox.extend(["one".to_string(), "two".to_string()]);

        conn.flush_outbox(&mut outbox).await.unwrap();

        assert!(outbox.is_empty());
        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_flush_outbox_keeps_lines_after_failure() {
        let (mut conn, client) = pair();
        drop(client);
        let mut outbox = Outbox::new();
        outbox.extend(["kept".to_string()]);

        let result = conn.flush_outbox(&mut outbox).await;

        assert!(matches!(result, Err(TeardownReason::Transport(_))));
        assert_eq!(outbox.front(), Some("kept"));
    }

    #[tokio::test]
    async fn test_teardown_twice_shuts_down_once() {
        // Arrange: a stream that counts shutdowns
        let (server, _client) = duplex(64);
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let stream = CountingStream {
            inner: server,
            shutdowns: Arc::clone(&shutdowns),
        };
        let mut conn = Connection::new(stream, peer(), Duration::from_secs(1));

        // Act: a write error and a ping timeout racing for the same connection
        let first = conn
            .teardown(TeardownReason::Transport("broken pipe".into()))
            .await;
        let second = conn.teardown(TeardownReason::LivenessTimeout).await;

        // Assert
        assert_eq!(first, Some(TeardownReason::Transport("broken pipe".into())));
        assert_eq!(second, None);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(
            conn.teardown_reason(),
            Some(&TeardownReason::Transport("broken pipe".into()))
        );
    }

    #[tokio::test]
    async fn test_write_after_teardown_is_refused() {
        let (mut conn, _client) = pair();
        conn.teardown(TeardownReason::Shutdown).await;
        assert!(conn.is_closed());
        assert!(conn.write_line("PING").await.is_err());
    }

    #[tokio::test]
    async fn test_teardown_sends_eof_to_client() {
        let (mut conn, client) = pair();
        conn.teardown(TeardownReason::ClientOffline).await;

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
