//! Accept loop: one client at a time, forever.
//!
//! ```text
//! Listening ──accept──▶ TLS handshake ──▶ authenticate ──▶ relay ──▶ teardown
//!     ▲                      │ fail            │ KO                      │
//!     └──────────────────────┴─────────────────┴─────────────────────────┘
//! ```
//!
//! The listener owns everything that must survive a client reconnect: the
//! bound socket, the external API handle, the event receiver and the outbox.
//! A connection borrows them for its lifetime and gives them back on
//! teardown; the next `accept` only happens after that.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use callbridge_core::Credentials;

use crate::application::{EventReceiver, ExternalApi};
use crate::domain::{LivenessConfig, Outbox, RelayConfig, TeardownReason};
use crate::infrastructure::connection::Connection;
use crate::infrastructure::handshake::{authenticate, HandshakeError};
use crate::infrastructure::session::{relay, SessionContext};
use crate::infrastructure::shutdown::ShutdownSignal;

/// How accepted sockets are wrapped before the handshake.
#[derive(Clone)]
pub enum Transport {
    /// TLS with the configured certificate (production).
    Tls(TlsAcceptor),
    /// Plain TCP (tests and local debugging only).
    Plain,
}

/// Counters reported when the accept loop stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    /// TCP connections accepted.
    pub accepted: u64,
    /// Connections that passed authentication.
    pub authenticated: u64,
}

/// The relay's single listening socket and the state it carries across
/// client connections.
pub struct Listener {
    socket: TcpListener,
    transport: Transport,
    credentials: Credentials,
    liveness: LivenessConfig,
    api: Arc<dyn ExternalApi>,
    events: EventReceiver,
    outbox: Outbox,
    shutdown: Arc<ShutdownSignal>,
    summary: ServeSummary,
}

impl Listener {
    /// Binds `config.bind_target()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be resolved or bound (port in
    /// use, missing permission).
    pub async fn bind(
        config: &RelayConfig,
        transport: Transport,
        api: Arc<dyn ExternalApi>,
        events: EventReceiver,
        shutdown: Arc<ShutdownSignal>,
    ) -> anyhow::Result<Self> {
        let target = config.bind_target();
        let socket = TcpListener::bind(&target)
            .await
            .with_context(|| format!("failed to bind relay listener on {target}"))?;

        Ok(Self {
            socket,
            transport,
            credentials: config.credentials.clone(),
            liveness: config.liveness,
            api,
            events,
            outbox: Outbox::new(),
            shutdown,
            summary: ServeSummary::default(),
        })
    }

    /// The address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Propagates the OS error from `getsockname`.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves clients one after another until shutdown.
    ///
    /// # Errors
    ///
    /// Currently never fails once bound; accept errors are logged and the
    /// loop continues.
    pub async fn run(mut self) -> anyhow::Result<ServeSummary> {
        match self.local_addr() {
            Ok(addr) => info!("relay listening on {addr}"),
            Err(e) => warn!("relay listening (local address unknown: {e})"),
        }

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                accepted = self.socket.accept() => accepted,
            };

            let (tcp, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // Transient (e.g. out of file descriptors): keep serving.
                    error!("accept error: {e}");
                    continue;
                }
            };
            self.summary.accepted += 1;
            info!("new client connection from {peer}");

            let reason = match self.transport.clone() {
                Transport::Plain => self.serve(tcp, peer).await,
                Transport::Tls(acceptor) => {
                    let limit = self.liveness.handshake_timeout;
                    let handshake = tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => {
                            info!("shutdown during TLS handshake with {peer}");
                            break;
                        }
                        handshake = timeout(limit, acceptor.accept(tcp)) => handshake,
                    };
                    match handshake {
                        Ok(Ok(tls)) => self.serve(tls, peer).await,
                        Ok(Err(e)) => {
                            warn!("TLS handshake with {peer} failed: {e}");
                            continue;
                        }
                        Err(_) => {
                            warn!("TLS handshake with {peer} timed out");
                            continue;
                        }
                    }
                }
            };

            debug!("connection from {peer} finished: {reason}");
            if !self.outbox.is_empty() {
                info!(
                    "{} line(s) kept for the next client",
                    self.outbox.len()
                );
            }
        }

        info!(
            accepted = self.summary.accepted,
            authenticated = self.summary.authenticated,
            "relay stopped"
        );
        Ok(self.summary)
    }

    /// Authenticates and relays one connection; returns its teardown reason.
    async fn serve<S>(&mut self, stream: S, peer: SocketAddr) -> TeardownReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = Connection::new(stream, peer, self.liveness.handshake_timeout);
        debug!(conn = %conn.id(), %peer, "authenticating");

        // The login may take up to the handshake timeout; shutdown must not.
        let limit = self.liveness.handshake_timeout;
        let login = tokio::select! {
            biased;
            _ = self.shutdown.wait() => Err(HandshakeError::Closed(TeardownReason::Shutdown)),
            login = authenticate(&mut conn, &self.credentials, limit) => login,
        };
        let pending = match login {
            Ok(pending) => pending,
            Err(e) => {
                let reason = e.into_teardown();
                conn.teardown(reason.clone()).await;
                return reason;
            }
        };
        self.summary.authenticated += 1;

        let ctx = SessionContext {
            api: self.api.as_ref(),
            events: &mut self.events,
            outbox: &mut self.outbox,
            liveness: &self.liveness,
            shutdown: &self.shutdown,
        };
        relay(&mut conn, ctx, pending).await
    }
}
