//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! The infrastructure layer builds it from the TOML file and the CLI; nothing
//! in here reads files or environment variables.

use std::path::PathBuf;
use std::time::Duration;

use callbridge_core::Credentials;

/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 2727;

/// All runtime configuration for the relay daemon.
///
/// Built once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host name or IP literal to bind to (`0.0.0.0`, `::`, `localhost`, …).
    pub host: String,

    /// TCP port to bind to.
    pub port: u16,

    /// PEM certificate chain presented to the client.
    pub cert_path: PathBuf,

    /// PEM private key matching `cert_path`.
    pub key_path: PathBuf,

    /// Expected username and password verifier.
    pub credentials: Credentials,

    /// Keepalive and timeout settings.
    pub liveness: LivenessConfig,

    /// Which external API adapter to run.
    pub backend: BackendConfig,

    /// Capacity of the external-event queue between the adapter and the bridge.
    pub event_queue_capacity: usize,
}

impl RelayConfig {
    /// `host:port` string handed to the listener.
    pub fn bind_target(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // Bare IPv6 literal.
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Periods and deadlines of the keepalive machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often the external API is sent a `PING` command.
    pub external_ping_interval: Duration,

    /// How often the client is sent a `PING` line.
    pub client_ping_interval: Duration,

    /// Longest client silence tolerated before the connection is torn down.
    pub pong_timeout: Duration,

    /// Upper bound for one external API command, including `PING`.
    pub command_timeout: Duration,

    /// Upper bound for the TLS handshake plus the `USERNAME` / `PASSWORD`
    /// exchange, and for a single write to the client.
    pub handshake_timeout: Duration,
}

impl Default for LivenessConfig {
    /// | Field                  | Default |
    /// |------------------------|---------|
    /// | external_ping_interval | 5 s     |
    /// | client_ping_interval   | 10 s    |
    /// | pong_timeout           | 30 s    |
    /// | command_timeout        | 10 s    |
    /// | handshake_timeout      | 30 s    |
    fn default() -> Self {
        Self {
            external_ping_interval: Duration::from_secs(5),
            client_ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// External API adapter selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Replay a `>>` / `<<` transcript file.
    Scripted { script: PathBuf },

    /// Spawn a helper program speaking the service's text API on stdio.
    Process { program: String, args: Vec<String> },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
