//! callbridged library crate.
//!
//! A single-client relay between an IRC gateway and the text API of a
//! call/chat service.  The gateway connects over TLS, authenticates with
//! `USERNAME` / `PASSWORD`, and from then on every line it sends is a
//! command for the service; replies and asynchronous notifications flow
//! back as lines.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! IRC gateway (lines over TLS)
//!         ↕
//! [callbridged]
//!   ├── domain/           RelayConfig, TeardownReason, Outbox
//!   ├── application/      ExternalApi trait, reply/event translation
//!   └── infrastructure/
//!         ├── listener/   accept loop, one client at a time
//!         ├── handshake/  USERNAME / PASSWORD over the socket
//!         ├── session/    select! relay loop + keepalive timers
//!         ├── external/   scripted transcript and helper-process adapters
//!         └── config_file/, tls/
//!         ↕
//! call/chat service text API
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `callbridge-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `rustls`.

/// Domain layer: configuration and connection lifecycle types (no I/O).
pub mod domain;

/// Application layer: the external API boundary and message translation.
pub mod application;

/// Infrastructure layer: listener, TLS, sessions and adapters.
pub mod infrastructure;
