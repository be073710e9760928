//! # callbridge-core
//!
//! Shared, I/O-free building blocks of the callbridge relay: the line framer,
//! the credential store with its login state machine, and keepalive
//! bookkeeping.
//!
//! # Architecture overview
//!
//! `callbridged` sits between an IRC gateway (the *client*, connecting over
//! TLS) and a call/chat service's text API (the *external API*).  Everything
//! here is pure logic so it can be tested without sockets or a runtime:
//!
//! - **`protocol`** – How lines travel over the wire.  Decoding tolerates
//!   CRLF and partial reads; encoding normalises multi-line events so every
//!   continuation line carries the record prefix.
//!
//! - **`auth`** – The [`Credentials`] store (username + SHA-1 verifier) and
//!   the [`SessionGate`] that walks a connection through
//!   `USERNAME` / `PASSWORD`.
//!
//! - **`liveness`** – [`PingState`], the clock arithmetic behind the two
//!   keepalive probes.

pub mod auth;
pub mod liveness;
pub mod protocol;

pub use auth::{password_digest, CredentialError, Credentials, GateState, GateStep, SessionGate};
pub use liveness::PingState;
pub use protocol::{encode_event, ClientLine, LineBuffer, ProtocolError};
