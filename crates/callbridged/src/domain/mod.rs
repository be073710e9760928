//! Domain layer for callbridged.
//!
//! Pure types with no I/O: runtime configuration, the reasons a connection
//! can end, and the outbound line queue.

pub mod config;
pub mod connection;

pub use config::{BackendConfig, LivenessConfig, RelayConfig, DEFAULT_PORT};
pub use connection::{Outbox, TeardownReason};
