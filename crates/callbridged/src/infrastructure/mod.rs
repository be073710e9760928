//! Infrastructure layer for callbridged.
//!
//! Everything that touches sockets, files, processes or the clock.
//!
//! # Responsibilities
//!
//! - Loading the TOML configuration and the TLS certificate
//! - Binding the listener and serving one client connection at a time
//! - Driving the `USERNAME` / `PASSWORD` handshake over the socket
//! - Running the relay loop with its keepalive timers
//! - Talking to the wrapped service (scripted transcript or helper process)
//!
//! # What does NOT belong here?
//!
//! - Line framing and credential checks (`callbridge-core`)
//! - Reply and event translation (application layer)

pub mod config_file;
pub mod connection;
pub mod external;
pub mod handshake;
pub mod listener;
pub mod liveness;
pub mod session;
pub mod shutdown;
pub mod tls;

pub use config_file::{load_relay_config, ConfigError, Overrides};
pub use connection::Connection;
pub use handshake::{authenticate, HandshakeError};
pub use listener::{Listener, ServeSummary, Transport};
pub use shutdown::ShutdownSignal;
