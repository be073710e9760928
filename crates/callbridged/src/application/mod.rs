//! Application layer for callbridged.
//!
//! Knows *what* the relay does with each message, not *how* bytes move.
//!
//! # Responsibilities
//!
//! - Defining the [`ExternalApi`] boundary to the wrapped service
//! - Translating external replies and events into client wire lines
//! - Defining the `ApiError` type for external-API failures
//!
//! # What does NOT belong here?
//!
//! - Sockets, TLS and timers (infrastructure layer)
//! - Configuration parsing (infrastructure layer and `main.rs`)

pub mod bridge_service;
pub mod external_api;

pub use bridge_service::{error_line, translate_event, translate_reply, Translated};
pub use external_api::{ApiError, EventReceiver, EventSender, ExternalApi};
