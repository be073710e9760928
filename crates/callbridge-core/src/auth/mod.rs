//! Authentication: credential store and session gate.

pub mod credentials;
pub mod gate;

pub use credentials::{password_digest, CredentialError, Credentials};
pub use gate::{GateState, GateStep, SessionGate};
