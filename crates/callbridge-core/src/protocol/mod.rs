//! Protocol module containing the line framer and wire tokens.

pub mod framer;
pub mod messages;

pub use framer::{decode_lines, encode_event, encode_line, LineBuffer, ProtocolError, MAX_LINE_LEN};
pub use messages::*;
