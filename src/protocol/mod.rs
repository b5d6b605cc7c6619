// Protocol module: in-band message types and close codes

pub mod close_codes;
pub mod messages;

pub use messages::{ClientMessage, ProtocolError, ServerMessage};
