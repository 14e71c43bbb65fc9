//! Relay session handshake and command envelope.

pub mod commands;
pub mod session;

pub use commands::{CommandResponse, RelayCommand};
pub use session::RelaySession;
