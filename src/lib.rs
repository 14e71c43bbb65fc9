//! Zax mailbox client library.
//!
//! End-to-end encrypted, mutually anonymous message and file exchange
//! between identities via untrusted relay servers. See [`mailbox::Mailbox`]
//! for the main entry point.

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod keyring;
pub mod mailbox;
pub mod message;
pub mod relay;
pub mod store;
pub mod transport;

pub use error::{Result, ZaxError};
pub use mailbox::Mailbox;
