//! Typed error taxonomy for the mailbox client.
//!
//! Every value that crosses the public API boundary is a [`ZaxError`]
//! variant. Internal helpers may still wrap lower-level errors with
//! `anyhow::Context` while building a `reason` / `detail` string, but they
//! never leak a bare `anyhow::Error` out of this crate.

use thiserror::Error;

/// Errors produced by mailbox, keyring, store, and relay-session operations.
#[derive(Debug, Error)]
pub enum ZaxError {
    /// HTTP transport failed (no response, or a non-2xx we can't otherwise
    /// classify). The caller decides whether to retry.
    #[error("network error (status {status:?})")]
    Network {
        /// HTTP status code, when one was received.
        status: Option<u16>,
    },

    /// The relay returned a response that violates the wire framing or the
    /// per-command parsing rules.
    #[error("protocol error at {url} (command {command:?}): {reason}")]
    Protocol {
        url: String,
        command: Option<String>,
        reason: String,
    },

    /// `box_open` / `secretbox_open` / KV decryption reported an
    /// authentication failure, outside the documented passthrough case in
    /// `Mailbox::download`.
    #[error("crypto error during {operation}")]
    Crypto { operation: String },

    /// Programming error: unknown guest tag, unknown command, attempt to
    /// prove before opening a session, a missing storage row pair, etc.
    #[error("invariant violated: {detail}")]
    Invariant { detail: String },

    /// RNG sanity-check failure, or an HTTP-level timeout.
    #[error("operation timed out")]
    Timeout,
}

impl ZaxError {
    pub fn network(status: Option<u16>) -> Self {
        ZaxError::Network { status }
    }

    pub fn protocol(url: impl Into<String>, command: Option<&str>, reason: impl Into<String>) -> Self {
        ZaxError::Protocol {
            url: url.into(),
            command: command.map(|c| c.to_string()),
            reason: reason.into(),
        }
    }

    pub fn crypto(operation: impl Into<String>) -> Self {
        ZaxError::Crypto {
            operation: operation.into(),
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        ZaxError::Invariant {
            detail: detail.into(),
        }
    }
}

/// Convenience alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, ZaxError>;
