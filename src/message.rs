//! Wire-level and user-facing message types.

use serde::{Deserialize, Serialize};

/// The envelope produced by NaCl `box` or `secretbox`: a nonce paired with
/// its ciphertext, both base64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub nonce: String,
    pub ctext: String,
}

/// Metadata announcing an in-flight file transfer. Delivered only inside an
/// encrypted message; `skey` never reaches the relay in cleartext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileUploadMetadata {
    pub name: String,
    pub orig_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<String>,
    /// Base64-encoded 32-byte symmetric key used to secretbox every chunk.
    pub skey: String,
}

/// A downloaded message, resolved against the recipient's keyring.
#[derive(Debug, Clone, PartialEq)]
pub enum ZaxMessage {
    /// Successfully decrypted (or, on the documented passthrough trigger,
    /// forwarded verbatim) text content from a known guest.
    TextMessage {
        data: String,
        sender_tag: String,
        nonce: String,
        time: i64,
    },
    /// A file-announcement message from a known guest.
    FileMetadata {
        data: FileUploadMetadata,
        sender_tag: String,
        upload_id: String,
        nonce: String,
        time: i64,
    },
    /// Sender's `hpk` is not in the keyring; contents are returned opaquely.
    Plain {
        data: String,
        from: String,
        nonce: String,
        time: i64,
    },
}
