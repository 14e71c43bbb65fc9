//! Mailbox façade: the stable, user-facing API. Hides relay-session
//! lifecycle, guest resolution, and response parsing behind message and
//! file commands.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::RelayConfig;
use crate::crypto::{self, KEY_LEN};
use crate::encoding::{from_base64, from_base64_fixed, to_base64};
use crate::error::ZaxError;
use crate::keyring::Keyring;
use crate::message::{EncryptedMessage, FileUploadMetadata, ZaxMessage};
use crate::relay::{CommandResponse, RelayCommand, RelaySession};
use crate::store::StorageDriver;
use crate::transport::Transport;

/// Outcome of `startFileUpload`: everything the sender needs to push chunks
/// and everything the receiver will eventually need to pull them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUploadHandle {
    pub upload_id: String,
    pub max_chunk_size: u64,
    pub storage_token: String,
    pub skey: [u8; 32],
}

#[derive(Deserialize)]
struct RawRecord {
    from: String,
    kind: String,
    data: String,
    nonce: String,
    time: i64,
}

#[derive(Deserialize)]
struct RawFileEnvelope {
    nonce: String,
    ctext: String,
    #[serde(rename = "uploadID")]
    upload_id: String,
}

/// A client-side identity bound to one long-term Curve25519 comm keypair,
/// talking to zero or more relay URLs.
pub struct Mailbox {
    keyring: RwLock<Keyring>,
    transport: Arc<dyn Transport>,
    config: RelayConfig,
    /// One lock per relay URL, so concurrent calls against different URLs
    /// never block each other (§4.5.2, §5).
    sessions: Mutex<HashMap<String, Arc<Mutex<RelaySession>>>>,
}

impl Mailbox {
    fn assemble(transport: Arc<dyn Transport>, config: RelayConfig, keyring: Keyring) -> Self {
        Mailbox {
            keyring: RwLock::new(keyring),
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a fresh keyring under `identity`.
    pub async fn new(
        driver: Arc<dyn StorageDriver>,
        transport: Arc<dyn Transport>,
        config: RelayConfig,
        identity: &str,
    ) -> Result<Self, ZaxError> {
        let keyring = Keyring::new(driver, identity).await?;
        Ok(Self::assemble(transport, config, keyring))
    }

    /// Derive the comm key deterministically from `seed` (`sk = sha512(seed)[..32]`).
    pub async fn from_seed(
        driver: Arc<dyn StorageDriver>,
        transport: Arc<dyn Transport>,
        config: RelayConfig,
        identity: &str,
        seed: &[u8],
    ) -> Result<Self, ZaxError> {
        let mut keyring = Keyring::new(driver, identity).await?;
        keyring.set_comm_from_seed(seed).await?;
        Ok(Self::assemble(transport, config, keyring))
    }

    /// Set the comm key from a raw 32-byte secret key.
    pub async fn from_sec_key(
        driver: Arc<dyn StorageDriver>,
        transport: Arc<dyn Transport>,
        config: RelayConfig,
        identity: &str,
        sk: [u8; KEY_LEN],
    ) -> Result<Self, ZaxError> {
        let mut keyring = Keyring::new(driver, identity).await?;
        keyring.set_comm_from_sec_key(sk).await?;
        Ok(Self::assemble(transport, config, keyring))
    }

    /// Restore a mailbox from a [`Keyring::backup`] string.
    pub async fn from_backup(
        driver: Arc<dyn StorageDriver>,
        transport: Arc<dyn Transport>,
        config: RelayConfig,
        identity: &str,
        backup_string: &str,
    ) -> Result<Self, ZaxError> {
        let keyring = Keyring::from_backup(driver, identity, backup_string).await?;
        Ok(Self::assemble(transport, config, keyring))
    }

    pub async fn get_pub_comm_key(&self) -> [u8; KEY_LEN] {
        self.keyring.read().await.get_pub_comm_key()
    }

    pub async fn get_private_comm_key(&self) -> [u8; KEY_LEN] {
        self.keyring.read().await.get_private_comm_key()
    }

    pub async fn get_hpk(&self) -> String {
        self.keyring.read().await.get_hpk()
    }

    pub async fn add_guest(&self, tag: &str, public_key: [u8; KEY_LEN]) -> Result<(), ZaxError> {
        self.keyring.write().await.add_guest(tag, public_key).await
    }

    pub async fn remove_guest(&self, tag: &str) -> Result<(), ZaxError> {
        self.keyring.write().await.remove_guest(tag).await
    }

    pub async fn backup(&self) -> String {
        self.keyring.read().await.backup()
    }

    async fn guest_key(&self, tag: &str) -> Result<[u8; KEY_LEN], ZaxError> {
        self.keyring
            .read()
            .await
            .get_guest_key(tag)
            .ok_or_else(|| ZaxError::invariant(format!("unknown guest: {tag}")))
    }

    /// Encrypt `message` toward `guest_tag` without touching a relay. Used
    /// for direct key-exchange style payloads (see the crate-level
    /// end-to-end exchange scenario).
    pub async fn encode(&self, guest_tag: &str, message: &str) -> Result<EncryptedMessage, ZaxError> {
        let guest_pk = self.guest_key(guest_tag).await?;
        let comm_key = self.keyring.read().await.comm_keys();
        let nonce = crypto::make_nonce(None);
        let ctext = crypto::box_seal(message.as_bytes(), &nonce, &guest_pk, &comm_key);
        Ok(EncryptedMessage {
            nonce: to_base64(&nonce),
            ctext: to_base64(&ctext),
        })
    }

    /// Decrypt a `box` payload from `guest_tag` without touching a relay.
    pub async fn decode(&self, guest_tag: &str, nonce: &str, ctext: &str) -> Result<String, ZaxError> {
        let guest_pk = self.guest_key(guest_tag).await?;
        let comm_key = self.keyring.read().await.comm_keys();
        let nonce: [u8; crypto::BOX_NONCE_LEN] = from_base64_fixed(nonce)?;
        let ctext = from_base64(ctext)?;
        let plaintext = crypto::box_open(&ctext, &nonce, &guest_pk, &comm_key)?;
        String::from_utf8(plaintext).map_err(|_| ZaxError::invariant("decode: decrypted payload is not valid UTF-8"))
    }

    /// The per-URL session for `url`, creating one if this is the first
    /// call against it. Each URL gets its own lock, so a slow handshake or
    /// PoW search on one relay never blocks traffic to another.
    async fn session_for(&self, url: &str) -> Arc<Mutex<RelaySession>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RelaySession::new(url))))
            .clone()
    }

    /// Ensure a connected session exists for `url`, then run one `/command`
    /// round trip. A session/token deadline passed between calls is
    /// recovered silently by reconnecting before the send; an HTTP 401
    /// observed *during* the send invalidates the session for the next
    /// call but is otherwise surfaced to this call's caller (§4.5.6, §7).
    async fn run_command(
        &self,
        url: &str,
        cmd: RelayCommand,
        params: serde_json::Value,
        extra_line: Option<&[u8]>,
    ) -> Result<CommandResponse, ZaxError> {
        let hpk = self.keyring.read().await.get_hpk();
        let session_lock = self.session_for(url).await;
        let mut session = session_lock.lock().await;

        if !session.connected() {
            let comm_key = self.keyring.read().await.comm_keys();
            session.connect(self.transport.as_ref(), &self.config, &comm_key).await?;
        }

        let result = session
            .send_command(self.transport.as_ref(), &self.config, &hpk, cmd, params, extra_line)
            .await;

        if let Err(ZaxError::Network { status: Some(401) }) = &result {
            session.invalidate();
        }
        result
    }

    fn expect_json(cmd: &str, response: CommandResponse) -> Result<serde_json::Value, ZaxError> {
        match response {
            CommandResponse::Json(v) => Ok(v),
            _ => Err(ZaxError::invariant(format!("{cmd}: unexpected response shape"))),
        }
    }

    fn expect_raw(cmd: &str, response: CommandResponse) -> Result<String, ZaxError> {
        match response {
            CommandResponse::Raw(s) => Ok(s),
            _ => Err(ZaxError::invariant(format!("{cmd}: unexpected response shape"))),
        }
    }

    /// Upload a message to `guest_tag`. `encrypt` selects `box`-sealed
    /// delivery over the legacy plaintext path.
    pub async fn upload(&self, url: &str, guest_tag: &str, message: &str, encrypt: bool) -> Result<String, ZaxError> {
        let guest_pk = self.guest_key(guest_tag).await?;
        let to = to_base64(&crypto::h2(&guest_pk));

        let data = if encrypt {
            let comm_key = self.keyring.read().await.comm_keys();
            let nonce = crypto::make_nonce(None);
            let ctext = crypto::box_seal(message.as_bytes(), &nonce, &guest_pk, &comm_key);
            serde_json::to_string(&EncryptedMessage {
                nonce: to_base64(&nonce),
                ctext: to_base64(&ctext),
            })
            .expect("EncryptedMessage is always serializable")
        } else {
            message.to_string()
        };

        let params = serde_json::json!({ "to": to, "data": data });
        let response = self.run_command(url, RelayCommand::Upload, params, None).await?;
        Self::expect_raw("upload", response)
    }

    /// Download every pending message and resolve senders against the
    /// keyring.
    pub async fn download(&self, url: &str) -> Result<Vec<ZaxMessage>, ZaxError> {
        let response = self.run_command(url, RelayCommand::Download, serde_json::json!({}), None).await?;
        let value = Self::expect_json("download", response)?;
        let records: Vec<RawRecord> = serde_json::from_value(value)
            .map_err(|e| ZaxError::protocol(url, Some("download"), format!("malformed record list: {e}")))?;

        let mut messages = Vec::with_capacity(records.len());
        for record in records {
            messages.push(self.resolve_record(url, record).await?);
        }
        Ok(messages)
    }

    async fn resolve_record(&self, url: &str, record: RawRecord) -> Result<ZaxMessage, ZaxError> {
        let sender_tag = self.keyring.read().await.get_tag_by_hpk(&record.from);

        let Some(sender_tag) = sender_tag else {
            return Ok(ZaxMessage::Plain {
                data: record.data,
                from: record.from,
                nonce: record.nonce,
                time: record.time,
            });
        };

        match record.kind.as_str() {
            "message" => self.resolve_text_message(record, sender_tag).await,
            "file" => self.resolve_file_message(url, record, sender_tag).await,
            other => Err(ZaxError::protocol(url, Some("download"), format!("unrecognized message kind: {other}"))),
        }
    }

    async fn resolve_text_message(&self, record: RawRecord, sender_tag: String) -> Result<ZaxMessage, ZaxError> {
        let envelope: Option<EncryptedMessage> = serde_json::from_str(&record.data).ok();

        let text = match envelope {
            Some(envelope) => {
                let guest_pk = self.guest_key(&sender_tag).await?;
                let comm_key = self.keyring.read().await.comm_keys();
                let decrypted = (|| -> Result<String, ZaxError> {
                    let nonce: [u8; crypto::BOX_NONCE_LEN] = from_base64_fixed(&envelope.nonce)?;
                    let ctext = from_base64(&envelope.ctext)?;
                    let plaintext = crypto::box_open(&ctext, &nonce, &guest_pk, &comm_key)?;
                    String::from_utf8(plaintext)
                        .map_err(|_| ZaxError::invariant("download: decrypted payload is not valid UTF-8"))
                })();

                match decrypted {
                    Ok(text) => text,
                    Err(ZaxError::Crypto { .. }) => record.data.clone(),
                    Err(e) => return Err(e),
                }
            }
            None => record.data.clone(),
        };

        Ok(ZaxMessage::TextMessage {
            data: text,
            sender_tag,
            nonce: record.nonce,
            time: record.time,
        })
    }

    async fn resolve_file_message(&self, url: &str, record: RawRecord, sender_tag: String) -> Result<ZaxMessage, ZaxError> {
        let envelope: RawFileEnvelope = serde_json::from_str(&record.data)
            .map_err(|e| ZaxError::protocol(url, Some("download"), format!("malformed file envelope: {e}")))?;

        let guest_pk = self.guest_key(&sender_tag).await?;
        let comm_key = self.keyring.read().await.comm_keys();
        let nonce: [u8; crypto::BOX_NONCE_LEN] = from_base64_fixed(&envelope.nonce)?;
        let ctext = from_base64(&envelope.ctext)?;
        let plaintext = crypto::box_open(&ctext, &nonce, &guest_pk, &comm_key)?;
        let metadata: FileUploadMetadata = serde_json::from_slice(&plaintext)
            .map_err(|e| ZaxError::protocol(url, Some("download"), format!("malformed file metadata: {e}")))?;

        Ok(ZaxMessage::FileMetadata {
            data: metadata,
            sender_tag,
            upload_id: envelope.upload_id,
            nonce: record.nonce,
            time: record.time,
        })
    }

    pub async fn count(&self, url: &str) -> Result<i64, ZaxError> {
        let response = self.run_command(url, RelayCommand::Count, serde_json::json!({}), None).await?;
        let value = Self::expect_json("count", response)?;
        value
            .as_i64()
            .ok_or_else(|| ZaxError::protocol(url, Some("count"), "expected an integer"))
    }

    /// TTL-style status (redis semantics): `-2` missing, `-1` never expires,
    /// `>= 0` seconds remaining. Surfaced verbatim.
    pub async fn message_status(&self, url: &str, token: &str) -> Result<i64, ZaxError> {
        let params = serde_json::json!({ "token": token });
        let response = self.run_command(url, RelayCommand::MessageStatus, params, None).await?;
        let raw = Self::expect_raw("messageStatus", response)?;
        raw.trim()
            .parse()
            .map_err(|_| ZaxError::protocol(url, Some("messageStatus"), "non-integer response"))
    }

    pub async fn delete(&self, url: &str, nonces: &[String]) -> Result<i64, ZaxError> {
        let params = serde_json::json!({ "nonces": nonces });
        let response = self.run_command(url, RelayCommand::Delete, params, None).await?;
        let raw = Self::expect_raw("delete", response)?;
        raw.trim()
            .parse()
            .map_err(|_| ZaxError::protocol(url, Some("delete"), "non-integer response"))
    }

    /// Announce an incoming file transfer: generate a fresh per-file
    /// symmetric key, fold it into `metadata`, and deliver the encrypted
    /// metadata to `guest_tag`.
    pub async fn start_file_upload(
        &self,
        url: &str,
        guest_tag: &str,
        mut metadata: FileUploadMetadata,
    ) -> Result<FileUploadHandle, ZaxError> {
        let guest_pk = self.guest_key(guest_tag).await?;
        let skey: [u8; 32] = crypto::random_bytes(32)
            .try_into()
            .expect("random_bytes(32) returns exactly 32 bytes");
        metadata.skey = to_base64(&skey);

        let comm_key = self.keyring.read().await.comm_keys();
        let plaintext = serde_json::to_vec(&metadata)
            .map_err(|e| ZaxError::protocol(url, Some("startFileUpload"), format!("failed to serialize metadata: {e}")))?;
        let nonce = crypto::make_nonce(None);
        let ctext = crypto::box_seal(&plaintext, &nonce, &guest_pk, &comm_key);

        let to = to_base64(&crypto::h2(&guest_pk));
        let params = serde_json::json!({
            "to": to,
            "file_size": metadata.orig_size,
            "metadata": { "nonce": to_base64(&nonce), "ctext": to_base64(&ctext) },
        });

        let response = self.run_command(url, RelayCommand::StartFileUpload, params, None).await?;
        let value = Self::expect_json("startFileUpload", response)?;

        let upload_id = value["uploadID"]
            .as_str()
            .ok_or_else(|| ZaxError::protocol(url, Some("startFileUpload"), "missing uploadID"))?
            .to_string();
        let max_chunk_size = value["max_chunk_size"]
            .as_u64()
            .ok_or_else(|| ZaxError::protocol(url, Some("startFileUpload"), "missing max_chunk_size"))?;
        let storage_token = value["storage_token"]
            .as_str()
            .ok_or_else(|| ZaxError::protocol(url, Some("startFileUpload"), "missing storage_token"))?
            .to_string();

        Ok(FileUploadHandle {
            upload_id,
            max_chunk_size,
            storage_token,
            skey,
        })
    }

    /// Symmetric-encrypt and push one chunk of a file transfer.
    pub async fn upload_file_chunk(
        &self,
        url: &str,
        upload_id: &str,
        chunk: &[u8],
        part: u32,
        total_parts: u32,
        skey: &[u8; 32],
    ) -> Result<(), ZaxError> {
        if part >= total_parts {
            return Err(ZaxError::protocol(
                url,
                Some("uploadFileChunk"),
                format!("part {part} >= totalParts {total_parts}"),
            ));
        }

        let nonce = crypto::make_nonce(None);
        let raw_ctext = crypto::secretbox(chunk, &nonce, skey);

        let params = serde_json::json!({
            "uploadID": upload_id,
            "part": part,
            "last_chunk": part + 1 == total_parts,
            "nonce": to_base64(&nonce),
        });

        let response = self
            .run_command(url, RelayCommand::UploadFileChunk, params, Some(&raw_ctext))
            .await?;
        Self::expect_json("uploadFileChunk", response)?;
        Ok(())
    }

    /// Pull one chunk and recover its plaintext under `skey`.
    pub async fn download_file_chunk(&self, url: &str, upload_id: &str, part: u32, skey: &[u8; 32]) -> Result<Vec<u8>, ZaxError> {
        let params = serde_json::json!({ "uploadID": upload_id, "part": part });
        let response = self.run_command(url, RelayCommand::DownloadFileChunk, params, None).await?;
        match response {
            CommandResponse::FileChunk { nonce, raw_ctext } => crypto::secretbox_open(&raw_ctext, &nonce, skey),
            _ => Err(ZaxError::invariant("downloadFileChunk: unexpected response shape")),
        }
    }

    pub async fn file_status(&self, url: &str, upload_id: &str) -> Result<String, ZaxError> {
        let params = serde_json::json!({ "uploadID": upload_id });
        let response = self.run_command(url, RelayCommand::FileStatus, params, None).await?;
        let value = Self::expect_json("fileStatus", response)?;
        value["status"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ZaxError::protocol(url, Some("fileStatus"), "missing status"))
    }

    pub async fn delete_file(&self, url: &str, upload_id: &str) -> Result<String, ZaxError> {
        let params = serde_json::json!({ "uploadID": upload_id });
        let response = self.run_command(url, RelayCommand::DeleteFile, params, None).await?;
        let value = Self::expect_json("deleteFile", response)?;
        value["status"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ZaxError::protocol(url, Some("deleteFile"), "missing status"))
    }

    /// Download every pending message and return the metadata of the
    /// `FileMetadata` entry matching `upload_id`.
    pub async fn get_file_metadata(&self, url: &str, upload_id: &str) -> Result<FileUploadMetadata, ZaxError> {
        let messages = self.download(url).await?;
        messages
            .into_iter()
            .find_map(|m| match m {
                ZaxMessage::FileMetadata { data, upload_id: uid, .. } if uid == upload_id => Some(data),
                _ => None,
            })
            .ok_or_else(|| ZaxError::invariant(format!("no file metadata for uploadID {upload_id}")))
    }
}
