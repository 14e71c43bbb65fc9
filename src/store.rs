//! Encrypted key-value store: a symmetric envelope around an external,
//! untyped string-valued [`StorageDriver`].
//!
//! Every stored value is `secretbox`-encrypted under a storage-wide key
//! that is itself generated once and persisted through the same driver.
//! Ciphertext and nonce are written as two separate rows sharing a tag, so
//! a driver with no transactional guarantees still lets us detect a
//! partially-written row (see [`EncryptedStore::get`]).

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::crypto::{self, SECRETBOX_KEY_LEN};
use crate::encoding::{from_base64, from_base64_fixed, to_base64};
use crate::error::ZaxError;

/// Narrow persistence contract the encrypted store is built on. Production
/// callers back this with whatever they already use for durable storage;
/// [`InMemoryStorageDriver`] is provided for tests and documentation
/// examples.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ZaxError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), ZaxError>;
    async fn remove(&self, key: &str) -> Result<(), ZaxError>;
}

/// In-memory [`StorageDriver`] reference implementation.
#[derive(Default)]
pub struct InMemoryStorageDriver {
    rows: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl InMemoryStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageDriver for InMemoryStorageDriver {
    async fn get(&self, key: &str) -> Result<Option<String>, ZaxError> {
        Ok(self.rows.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ZaxError> {
        self.rows.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ZaxError> {
        self.rows.lock().await.remove(key);
        Ok(())
    }
}

const NONCE_PREFIX: &str = "__nc.";
const STORAGE_KEY_TAG: &str = "storage_key";
const NAMESPACE_SUFFIX: &str = ".v2.stor.vlt12";

fn namespaced(tag: &str, id: &str) -> String {
    format!("{tag}.{id}{NAMESPACE_SUFFIX}")
}

/// Symmetric-encrypted key-value store over a [`StorageDriver`].
pub struct EncryptedStore {
    driver: std::sync::Arc<dyn StorageDriver>,
    id: String,
    storage_key: [u8; SECRETBOX_KEY_LEN],
}

impl EncryptedStore {
    /// Open (or create) the store namespaced under `id`. The first call
    /// generates a fresh 32-byte storage key and persists it; later calls
    /// load that same key.
    pub async fn open(driver: std::sync::Arc<dyn StorageDriver>, id: &str) -> Result<Self, ZaxError> {
        let key_tag = namespaced(STORAGE_KEY_TAG, id);

        let storage_key = match driver.get(&key_tag).await? {
            Some(raw) => {
                let wrapped: String = serde_json::from_str(&raw)
                    .map_err(|e| ZaxError::protocol("", None, format!("corrupt storage key row: {e}")))?;
                from_base64_fixed(&wrapped)?
            }
            None => {
                let key: [u8; SECRETBOX_KEY_LEN] = crypto::random_bytes(SECRETBOX_KEY_LEN)
                    .try_into()
                    .expect("random_bytes(32) returns exactly 32 bytes");
                let wrapped = serde_json::to_string(&to_base64(&key))
                    .expect("base64 string is always valid JSON");
                driver.set(&key_tag, &wrapped).await?;
                key
            }
        };

        tracing::debug!(id, "encrypted store opened");
        Ok(EncryptedStore {
            driver,
            id: id.to_string(),
            storage_key,
        })
    }

    /// Serialize, encrypt, and persist `value` under `tag`.
    pub async fn save<T: Serialize>(&self, tag: &str, value: &T) -> Result<(), ZaxError> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| ZaxError::protocol("", None, format!("failed to serialize value: {e}")))?;
        let nonce = crypto::make_nonce(None);
        let ct = crypto::secretbox(&plaintext, &nonce, &self.storage_key);

        let row_tag = namespaced(tag, &self.id);
        let nonce_tag = format!("{NONCE_PREFIX}{row_tag}");

        self.driver.set(&row_tag, &to_base64(&ct)).await?;
        self.driver.set(&nonce_tag, &to_base64(&nonce)).await?;
        tracing::debug!(tag, "store row saved");
        Ok(())
    }

    /// Load and decrypt the value stored under `tag`. Returns `Ok(None)` if
    /// either half of the row (ciphertext or nonce) is missing.
    pub async fn get<T: DeserializeOwned>(&self, tag: &str) -> Result<Option<T>, ZaxError> {
        let row_tag = namespaced(tag, &self.id);
        let nonce_tag = format!("{NONCE_PREFIX}{row_tag}");

        let (ct_b64, nonce_b64) = match (self.driver.get(&row_tag).await?, self.driver.get(&nonce_tag).await?) {
            (Some(ct), Some(nonce)) => (ct, nonce),
            _ => return Ok(None),
        };

        let ct = from_base64(&ct_b64)?;
        let nonce: [u8; crypto::BOX_NONCE_LEN] = from_base64_fixed(&nonce_b64)?;

        let plaintext = crypto::secretbox_open(&ct, &nonce, &self.storage_key)?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| ZaxError::protocol("", None, format!("failed to parse stored value: {e}")))?;
        Ok(Some(value))
    }

    /// Remove both rows of `tag`, if present.
    pub async fn remove(&self, tag: &str) -> Result<(), ZaxError> {
        let row_tag = namespaced(tag, &self.id);
        let nonce_tag = format!("{NONCE_PREFIX}{row_tag}");
        self.driver.remove(&row_tag).await?;
        self.driver.remove(&nonce_tag).await?;
        Ok(())
    }

    /// Remove the storage-key slot, rendering every existing row
    /// irrecoverable even if the driver still holds the raw ciphertext rows.
    pub async fn self_destruct(&self) -> Result<(), ZaxError> {
        let key_tag = namespaced(STORAGE_KEY_TAG, &self.id);
        self.driver.remove(&key_tag).await?;
        tracing::debug!(id = %self.id, "encrypted store self-destructed");
        Ok(())
    }
}
