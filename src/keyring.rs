//! Identity keyring: the owner's long-term communication keypair plus the
//! guest address book, persisted through an [`EncryptedStore`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::{self, Keys, KEY_LEN};
use crate::encoding::{from_base64_fixed, to_base64};
use crate::error::ZaxError;
use crate::store::{EncryptedStore, StorageDriver};

const COMM_KEY_TAG: &str = "comm_key";
const GUEST_REGISTRY_TAG: &str = "guest_registry";
const BACKUP_COMM_KEY_MARKER: &str = "__::commKey::__";

/// A guest's public key and its derived relay-facing address.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestRecord {
    pub pk: String,
    pub hpk: String,
}

impl GuestRecord {
    fn new(pk: [u8; KEY_LEN]) -> Self {
        GuestRecord {
            pk: to_base64(&pk),
            hpk: to_base64(&crypto::h2(&pk)),
        }
    }

    fn public_key(&self) -> Result<[u8; KEY_LEN], ZaxError> {
        from_base64_fixed(&self.pk)
    }
}

/// Owner keypair plus guest registry, mutated through a single-writer lock
/// and mirrored to the backing [`EncryptedStore`] on every change.
pub struct Keyring {
    store: EncryptedStore,
    comm_key: Keys,
    guests: HashMap<String, GuestRecord>,
}

impl Keyring {
    /// Open the keyring namespaced under `id`: load the comm key and guest
    /// registry if present, otherwise generate a fresh comm key and an
    /// empty registry and persist both.
    pub async fn new(driver: Arc<dyn StorageDriver>, id: &str) -> Result<Self, ZaxError> {
        let store = EncryptedStore::open(driver, id).await?;

        let comm_key = match store.get::<String>(COMM_KEY_TAG).await? {
            Some(sk_b64) => Keys::from_secret_key(from_base64_fixed(&sk_b64)?),
            None => {
                let fresh = Keys::generate();
                store.save(COMM_KEY_TAG, &to_base64(&fresh.secret_key_bytes())).await?;
                fresh
            }
        };

        let guests: HashMap<String, GuestRecord> = store
            .get::<Vec<(String, GuestRecord)>>(GUEST_REGISTRY_TAG)
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();

        tracing::debug!(id, guest_count = guests.len(), "keyring opened");
        Ok(Keyring {
            store,
            comm_key,
            guests,
        })
    }

    async fn persist_guests(&self) -> Result<(), ZaxError> {
        let rows: Vec<(&String, &GuestRecord)> = self.guests.iter().collect();
        self.store.save(GUEST_REGISTRY_TAG, &rows).await
    }

    /// Register (or overwrite) a guest's public key under `tag`.
    pub async fn add_guest(&mut self, tag: &str, public_key: [u8; KEY_LEN]) -> Result<(), ZaxError> {
        self.guests.insert(tag.to_string(), GuestRecord::new(public_key));
        self.persist_guests().await
    }

    /// Remove a guest, if present.
    pub async fn remove_guest(&mut self, tag: &str) -> Result<(), ZaxError> {
        self.guests.remove(tag);
        self.persist_guests().await
    }

    pub fn get_pub_comm_key(&self) -> [u8; KEY_LEN] {
        self.comm_key.public_key()
    }

    /// Clone of the owner's comm keypair, for operations (relay proof,
    /// direct `box` encode/decode) that need the full `Keys` value.
    pub fn comm_keys(&self) -> Keys {
        self.comm_key.clone()
    }

    pub fn get_private_comm_key(&self) -> [u8; KEY_LEN] {
        self.comm_key.secret_key_bytes()
    }

    pub fn get_hpk(&self) -> String {
        to_base64(&crypto::h2(&self.comm_key.public_key()))
    }

    pub fn get_guest_key(&self, tag: &str) -> Option<[u8; KEY_LEN]> {
        self.guests.get(tag).and_then(|g| g.public_key().ok())
    }

    /// Linear scan from a base64 `hpk` back to the owning guest tag. Tag
    /// counts are expected in the hundreds, so this is not indexed.
    pub fn get_tag_by_hpk(&self, hpk: &str) -> Option<String> {
        self.guests
            .iter()
            .find(|(_, record)| record.hpk == hpk)
            .map(|(tag, _)| tag.clone())
    }

    /// Replace the comm key with one derived from `seed` and persist it.
    pub async fn set_comm_from_seed(&mut self, seed: &[u8]) -> Result<(), ZaxError> {
        self.comm_key = Keys::from_seed(seed);
        self.store.save(COMM_KEY_TAG, &to_base64(&self.comm_key.secret_key_bytes())).await
    }

    /// Replace the comm key with a raw secret key and persist it.
    pub async fn set_comm_from_sec_key(&mut self, sk: [u8; KEY_LEN]) -> Result<(), ZaxError> {
        self.comm_key = Keys::from_secret_key(sk);
        self.store.save(COMM_KEY_TAG, &to_base64(&self.comm_key.secret_key_bytes())).await
    }

    /// Serialize the comm secret key and every guest public key into a
    /// single JSON object suitable for [`Keyring::from_backup`].
    pub fn backup(&self) -> String {
        let mut entries: Vec<(String, String)> = vec![(
            BACKUP_COMM_KEY_MARKER.to_string(),
            to_base64(&self.comm_key.secret_key_bytes()),
        )];
        entries.extend(self.guests.iter().map(|(tag, record)| (tag.clone(), record.pk.clone())));

        let map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    /// Recreate a keyring from [`Keyring::backup`] output: set the comm key
    /// from the embedded secret, then add every other entry as a guest.
    pub async fn from_backup(
        driver: Arc<dyn StorageDriver>,
        id: &str,
        backup_string: &str,
    ) -> Result<Self, ZaxError> {
        let map: HashMap<String, String> = serde_json::from_str(backup_string)
            .map_err(|e| ZaxError::protocol("", None, format!("invalid backup payload: {e}")))?;

        let comm_sk_b64 = map
            .get(BACKUP_COMM_KEY_MARKER)
            .ok_or_else(|| ZaxError::invariant("backup is missing the comm key entry"))?;

        let mut keyring = Keyring::new(driver, id).await?;
        keyring.set_comm_from_sec_key(from_base64_fixed(comm_sk_b64)?).await?;

        for (tag, pk_b64) in map {
            if tag == BACKUP_COMM_KEY_MARKER {
                continue;
            }
            keyring.add_guest(&tag, from_base64_fixed(&pk_b64)?).await?;
        }

        Ok(keyring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStorageDriver;

    async fn open_keyring(id: &str) -> (Arc<dyn StorageDriver>, Keyring) {
        let driver: Arc<dyn StorageDriver> = Arc::new(InMemoryStorageDriver::new());
        let keyring = Keyring::new(driver.clone(), id).await.unwrap();
        (driver, keyring)
    }

    #[tokio::test]
    async fn new_generates_and_persists_a_comm_key() {
        let (driver, first) = open_keyring("alice").await;
        let reopened = Keyring::new(driver, "alice").await.unwrap();
        assert_eq!(first.get_pub_comm_key(), reopened.get_pub_comm_key());
    }

    #[tokio::test]
    async fn guest_hpk_invariant_holds_after_add() {
        let (_driver, mut ring) = open_keyring("alice").await;
        let guest = Keys::generate();

        ring.add_guest("bob", guest.public_key()).await.unwrap();

        assert_eq!(ring.get_guest_key("bob"), Some(guest.public_key()));
        let hpk = to_base64(&crypto::h2(&guest.public_key()));
        assert_eq!(ring.get_tag_by_hpk(&hpk), Some("bob".to_string()));
    }

    #[tokio::test]
    async fn remove_guest_drops_the_entry() {
        let (_driver, mut ring) = open_keyring("alice").await;
        let guest = Keys::generate();
        ring.add_guest("bob", guest.public_key()).await.unwrap();
        ring.remove_guest("bob").await.unwrap();
        assert_eq!(ring.get_guest_key("bob"), None);
    }

    #[tokio::test]
    async fn overwriting_a_tag_replaces_the_guest_atomically() {
        let (_driver, mut ring) = open_keyring("alice").await;
        let first = Keys::generate();
        let second = Keys::generate();

        ring.add_guest("bob", first.public_key()).await.unwrap();
        ring.add_guest("bob", second.public_key()).await.unwrap();

        assert_eq!(ring.get_guest_key("bob"), Some(second.public_key()));
    }

    #[tokio::test]
    async fn guest_registry_survives_reopen() {
        let (driver, mut ring) = open_keyring("alice").await;
        let guest = Keys::generate();
        ring.add_guest("bob", guest.public_key()).await.unwrap();

        let reopened = Keyring::new(driver, "alice").await.unwrap();
        assert_eq!(reopened.get_guest_key("bob"), Some(guest.public_key()));
    }

    #[tokio::test]
    async fn backup_round_trips_comm_key_and_guests() {
        let (_driver, mut ring) = open_keyring("alice").await;
        let bob = Keys::generate();
        let carol = Keys::generate();
        ring.add_guest("bob", bob.public_key()).await.unwrap();
        ring.add_guest("carol", carol.public_key()).await.unwrap();

        let backup = ring.backup();
        let driver2: Arc<dyn StorageDriver> = Arc::new(InMemoryStorageDriver::new());
        let restored = Keyring::from_backup(driver2, "alice-restored", &backup).await.unwrap();

        assert_eq!(restored.get_pub_comm_key(), ring.get_pub_comm_key());
        assert_eq!(restored.get_guest_key("bob"), Some(bob.public_key()));
        assert_eq!(restored.get_guest_key("carol"), Some(carol.public_key()));
        assert_eq!(restored.backup(), ring.backup());
    }

    #[tokio::test]
    async fn set_comm_from_seed_is_deterministic_and_persists() {
        let (driver, mut ring) = open_keyring("alice").await;
        ring.set_comm_from_seed(b"hello").await.unwrap();
        assert_eq!(
            to_base64(&ring.get_pub_comm_key()),
            "2DM+z1PaxGXVnzsDh4zv+IlH7sV8llEFoEmg9fG3pRA="
        );
        assert_eq!(
            ring.get_hpk(),
            "+dFaY/wsuxsNZeXH6x/rd+AZz9degkfmLBbZAMkpPd4="
        );

        let reopened = Keyring::new(driver, "alice").await.unwrap();
        assert_eq!(reopened.get_pub_comm_key(), ring.get_pub_comm_key());
    }
}
