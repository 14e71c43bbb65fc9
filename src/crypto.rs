//! NaCl-compatible crypto primitives adapter.
//!
//! A thin, uniform wrapper over `crypto_box` (Curve25519-XSalsa20-Poly1305
//! `box`) and `xsalsa20poly1305` (`secretbox`), plus SHA-256 and secure
//! randomness. This is the only module in the crate that touches a
//! cryptographic primitive directly; everything above it works in terms of
//! [`Keys`], byte slices, and [`crate::error::ZaxError`].

use crypto_box::aead::{Aead, OsRng as BoxOsRng};
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use xsalsa20poly1305::aead::KeyInit;
use xsalsa20poly1305::XSalsa20Poly1305;
use zeroize::Zeroize;

use crate::error::ZaxError;

/// Width of a `secretbox` key, in bytes.
pub const SECRETBOX_KEY_LEN: usize = 32;
/// Width of a `box`/`secretbox` nonce, in bytes.
pub const BOX_NONCE_LEN: usize = 24;
/// Width of a Curve25519 public or secret key, in bytes.
pub const KEY_LEN: usize = 32;

/// A Curve25519 keypair.
///
/// For guest entries only the public half is meaningful; callers hold
/// guest keys as a bare `[u8; 32]` rather than a full `Keys` value.
pub struct Keys {
    public_key: [u8; KEY_LEN],
    secret_key: BoxSecretKey,
}

impl Keys {
    /// Generate a fresh random keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret_key = BoxSecretKey::generate(&mut BoxOsRng);
        let public_key = *secret_key.public_key().as_bytes();
        Keys {
            public_key,
            secret_key,
        }
    }

    /// Derive a keypair from a raw 32-byte secret key.
    pub fn from_secret_key(sk: [u8; KEY_LEN]) -> Self {
        let secret_key = BoxSecretKey::from(sk);
        let public_key = *secret_key.public_key().as_bytes();
        Keys {
            public_key,
            secret_key,
        }
    }

    /// Derive a keypair from an arbitrary-length seed: `sk = sha512(seed)[..32]`.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(seed);
        let mut digest = hasher.finalize();
        let mut sk = [0u8; KEY_LEN];
        sk.copy_from_slice(&digest[..KEY_LEN]);
        digest.zeroize();
        let keys = Self::from_secret_key(sk);
        sk.zeroize();
        keys
    }

    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public_key
    }

    pub fn secret_key_bytes(&self) -> [u8; KEY_LEN] {
        self.secret_key.to_bytes()
    }
}

impl Clone for Keys {
    fn clone(&self) -> Self {
        Keys::from_secret_key(self.secret_key.to_bytes())
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &hex::encode(self.public_key))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Fill an `n`-byte buffer from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `h2(m) = sha256(sha256(0^64 || m))` — the Dodis hash-of-hash construction
/// used throughout the protocol to derive the public-facing `hpk` address
/// and the difficulty-gated session handshake.
pub fn h2(data: &[u8]) -> [u8; 32] {
    let pad64 = [0u8; 64];
    let mut inner_input = Vec::with_capacity(64 + data.len());
    inner_input.extend_from_slice(&pad64);
    inner_input.extend_from_slice(data);
    let inner = sha256(&inner_input);
    sha256(&inner)
}

/// Build a 24-byte nonce: a fresh random nonce with its first 8 (or 12, if
/// `extra` is provided) bytes overwritten by a big-endian timestamp (and,
/// when present, `extra`).
pub fn make_nonce(extra: Option<u32>) -> [u8; BOX_NONCE_LEN] {
    let mut nonce = [0u8; BOX_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let header_len = if extra.is_some() { 12 } else { 8 };
    nonce[..header_len].fill(0);
    nonce[..8].copy_from_slice(&now.to_be_bytes());

    if let Some(extra) = extra {
        nonce[8..12].copy_from_slice(&extra.to_be_bytes());
    }

    nonce
}

/// NaCl `secretbox`: authenticated symmetric encryption under a 32-byte key.
pub fn secretbox(msg: &[u8], nonce: &[u8; BOX_NONCE_LEN], key: &[u8; SECRETBOX_KEY_LEN]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new(key.into());
    // The only failure mode in this AEAD is a buffer too large to encode the
    // length prefix, which never happens for the message sizes this crate
    // produces (chunked file transfer, small JSON envelopes).
    cipher
        .encrypt(nonce.into(), msg)
        .expect("secretbox encryption cannot fail for bounded inputs")
}

/// NaCl `secretbox_open`: fails with [`ZaxError::Crypto`] on any tampering.
pub fn secretbox_open(
    ct: &[u8],
    nonce: &[u8; BOX_NONCE_LEN],
    key: &[u8; SECRETBOX_KEY_LEN],
) -> Result<Vec<u8>, ZaxError> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .decrypt(nonce.into(), ct)
        .map_err(|_| ZaxError::crypto("secretbox_open"))
}

/// NaCl `box`: Curve25519-XSalsa20-Poly1305 authenticated encryption toward
/// a recipient public key, signed by the sender's secret key.
pub fn box_seal(
    msg: &[u8],
    nonce: &[u8; BOX_NONCE_LEN],
    pk_recv: &[u8; KEY_LEN],
    sk_send: &Keys,
) -> Vec<u8> {
    let salsa_box = SalsaBox::new(&BoxPublicKey::from(*pk_recv), &sk_send.secret_key);
    salsa_box
        .encrypt(nonce.into(), msg)
        .expect("box encryption cannot fail for bounded inputs")
}

/// NaCl `box_open`: fails with [`ZaxError::Crypto`] on any tampering or key
/// mismatch.
pub fn box_open(
    ct: &[u8],
    nonce: &[u8; BOX_NONCE_LEN],
    pk_send: &[u8; KEY_LEN],
    sk_recv: &Keys,
) -> Result<Vec<u8>, ZaxError> {
    let salsa_box = SalsaBox::new(&BoxPublicKey::from(*pk_send), &sk_recv.secret_key);
    salsa_box
        .decrypt(nonce.into(), ct)
        .map_err(|_| ZaxError::crypto("box_open"))
}
