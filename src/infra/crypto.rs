//! Authenticated sealing of persisted payloads.
//!
//! Keys are derived from the configured secret with PBKDF2-HMAC-SHA256
//! (salt `pinia-persist`, 100 000 rounds, 256-bit output) and used for
//! AES-256-GCM. A sealed payload is the standard base64 encoding of
//! `nonce(12) || ciphertext || tag(16)`, with a fresh OS-random nonce per call.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use lru::LruCache;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "infra::crypto";

pub const KEY_SALT: &[u8] = b"pinia-persist";
pub const KDF_ITERATIONS: u32 = 100_000;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const DEFAULT_KEY_CACHE_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("secret must not be empty")]
    EmptySecret,
    #[error("payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("payload is {len} bytes, shorter than nonce and tag")]
    Truncated { len: usize },
    #[error("payload failed authentication (tampered, corrupted, or sealed with another secret)")]
    Authentication,
    #[error("cipher failure: {0}")]
    Cipher(String),
    #[error("decrypted payload is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CryptoError {
    /// True when the ciphertext itself was rejected, as opposed to a malformed envelope.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Authentication)
    }
}

/// AES-256-GCM key derived from a secret.
#[derive(Clone)]
pub struct DerivedKey {
    cipher: Aes256Gcm,
}

impl DerivedKey {
    /// Run the key derivation for `secret`.
    pub fn derive(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::EmptySecret);
        }

        let mut material = [0_u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), KEY_SALT, KDF_ITERATIONS, &mut material);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material));
        material.fill(0);

        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` under a fresh nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|err| CryptoError::Cipher(err.to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    /// Verify and decrypt a payload produced by [`DerivedKey::seal`].
    pub fn open(&self, payload: &str) -> Result<String, CryptoError> {
        let envelope = STANDARD.decode(payload)?;
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated {
                len: envelope.len(),
            });
        }

        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Authentication)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Encrypt with a key derived for this call only.
pub fn encrypt(plaintext: &str, secret: &str) -> Result<String, CryptoError> {
    DerivedKey::derive(secret)?.seal(plaintext)
}

/// Decrypt with a key derived for this call only.
pub fn decrypt(payload: &str, secret: &str) -> Result<String, CryptoError> {
    DerivedKey::derive(secret)?.open(payload)
}

/// Sealing front-end that caches derived keys per secret.
///
/// Entries are keyed by the SHA-256 digest of the secret, so the secret
/// itself is never retained and a rotated secret simply misses the cache.
pub struct Codec {
    keys: Mutex<LruCache<[u8; 32], DerivedKey>>,
}

impl Codec {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_KEY_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            keys: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn encrypt(&self, plaintext: &str, secret: &str) -> Result<String, CryptoError> {
        self.key_for(secret)?.seal(plaintext)
    }

    pub fn decrypt(&self, payload: &str, secret: &str) -> Result<String, CryptoError> {
        self.key_for(secret)?.open(payload)
    }

    /// Number of secrets with a cached key.
    pub fn cached_keys(&self) -> usize {
        mutex_lock(&self.keys, SOURCE, "cached_keys").len()
    }

    fn key_for(&self, secret: &str) -> Result<DerivedKey, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::EmptySecret);
        }

        let mut digest = [0_u8; 32];
        digest.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        if let Some(key) = mutex_lock(&self.keys, SOURCE, "key_for.get").get(&digest) {
            return Ok(key.clone());
        }

        // Derivation runs outside the lock; a racing caller may derive the same key twice.
        let key = DerivedKey::derive(secret)?;
        debug!(fingerprint = %hex::encode(&digest[..4]), "derived persistence key");
        mutex_lock(&self.keys, SOURCE, "key_for.put").put(digest, key.clone());
        Ok(key)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}
