//! AES-256-GCM encryption stage.
//!
//! The key is the SHA-256 digest of the user's passphrase, so passphrases of
//! any length map onto the 32 bytes the cipher needs. Each call to
//! [`Cipher::encrypt`] draws a fresh random nonce and prepends it to the
//! output:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ nonce (12 B) │ ciphertext + GCM tag (16 B)  │
//! └──────────────┴──────────────────────────────┘
//! ```

use crate::error::{Result, StoreError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the random nonce prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Symmetric cipher bound to one passphrase.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("key", &"<redacted>").finish()
    }
}

impl Cipher {
    /// Derives the cipher key from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self {
            key: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .aead()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| StoreError::Integrity(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a payload produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < NONCE_LEN {
            return Err(StoreError::Integrity(format!(
                "encrypted payload too short: {} bytes (need at least {NONCE_LEN})",
                payload.len()
            )));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        self.aead()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Integrity("decryption failed: wrong key or corrupt data".into()))
    }
}
