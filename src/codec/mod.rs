//! Codec Module
//!
//! The codec sits between the serialized document text and the bytes that
//! land on disk. Both stages are optional and always run in a fixed order:
//!
//! ```text
//!   save:  document ──► compress ──► encrypt ──► file
//!   load:  file ──► decrypt ──► decompress ──► document
//! ```
//!
//! The synchronous and asynchronous entry points share the same stage
//! functions; the async variants only move the CPU work onto Tokio's blocking
//! pool. A file written by one path always decodes through the other.

pub mod compression;
pub mod encryption;

pub use encryption::{Cipher, NONCE_LEN};

use crate::error::{Result, StoreError};
use bytes::Bytes;

/// The compress/encrypt pipeline for one store.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    compression: bool,
    cipher: Option<Cipher>,
}

impl Codec {
    /// A codec that passes bytes through unchanged.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Creates a codec with the given stages enabled.
    pub fn new(compression: bool, cipher: Option<Cipher>) -> Self {
        Self { compression, cipher }
    }

    /// Returns true if the compression stage is enabled.
    pub fn compresses(&self) -> bool {
        self.compression
    }

    /// Returns true if the encryption stage is enabled.
    pub fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    /// Runs the save-time pipeline: compress, then encrypt.
    pub fn encode(&self, plain: &[u8]) -> Result<Bytes> {
        let mut buf = if self.compression {
            compression::compress(plain)?
        } else {
            plain.to_vec()
        };
        if let Some(cipher) = &self.cipher {
            buf = cipher.encrypt(&buf)?;
        }
        Ok(Bytes::from(buf))
    }

    /// Runs the load-time pipeline: decrypt, then decompress.
    pub fn decode(&self, stored: &[u8]) -> Result<Bytes> {
        let mut buf = match &self.cipher {
            Some(cipher) => cipher.decrypt(stored)?,
            None => stored.to_vec(),
        };
        if self.compression {
            buf = compression::decompress(&buf)?;
        }
        Ok(Bytes::from(buf))
    }

    /// [`Codec::encode`] on the blocking pool.
    pub async fn encode_async(&self, plain: Bytes) -> Result<Bytes> {
        if !self.compression && self.cipher.is_none() {
            return Ok(plain);
        }
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.encode(&plain))
            .await
            .map_err(|e| StoreError::Integrity(format!("encode task failed: {e}")))?
    }

    /// [`Codec::decode`] on the blocking pool.
    pub async fn decode_async(&self, stored: Bytes) -> Result<Bytes> {
        if !self.compression && self.cipher.is_none() {
            return Ok(stored);
        }
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.decode(&stored))
            .await
            .map_err(|e| StoreError::Integrity(format!("decode task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_codecs() -> Vec<Codec> {
        vec![
            Codec::plain(),
            Codec::new(true, None),
            Codec::new(false, Some(Cipher::from_passphrase("pw"))),
            Codec::new(true, Some(Cipher::from_passphrase("pw"))),
        ]
    }

    #[test]
    fn test_plain_is_identity() {
        let codec = Codec::plain();
        assert_eq!(&codec.encode(b"hello").unwrap()[..], b"hello");
        assert_eq!(&codec.decode(b"hello").unwrap()[..], b"hello");
    }

    #[test]
    fn test_encoded_bytes_hide_plaintext() {
        let codec = Codec::new(true, Some(Cipher::from_passphrase("pw")));
        let encoded = codec.encode(b"{\"data\":{\"secret\":\"launch-codes\"}}").unwrap();
        let haystack = String::from_utf8_lossy(&encoded);
        assert!(!haystack.contains("launch-codes"));
    }

    #[test]
    fn test_decode_with_wrong_stages_fails() {
        let encoded = Codec::new(true, None).encode(b"payload").unwrap();
        let err = Codec::new(true, Some(Cipher::from_passphrase("pw")))
            .decode(&encoded)
            .unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_sync_and_async_interoperate() {
        for codec in all_codecs() {
            let payload = Bytes::from_static(b"{\"data\":{},\"ttl\":{}}");

            let sync_encoded = codec.encode(&payload).unwrap();
            let async_decoded = codec.decode_async(sync_encoded).await.unwrap();
            assert_eq!(async_decoded, payload);

            let async_encoded = codec.encode_async(payload.clone()).await.unwrap();
            let sync_decoded = codec.decode(&async_encoded).unwrap();
            assert_eq!(sync_decoded, payload);
        }
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            for codec in all_codecs() {
                let encoded = codec.encode(&payload).unwrap();
                prop_assert_eq!(&codec.decode(&encoded).unwrap()[..], &payload[..]);
            }
        }
    }
}
