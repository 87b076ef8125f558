//! Gzip compression stage.

use crate::error::{Result, StoreError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses `input` with gzip at the default level.
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
    encoder
        .write_all(input)
        .and_then(|_| encoder.finish())
        .map_err(|e| StoreError::Integrity(format!("compression failed: {e}")))
}

/// Decompresses a gzip stream produced by [`compress`].
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::with_capacity(input.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StoreError::Integrity(format!("decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_shrinks_repetitive_input() {
        let input = "abc".repeat(1000);
        let compressed = compress(input.as_bytes()).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed).unwrap(), input.as_bytes());
    }

    #[test]
    fn test_empty_input() {
        let compressed = compress(b"").unwrap();
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_integrity_error() {
        let err = decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
