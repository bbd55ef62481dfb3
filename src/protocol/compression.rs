//! Payload compression helpers.
//!
//! Payloads above a small threshold are LZ4-compressed when that actually
//! shrinks them; the wire format prefixes compressed payloads with the
//! original size so the receiver can size its output buffer exactly.

use super::binary::ProtocolError;

/// Payloads at or below this size are never worth compressing.
const COMPRESSION_THRESHOLD: usize = 100;

/// Whether compression should even be attempted for this payload.
pub fn should_compress(data: &[u8]) -> bool {
    data.len() > COMPRESSION_THRESHOLD
}

/// LZ4-compress `data`, returning `None` when the result is not strictly
/// smaller than the input.
pub fn compress(data: &[u8]) -> Option<Vec<u8>> {
    match lz4::block::compress(data, None, false) {
        Ok(compressed) if compressed.len() < data.len() => Some(compressed),
        _ => None,
    }
}

/// Decompress an LZ4 block back to exactly `original_size` bytes.
pub fn decompress(compressed: &[u8], original_size: usize) -> Result<Vec<u8>, ProtocolError> {
    match lz4::block::decompress(compressed, Some(original_size as i32)) {
        Ok(data) if data.len() == original_size => Ok(data),
        _ => Err(ProtocolError::DecompressionFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        assert!(!should_compress(&vec![0u8; 100]));
        assert!(should_compress(&vec![0u8; 101]));
    }

    #[test]
    fn compressible_data_round_trips() {
        let data = vec![0x42u8; 400];
        let compressed = compress(&data).expect("repetitive data must shrink");

        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn incompressible_data_is_left_alone() {
        use rand::RngCore;

        let mut data = vec![0u8; 256];
        rand::thread_rng().fill_bytes(&mut data);

        // Random bytes do not shrink under LZ4.
        assert!(compress(&data).is_none());
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(&[0xFF, 0x00, 0x13], 64).is_err());
    }
}
