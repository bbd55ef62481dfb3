//! Traffic-analysis padding.
//!
//! Encoded packets are padded to one of a few fixed block sizes so observers
//! cannot distinguish message lengths. The tail is random filler followed by
//! one byte holding the total filler length (itself included); the decoder
//! consumes exactly that count. This is an anti-analysis layer, not a
//! cryptographic one, so random filler is fine.

use rand::RngCore;

/// Standard block sizes, smallest first.
const BLOCK_SIZES: [usize; 4] = [256, 512, 1024, 2048];

/// Headroom reserved for AEAD expansion when choosing a block.
const ENCRYPTION_OVERHEAD: usize = 16;

/// Padding length is encoded in a single byte.
const MAX_PADDING: usize = 255;

/// Smallest standard block that fits `data_size` plus encryption headroom.
/// Oversized inputs keep their own length (the fragmentation layer deals
/// with those).
pub fn optimal_block_size(data_size: usize) -> usize {
    let total = data_size + ENCRYPTION_OVERHEAD;

    for block in BLOCK_SIZES {
        if total <= block {
            return block;
        }
    }

    data_size
}

/// Pad `data` out to `target_size`. Returns the input unchanged when it
/// already fills the block or when the needed filler cannot be described by
/// the single trailing length byte.
pub fn pad(data: &[u8], target_size: usize) -> Vec<u8> {
    if data.len() >= target_size {
        return data.to_vec();
    }

    let padding_needed = target_size - data.len();
    if padding_needed > MAX_PADDING {
        return data.to_vec();
    }

    let mut padded = Vec::with_capacity(target_size);
    padded.extend_from_slice(data);

    let mut filler = vec![0u8; padding_needed - 1];
    rand::thread_rng().fill_bytes(&mut filler);
    padded.extend_from_slice(&filler);
    padded.push(padding_needed as u8);

    padded
}

/// Strip padding by consuming the count named in the final byte. Leaves the
/// input untouched when the byte is zero or exceeds the data length.
pub fn unpad(data: &[u8]) -> Vec<u8> {
    let Some(&last) = data.last() else {
        return Vec::new();
    };

    let padding_len = last as usize;
    if padding_len == 0 || padding_len > data.len() {
        return data.to_vec();
    }

    data[..data.len() - padding_len].to_vec()
}
