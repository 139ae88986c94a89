//! Sharder implementation.
//!
//! Bucket assignment must be bit-exact with every other SDK reading the same datafile, so the
//! hash below follows the reference MurmurHash3 x86_32 algorithm exactly.

/// Seed used for all bucketing hashes.
pub const HASH_SEED: u32 = 1;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 (x86, 32-bit variant).
pub fn hash32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u32) << (8 * i);
        }
        h ^= mix_k(k);
    }

    h ^= data.len() as u32;
    fmix32(h)
}

#[inline]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

pub trait Sharder {
    /// Map `input` to a shard in `[0, total_shards)`.
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default sharder: the hash is treated as a ratio of `2^32` and scaled to `total_shards`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Murmur3Sharder;

const MAX_HASH_VALUE: f64 = 4_294_967_296.0;

impl Sharder for Murmur3Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = hash32(input.as_ref(), HASH_SEED);
        let ratio = hash as f64 / MAX_HASH_VALUE;
        (ratio * total_shards as f64) as u64
    }
}
