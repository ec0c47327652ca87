//! Record and store geometry, plus the key -> bucket placement function.
//!
//! Store file (no header, no padding inside records):
//!
//! ```text
//! for bucket in 0..num_buckets:
//!     count[2]                      u16 LE
//!     records[bucket_capacity]      key[K] ++ proof[N], slots >= count zeroed
//! ```
//!
//! `block_size = 2 + bucket_capacity * (K + N)`, `offset(b) = b * block_size`.

use crate::consts::{COUNT_BYTES, MAX_BUCKET_CAPACITY};
use crate::digest::DigestKind;
use crate::errors::{PlotError, Result};
use crate::utils::ceil_log2;
use serde::{Deserialize, Serialize};

/// One stored unit: `key = digest(proof)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    pub key: Vec<u8>,
    pub proof: Vec<u8>,
}

impl Record {
    pub fn from_bytes(raw: &[u8], key_len: usize) -> Self {
        Self { key: raw[..key_len].to_vec(), proof: raw[key_len..].to_vec() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLayout {
    pub key_len: usize,
    pub proof_len: usize,
    #[serde(default)]
    pub digest: DigestKind,
    pub num_buckets: u64,
    pub bucket_capacity: usize,
}

impl StoreLayout {
    pub fn new(key_len: usize, proof_len: usize, num_buckets: u64, bucket_capacity: usize) -> Self {
        Self { key_len, proof_len, digest: DigestKind::default(), num_buckets, bucket_capacity }
    }

    pub fn with_digest(mut self, digest: DigestKind) -> Self { self.digest = digest; self }

    /// Same record shape and bucket count, different per-bucket cap.
    pub fn with_capacity(mut self, bucket_capacity: usize) -> Self {
        self.bucket_capacity = bucket_capacity;
        self
    }

    #[inline] pub fn record_size(&self) -> usize { self.key_len + self.proof_len }
    #[inline] pub fn block_size(&self) -> u64 { (COUNT_BYTES + self.bucket_capacity * self.record_size()) as u64 }
    #[inline] pub fn block_offset(&self, bucket: u64) -> u64 { bucket * self.block_size() }
    #[inline] pub fn file_size(&self) -> u64 { self.num_buckets * self.block_size() }
    #[inline] pub fn prefix_bytes(&self) -> usize { prefix_bytes(self.num_buckets) }

    #[inline]
    pub fn placement(&self, key: &[u8]) -> u64 {
        placement(key, self.prefix_bytes(), self.num_buckets)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_buckets == 0 {
            return Err(PlotError::InvalidConfig("num_buckets must be > 0".into()));
        }
        if self.proof_len == 0 {
            return Err(PlotError::InvalidConfig("proof bytes must be > 0".into()));
        }
        let p = self.prefix_bytes();
        if self.key_len < p {
            return Err(PlotError::InvalidConfig(format!(
                "key of {} bytes is shorter than the {p}-byte bucket prefix",
                self.key_len
            )));
        }
        if let Some(max) = self.digest.max_output() {
            if self.key_len > max {
                return Err(PlotError::InvalidConfig(format!(
                    "{:?} yields at most {max} bytes, key wants {}",
                    self.digest, self.key_len
                )));
            }
        }
        if self.bucket_capacity == 0 || self.bucket_capacity > MAX_BUCKET_CAPACITY {
            return Err(PlotError::InvalidConfig(format!(
                "bucket capacity {} outside 1..={MAX_BUCKET_CAPACITY}",
                self.bucket_capacity
            )));
        }
        Ok(())
    }
}

/// Smallest byte count whose bit width covers ceil(log2(num_buckets)) bits, at least 1.
pub fn prefix_bytes(num_buckets: u64) -> usize {
    let bits = ceil_log2(num_buckets) as usize;
    bits.div_ceil(8).max(1)
}

/// `floor(prefix * num_buckets / 2^(8P))` over the big-endian first `P` key bytes.
#[inline]
pub fn placement(key: &[u8], prefix_bytes: usize, num_buckets: u64) -> u64 {
    let mut prefix = 0u128;
    for &b in &key[..prefix_bytes] {
        prefix = (prefix << 8) | b as u128;
    }
    ((prefix * num_buckets as u128) >> (8 * prefix_bytes)) as u64
}
