// crates/plot_core/src/consts.rs

use core::mem::size_of;
use std::time::Duration;

/// Bytes of the little-endian record count at the head of every block.
pub const COUNT_BYTES: usize = size_of::<u16>();

/// Largest bucket capacity the on-disk count can describe.
pub const MAX_BUCKET_CAPACITY: usize = u16::MAX as usize;

pub const DEFAULT_KEY_BYTES: usize = 10;
pub const DEFAULT_PROOF_BYTES: usize = 6;
pub const DEFAULT_MEMORY_BYTES: u64 = 256 << 20;
pub const DEFAULT_RECORDS_PER_BUCKET: u64 = 16;

pub const META_SUFFIX: &str = ".meta.json";
pub const STAGING_SUFFIX: &str = ".staging";
pub const META_VERSION: u16 = 1;

/// Minimum spacing between two progress lines of one stage.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Buckets read per chunk by the verifier's sequential scan.
pub const DEFAULT_READ_CHUNK_BUCKETS: usize = 1024;

/// Random authenticity picks drawn and checked per batch.
pub const RANDOM_SAMPLE_BATCH: usize = 1 << 20;

/// Largest random authenticity sample accepted.
pub const MAX_RANDOM_SAMPLE: u64 = u32::MAX as u64;

/// Sort/order violations kept verbatim in a report; the rest are only counted.
pub const MAX_REPORTED_FINDINGS: usize = 64;

const _: () = { assert!(COUNT_BYTES == 2); };
