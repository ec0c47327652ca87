//! Parallel record generation into shared bucket accumulators.

use crate::bucket::BucketSet;
use crate::nonce;
use crate::progress::Progress;
use rayon::prelude::*;
use serde::Serialize;

/// Nonces hashed between two progress updates of one worker.
const PROGRESS_STEP: u64 = 1 << 14;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenStats {
    pub generated: u64,
    pub stored: u64,
    pub dropped: u64,
}

impl GenStats {
    pub fn add(&mut self, other: GenStats) {
        self.generated += other.generated;
        self.stored += other.stored;
        self.dropped += other.dropped;
    }
}

/// Even split of `count` nonces over `threads` contiguous sub-ranges: `(offset, len)`.
/// The first `count % threads` ranges take one extra nonce.
pub fn split_range(count: u64, threads: usize) -> Vec<(u64, u64)> {
    let threads = threads.max(1) as u64;
    let base = count / threads;
    let extra = count % threads;
    let mut out = Vec::with_capacity(threads as usize);
    let mut offset = 0;
    for t in 0..threads {
        let len = base + u64::from(t < extra);
        if len > 0 {
            out.push((offset, len));
        }
        offset += len;
    }
    out
}

/// Hash nonces `[start, start + count)` and insert each record into the bucket its key
/// places it in. Runs on the current rayon pool with one contiguous sub-range per
/// thread; full buckets drop the record and count it.
pub fn generate(
    buckets: &BucketSet,
    start: u64,
    count: u64,
    threads: usize,
    progress: Option<&Progress>,
) -> GenStats {
    let layout = *buckets.layout();
    let prefix = layout.prefix_bytes();
    let dropped_before = buckets.dropped();

    split_range(count, threads).into_par_iter().for_each(|(offset, len)| {
        let mut proof = nonce::encode(start, layout.proof_len);
        nonce::advance(&mut proof, offset);
        let mut key = vec![0u8; layout.key_len];
        let mut pending = 0u64;
        for _ in 0..len {
            layout.digest.digest_into(&proof, &mut key);
            let bucket = crate::layout::placement(&key, prefix, layout.num_buckets);
            buckets.insert(bucket as usize, &key, &proof);
            nonce::increment(&mut proof);
            pending += 1;
            if pending == PROGRESS_STEP {
                if let Some(p) = progress { p.advance(pending); }
                pending = 0;
            }
        }
        if let Some(p) = progress { p.advance(pending); }
    });

    let dropped = buckets.dropped() - dropped_before;
    GenStats { generated: count, stored: count - dropped, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StoreLayout;

    #[test]
    fn split_covers_range_without_overlap() {
        let parts = split_range(10, 3);
        assert_eq!(parts, vec![(0, 4), (4, 3), (7, 3)]);
        assert_eq!(split_range(2, 4), vec![(0, 1), (1, 1)]);
        assert!(split_range(0, 4).is_empty());
    }

    #[test]
    fn every_nonce_lands_in_its_bucket() {
        let layout = StoreLayout::new(4, 4, 8, 64);
        let set = BucketSet::new(layout).unwrap();
        let stats = generate(&set, 100, 200, 4, None);
        assert_eq!(stats, GenStats { generated: 200, stored: 200, dropped: 0 });

        let mut seen: Vec<u64> = Vec::new();
        for b in 0..8 {
            for rec in set.bucket_records(b).chunks_exact(8) {
                let (key, proof) = rec.split_at(4);
                assert_eq!(layout.placement(key), b as u64);
                assert!(layout.digest.verify(key, proof));
                seen.push(nonce::decode(proof));
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (100..300).collect::<Vec<_>>());
    }

    #[test]
    fn overflow_is_counted_not_fatal() {
        // one bucket: every record collides
        let layout = StoreLayout::new(2, 4, 1, 5);
        let set = BucketSet::new(layout).unwrap();
        let stats = generate(&set, 0, 40, 3, None);
        assert_eq!(stats.stored, 5);
        assert_eq!(stats.dropped, 35);
        assert_eq!(stats.generated - stats.stored, stats.dropped);
        assert_eq!(set.stored(), 5);
    }
}
