//! External merge: staging passes -> one sorted block per bucket.
//!
//! Staging holds `num_batches` back-to-back passes, each `num_buckets` blocks of the
//! per-batch layout. Bucket `b` of batch `i` lives at
//! `i * pass_size + b * batch_block_size`; its merged block is written straight to
//! `b * store_block_size`, so buckets can finish in any order.

use crate::block::{read_block_into, sort_records, write_block, BlockPos};
use crate::config::BuildPlan;
use crate::errors::{alloc_vec, IoContext, Result};
use crate::progress::Progress;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub buckets: u64,
    pub records: u64,
    /// Records cut because a merged bucket exceeded the store capacity.
    pub trimmed: u64,
}

impl MergeStats {
    fn add(mut self, o: MergeStats) -> Self {
        self.buckets += o.buckets;
        self.records += o.records;
        self.trimmed += o.trimmed;
        self
    }
}

/// Merge `staging` into `output` (which must already exist; it is resized to the
/// store size). Runs on the current rayon pool; each task owns one read handle on the
/// staging file and one write handle on the output.
pub fn merge_staging(
    plan: &BuildPlan,
    staging: &Path,
    output: &Path,
    tasks: usize,
    progress: Option<&Progress>,
) -> Result<MergeStats> {
    let store = plan.store_layout;
    let expect = plan.pass_size() * plan.num_batches;
    let have = std::fs::metadata(staging).at("stat staging", 0)?.len();
    if have < expect {
        return Err(BlockPos { bucket: 0, batch: None, offset: have }
            .corrupt(format!("staging holds {have} bytes, {} passes need {expect}", plan.num_batches)));
    }
    {
        let out = OpenOptions::new().write(true).open(output).at("open output", 0)?;
        out.set_len(store.file_size()).at("size output", store.file_size())?;
    }

    let chunks = bucket_chunks(store.num_buckets, tasks);
    debug!(chunks = chunks.len(), buckets = store.num_buckets, "merge start");
    let stats = chunks
        .into_par_iter()
        .map(|(first, end)| merge_range(plan, staging, output, first, end, progress))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .fold(MergeStats::default(), MergeStats::add);

    if stats.trimmed > 0 {
        warn!(trimmed = stats.trimmed, "merged buckets exceeded store capacity; records cut");
    }
    Ok(stats)
}

fn merge_range(
    plan: &BuildPlan,
    staging: &Path,
    output: &Path,
    first: u64,
    end: u64,
    progress: Option<&Progress>,
) -> Result<MergeStats> {
    let batch = plan.batch_layout;
    let store = plan.store_layout;
    let rs = store.record_size();

    let mut src = BufReader::new(File::open(staging).at("open staging", 0)?);
    let mut dst = OpenOptions::new().write(true).open(output).at("open output", 0)?;
    let scratch_bytes = plan.num_batches as usize * batch.bucket_capacity * rs;
    let mut scratch = alloc_vec("merge scratch", scratch_bytes)?;
    let mut block = alloc_vec("merge block", store.block_size() as usize)?;
    let mut stats = MergeStats::default();

    for b in first..end {
        scratch.clear();
        for i in 0..plan.num_batches {
            let pos = BlockPos {
                bucket: b,
                batch: Some(i),
                offset: i * plan.pass_size() + batch.block_offset(b),
            };
            read_block_into(&mut src, &batch, &pos, &mut scratch)?;
        }
        let mut n = scratch.len() / rs;
        if n > store.bucket_capacity {
            stats.trimmed += (n - store.bucket_capacity) as u64;
            n = store.bucket_capacity;
            scratch.truncate(n * rs);
        }
        sort_records(&mut scratch, rs, store.key_len);

        let off = store.block_offset(b);
        block.clear();
        write_block(&mut block, &store, &scratch).at("encode block", off)?;
        dst.seek(SeekFrom::Start(off)).at("seek output", off)?;
        dst.write_all(&block).at("write block", off)?;

        stats.buckets += 1;
        stats.records += n as u64;
        if let Some(p) = progress { p.advance(1); }
    }
    dst.sync_data().at("sync output", 0)?;
    Ok(stats)
}

/// Split `[0, num_buckets)` into about `4 * tasks` contiguous ranges.
fn bucket_chunks(num_buckets: u64, tasks: usize) -> Vec<(u64, u64)> {
    let want = (tasks.max(1) as u64 * 4).min(num_buckets).max(1);
    let step = num_buckets.div_ceil(want);
    (0..num_buckets).step_by(step as usize).map(|s| (s, (s + step).min(num_buckets))).collect()
}
