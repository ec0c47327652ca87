//! Read-only store checks: per-bucket sort order and key authenticity.
//!
//! Mismatches are findings in the [`VerifyReport`]; only I/O failures, corrupt
//! blocks, or a fail-fast request abort the scan.

use crate::block::{parse_block, read_block_into, BlockPos};
use crate::consts::{
    COUNT_BYTES, DEFAULT_READ_CHUNK_BUCKETS, MAX_RANDOM_SAMPLE, MAX_REPORTED_FINDINGS, RANDOM_SAMPLE_BATCH,
};
use crate::errors::{IoContext, PlotError, Result};
use crate::layout::StoreLayout;
use crate::lookup::StoreReader;
use crate::progress::Progress;
use crate::utils::read_u16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sample {
    /// The first `n` records in file order.
    Head(u64),
    /// `count` global record indices drawn uniformly (with replacement) from `seed`.
    Random { count: u64, seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    pub check_order: bool,
    pub authenticity: Option<Sample>,
    /// Buckets read per chunk during the sequential scan.
    pub read_chunk_buckets: usize,
    pub fail_fast: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { check_order: true, authenticity: None, read_chunk_buckets: DEFAULT_READ_CHUNK_BUCKETS, fail_fast: false }
    }
}

/// Position of one record inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub bucket: u64,
    pub slot: usize,
    /// Byte offset of the record in the file.
    pub offset: u64,
}

impl Location {
    fn new(layout: &StoreLayout, bucket: u64, slot: usize) -> Self {
        let offset = layout.block_offset(bucket) + (COUNT_BYTES + slot * layout.record_size()) as u64;
        Self { bucket, slot, offset }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub buckets: u64,
    pub records: u64,
    pub full_buckets: u64,
    pub empty_buckets: u64,
    pub unsorted: u64,
    /// First offending record of the first unsorted buckets.
    pub unsorted_at: Vec<Location>,
    pub hashes_checked: u64,
    pub hashes_failed: u64,
    pub mismatches: Vec<Location>,
    pub sample: Option<Sample>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool { self.unsorted == 0 && self.hashes_failed == 0 }
}

/// Verify the store at `path` (layout from its sidecar).
pub fn verify(path: impl AsRef<Path>, opts: &VerifyOptions) -> Result<VerifyReport> {
    let layout = StoreReader::open(path.as_ref())?.layout().to_owned();
    verify_with_layout(path, layout, opts)
}

pub fn verify_with_layout(path: impl AsRef<Path>, layout: StoreLayout, opts: &VerifyOptions) -> Result<VerifyReport> {
    let path = path.as_ref();
    // size and layout checks
    drop(StoreReader::open_with_layout(path, layout)?);

    let mut report = VerifyReport { sample: opts.authenticity, ..VerifyReport::default() };
    let head = match opts.authenticity {
        Some(Sample::Head(n)) => n,
        _ => 0,
    };
    if opts.check_order || head > 0 {
        scan(path, &layout, opts, head, &mut report)?;
    }
    if let Some(Sample::Random { count, seed }) = opts.authenticity {
        sample_random(path, &layout, opts, count, seed, &mut report)?;
    }
    info!(
        records = report.records,
        unsorted = report.unsorted,
        checked = report.hashes_checked,
        failed = report.hashes_failed,
        "verify done"
    );
    Ok(report)
}

/// Sequential pass over the blocks, `read_chunk_buckets` blocks per read. Without the
/// order check the pass ends at the chunk that reaches `head` hashed records.
fn scan(path: &Path, layout: &StoreLayout, opts: &VerifyOptions, head: u64, report: &mut VerifyReport) -> Result<()> {
    let mut f = BufReader::new(File::open(path).at("open store", 0)?);
    let chunk = opts.read_chunk_buckets.max(1) as u64;
    let bs = layout.block_size();
    let rs = layout.record_size();
    let k = layout.key_len;
    let progress = Progress::new("VERIFY", layout.num_buckets);
    let mut buf = Vec::new();

    let mut first = 0u64;
    while first < layout.num_buckets {
        let n = chunk.min(layout.num_buckets - first);
        let offset = layout.block_offset(first);
        buf.resize((n * bs) as usize, 0);
        f.read_exact(&mut buf).at("read chunk", offset)?;

        for (i, block) in buf.chunks_exact(bs as usize).enumerate() {
            let bucket = first + i as u64;
            let pos = BlockPos { bucket, batch: None, offset: layout.block_offset(bucket) };
            let recs = parse_block(block, layout, &pos)?;
            let count = recs.len() / rs;
            report.buckets += 1;
            report.records += count as u64;
            if count == layout.bucket_capacity { report.full_buckets += 1; }
            if count == 0 { report.empty_buckets += 1; }

            if opts.check_order {
                let (bad, at) = crate::block::count_unsorted(recs, rs, k);
                if bad > 0 {
                    report.unsorted += bad;
                    let loc = Location::new(layout, bucket, at.unwrap_or(0));
                    if opts.fail_fast {
                        return Err(PlotError::VerificationFailed(format!(
                            "bucket {bucket} unsorted at slot {} (offset {})",
                            loc.slot, loc.offset
                        )));
                    }
                    if report.unsorted_at.len() < MAX_REPORTED_FINDINGS {
                        report.unsorted_at.push(loc);
                    }
                }
            }

            for (slot, rec) in recs.chunks_exact(rs).enumerate() {
                if report.hashes_checked >= head { break; }
                check_record(layout, rec, Location::new(layout, bucket, slot), opts, report)?;
            }
        }
        progress.advance(n);
        first += n;
        if !opts.check_order && report.hashes_checked >= head {
            break;
        }
    }
    progress.finish();
    Ok(())
}

fn check_record(layout: &StoreLayout, rec: &[u8], loc: Location, opts: &VerifyOptions, report: &mut VerifyReport) -> Result<()> {
    let (key, proof) = rec.split_at(layout.key_len);
    report.hashes_checked += 1;
    if layout.digest.verify(key, proof) {
        return Ok(());
    }
    report.hashes_failed += 1;
    if opts.fail_fast {
        return Err(PlotError::VerificationFailed(format!(
            "bad hash in bucket {} slot {} (offset {})",
            loc.bucket, loc.slot, loc.offset
        )));
    }
    if report.mismatches.len() < MAX_REPORTED_FINDINGS {
        report.mismatches.push(loc);
    }
    Ok(())
}

/// Cumulative record counts per bucket from one pass over the block headers only.
/// `cum[b]` is the global index of bucket `b`'s first record; `cum[num_buckets]` the total.
pub fn cumulative_counts(path: &Path, layout: &StoreLayout) -> Result<Vec<u64>> {
    let mut f = File::open(path).at("open store", 0)?;
    let mut cum = Vec::with_capacity(layout.num_buckets as usize + 1);
    let mut total = 0u64;
    for b in 0..layout.num_buckets {
        let off = layout.block_offset(b);
        f.seek(SeekFrom::Start(off)).at("seek header", off)?;
        let pos = BlockPos { bucket: b, batch: None, offset: off };
        let count = read_u16(&mut f).at("read header", off)?;
        let count = crate::block::check_count(count, layout.bucket_capacity, &pos)?;
        cum.push(total);
        total += count as u64;
    }
    cum.push(total);
    Ok(cum)
}

fn sample_random(
    path: &Path,
    layout: &StoreLayout,
    opts: &VerifyOptions,
    count: u64,
    seed: u64,
    report: &mut VerifyReport,
) -> Result<()> {
    sample_random_batched(path, layout, opts, count, seed, RANDOM_SAMPLE_BATCH, report)
}

/// Draw `count` indices in sorted batches of at most `batch`, so memory stays
/// bounded whatever the sample size.
fn sample_random_batched(
    path: &Path,
    layout: &StoreLayout,
    opts: &VerifyOptions,
    count: u64,
    seed: u64,
    batch: usize,
    report: &mut VerifyReport,
) -> Result<()> {
    if count > MAX_RANDOM_SAMPLE {
        return Err(PlotError::InvalidConfig(format!(
            "random sample of {count} records exceeds the limit of {MAX_RANDOM_SAMPLE}"
        )));
    }
    let cum = cumulative_counts(path, layout)?;
    let total = *cum.last().unwrap_or(&0);
    if total == 0 || count == 0 {
        return Ok(());
    }
    let batch = batch.max(1) as u64;
    let cap = count.min(batch) as usize;
    let mut picks: Vec<u64> = Vec::new();
    picks
        .try_reserve_exact(cap)
        .map_err(|_| PlotError::Alloc { what: "sample picks", bytes: cap * std::mem::size_of::<u64>() })?;
    let mut rng = StdRng::seed_from_u64(seed);
    debug!(count, total, seed, batch, "random sample drawn");

    let mut f = File::open(path).at("open store", 0)?;
    let mut buf = Vec::new();
    let mut left = count;
    while left > 0 {
        let n = left.min(batch);
        picks.clear();
        picks.extend((0..n).map(|_| rng.random_range(0..total)));
        picks.sort_unstable();
        check_picks(&mut f, layout, opts, &cum, &picks, &mut buf, report)?;
        left -= n;
    }
    Ok(())
}

/// Check sorted global indices, reading each touched bucket once.
fn check_picks(
    f: &mut File,
    layout: &StoreLayout,
    opts: &VerifyOptions,
    cum: &[u64],
    picks: &[u64],
    buf: &mut Vec<u8>,
    report: &mut VerifyReport,
) -> Result<()> {
    let rs = layout.record_size();
    let mut i = 0usize;
    while i < picks.len() {
        // bucket holding picks[i]: last b with cum[b] <= pick
        let bucket = cum.partition_point(|&c| c <= picks[i]) as u64 - 1;
        let pos = BlockPos { bucket, batch: None, offset: layout.block_offset(bucket) };
        buf.clear();
        read_block_into(f, layout, &pos, buf)?;
        let base = cum[bucket as usize];
        let end = cum[bucket as usize + 1];
        while i < picks.len() && picks[i] < end {
            let slot = (picks[i] - base) as usize;
            let rec = buf.get(slot * rs..(slot + 1) * rs).ok_or_else(|| pos.corrupt("bucket shrank during verify"))?;
            check_record(layout, rec, Location::new(layout, bucket, slot), opts, report)?;
            i += 1;
        }
    }
    Ok(())
}
