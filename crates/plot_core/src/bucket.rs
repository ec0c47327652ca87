//! In-memory bucket accumulators shared by the generator threads.

use crate::block::{sort_records, write_block};
use crate::errors::{alloc_vec, IoContext, PlotError, Result};
use crate::layout::StoreLayout;
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Fixed-capacity record buffer for one bucket.
#[derive(Debug)]
pub struct Bucket {
    data: Vec<u8>,
    count: usize,
}

impl Bucket {
    fn with_capacity(bytes: usize) -> Result<Self> {
        let mut data = alloc_vec("bucket accumulator", bytes)?;
        data.resize(bytes, 0);
        Ok(Self { data, count: 0 })
    }

    pub fn len(&self) -> usize { self.count }
    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// Occupied record bytes.
    pub fn records(&self, record_size: usize) -> &[u8] { &self.data[..self.count * record_size] }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Add a full pass of blocks after whatever the file holds (batch staging).
    Append,
    /// Replace the file contents (one-shot build).
    Truncate,
}

/// `num_buckets` accumulators, each behind its own lock.
pub struct BucketSet {
    layout: StoreLayout,
    buckets: Vec<Mutex<Bucket>>,
    dropped: AtomicU64,
}

impl BucketSet {
    /// Allocate zeroed accumulators for `layout`. Fails with `Alloc` rather than aborting.
    pub fn new(layout: StoreLayout) -> Result<Self> {
        let n = usize::try_from(layout.num_buckets)
            .map_err(|_| PlotError::InvalidConfig("too many buckets for this platform".into()))?;
        let per_bucket = layout.bucket_capacity * layout.record_size();
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(n)
            .map_err(|_| PlotError::Alloc { what: "bucket table", bytes: n * std::mem::size_of::<Mutex<Bucket>>() })?;
        for _ in 0..n {
            buckets.push(Mutex::new(Bucket::with_capacity(per_bucket)?));
        }
        Ok(Self { layout, buckets, dropped: AtomicU64::new(0) })
    }

    pub fn layout(&self) -> &StoreLayout { &self.layout }
    pub fn num_buckets(&self) -> usize { self.buckets.len() }

    fn lock(&self, index: usize) -> MutexGuard<'_, Bucket> {
        // poison is ignored: count only moves after its slot is fully written
        self.buckets[index].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy `key ++ proof` into bucket `index`. Returns false (and counts the drop)
    /// when the bucket is already full.
    pub fn insert(&self, index: usize, key: &[u8], proof: &[u8]) -> bool {
        let rs = self.layout.record_size();
        let mut b = self.lock(index);
        if b.count >= self.layout.bucket_capacity {
            drop(b);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let at = b.count * rs;
        b.data[at..at + key.len()].copy_from_slice(key);
        b.data[at + key.len()..at + rs].copy_from_slice(proof);
        b.count += 1;
        true
    }

    /// Records rejected because their bucket was full.
    pub fn dropped(&self) -> u64 { self.dropped.load(Ordering::Relaxed) }

    pub fn stored(&self) -> u64 {
        (0..self.buckets.len()).map(|i| self.lock(i).count as u64).sum()
    }

    /// Copy of the occupied record bytes of bucket `index`.
    pub fn bucket_records(&self, index: usize) -> Vec<u8> {
        self.lock(index).records(self.layout.record_size()).to_vec()
    }

    /// Sort every bucket by key, in parallel on the current rayon pool.
    pub fn sort_all(&mut self) {
        let rs = self.layout.record_size();
        let k = self.layout.key_len;
        self.buckets.par_iter_mut().for_each(|m| {
            let b = m.get_mut().unwrap_or_else(|e| e.into_inner());
            let n = b.count * rs;
            sort_records(&mut b.data[..n], rs, k);
        });
    }

    /// Serialize all blocks in bucket order.
    pub fn write_blocks<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let rs = self.layout.record_size();
        for i in 0..self.buckets.len() {
            let b = self.lock(i);
            write_block(w, &self.layout, b.records(rs))?;
        }
        Ok(())
    }

    /// Write a full pass of `num_buckets` blocks to `path`. Returns the byte offset
    /// the pass started at. Any short write fails the whole flush.
    pub fn flush(&self, path: &Path, mode: FlushMode) -> Result<u64> {
        let mut f = open_for_flush(path, mode)?;
        let start = f.seek(SeekFrom::End(0)).at("seek end", 0)?;
        let mut w = BufWriter::new(&mut f);
        self.write_blocks(&mut w).at("flush blocks", start)?;
        w.flush().at("flush blocks", start)?;
        drop(w);
        f.sync_data().at("sync flush", start)?;
        Ok(start)
    }
}

fn open_for_flush(path: &Path, mode: FlushMode) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true);
    match mode {
        FlushMode::Append => opts.append(true),
        FlushMode::Truncate => opts.truncate(true),
    };
    opts.open(path).at("open for flush", 0)
}
