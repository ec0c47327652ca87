//! Memory-mapped, file-order view of a store: head/tail dumps and fill statistics.

use crate::block::{parse_block, BlockPos};
use crate::errors::{IoContext, PlotError, Result};
use crate::layout::{Record, StoreLayout};
use crate::nonce;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

#[derive(Debug)]
pub struct MappedStore {
    _f: File,
    mmap: Mmap,
    layout: StoreLayout,
}

/// A record together with its global index in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRecord {
    pub index: u64,
    pub bucket: u64,
    pub record: Record,
}

impl IndexedRecord {
    /// `[index] key_hex : proof_hex : nonce`
    pub fn render(&self) -> String {
        format!(
            "[{}] Hash: {} : {} : {}",
            self.index,
            hex::encode(&self.record.key),
            hex::encode(&self.record.proof),
            nonce::decode(&self.record.proof)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FillStats {
    pub buckets: u64,
    pub records: u64,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    pub full: u64,
    pub empty: u64,
}

impl MappedStore {
    pub fn open(path: impl AsRef<Path>, layout: StoreLayout) -> Result<Self> {
        let f = File::open(path.as_ref()).at("open store", 0)?;
        let mmap = unsafe { Mmap::map(&f).at("map store", 0)? };
        if mmap.len() as u64 != layout.file_size() {
            return Err(PlotError::LayoutMismatch(format!(
                "mapped {} bytes, layout expects {}",
                mmap.len(),
                layout.file_size()
            )));
        }
        Ok(Self { _f: f, mmap, layout })
    }

    pub fn layout(&self) -> &StoreLayout { &self.layout }

    /// Occupied record bytes of one bucket.
    pub fn bucket(&self, b: u64) -> Result<&[u8]> {
        let off = self.layout.block_offset(b);
        let end = off + self.layout.block_size();
        let pos = BlockPos { bucket: b, batch: None, offset: off };
        parse_block(&self.mmap[off as usize..end as usize], &self.layout, &pos)
    }

    fn record(&self, index: u64, bucket: u64, raw: &[u8]) -> IndexedRecord {
        IndexedRecord { index, bucket, record: Record::from_bytes(raw, self.layout.key_len) }
    }

    /// First `n` records in file order.
    pub fn head(&self, n: usize) -> Result<Vec<IndexedRecord>> {
        let rs = self.layout.record_size();
        let mut out = Vec::with_capacity(n);
        let mut index = 0u64;
        for b in 0..self.layout.num_buckets {
            if out.len() >= n { break; }
            for raw in self.bucket(b)?.chunks_exact(rs) {
                if out.len() >= n { break; }
                out.push(self.record(index, b, raw));
                index += 1;
            }
        }
        Ok(out)
    }

    /// Last `n` records in file order, walking buckets from the end.
    pub fn tail(&self, n: usize) -> Result<Vec<IndexedRecord>> {
        let rs = self.layout.record_size();
        let total: u64 = (0..self.layout.num_buckets)
            .map(|b| self.bucket(b).map(|r| (r.len() / rs) as u64))
            .sum::<Result<u64>>()?;
        let mut out = Vec::with_capacity(n);
        let mut next = total;
        for b in (0..self.layout.num_buckets).rev() {
            if out.len() >= n { break; }
            let recs = self.bucket(b)?;
            for raw in recs.chunks_exact(rs).rev() {
                if out.len() >= n { break; }
                next -= 1;
                out.push(self.record(next, b, raw));
            }
        }
        out.reverse();
        Ok(out)
    }

    pub fn fill_stats(&self) -> Result<FillStats> {
        let rs = self.layout.record_size();
        let mut s = FillStats { min: usize::MAX, ..FillStats::default() };
        for b in 0..self.layout.num_buckets {
            let c = self.bucket(b)?.len() / rs;
            s.buckets += 1;
            s.records += c as u64;
            s.min = s.min.min(c);
            s.max = s.max.max(c);
            if c == self.layout.bucket_capacity { s.full += 1; }
            if c == 0 { s.empty += 1; }
        }
        if s.buckets == 0 { s.min = 0; }
        s.mean = if s.buckets == 0 { 0.0 } else { s.records as f64 / s.buckets as f64 };
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::write_block;

    fn fixture(dir: &Path) -> (std::path::PathBuf, StoreLayout) {
        let layout = StoreLayout::new(1, 2, 3, 2);
        let mut bytes = Vec::new();
        write_block(&mut bytes, &layout, &[0x10, 0, 0, 0x20, 1, 0]).unwrap();
        write_block(&mut bytes, &layout, &[]).unwrap();
        write_block(&mut bytes, &layout, &[0xE0, 2, 0]).unwrap();
        let path = dir.join("d.bin");
        std::fs::write(&path, bytes).unwrap();
        (path, layout)
    }

    #[test]
    fn head_and_tail_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let (path, layout) = fixture(dir.path());
        let m = MappedStore::open(&path, layout).unwrap();

        let head = m.head(2).unwrap();
        assert_eq!(head.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(head[1].record.key, vec![0x20]);

        let tail = m.tail(2).unwrap();
        assert_eq!(tail.iter().map(|r| (r.index, r.bucket)).collect::<Vec<_>>(), vec![(1, 0), (2, 2)]);
        assert_eq!(tail[1].render(), "[2] Hash: e0 : 0200 : 2");
        assert_eq!(m.tail(10).unwrap().len(), 3);
    }

    #[test]
    fn fill_stats_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (path, layout) = fixture(dir.path());
        let s = MappedStore::open(&path, layout).unwrap().fill_stats().unwrap();
        assert_eq!((s.records, s.min, s.max, s.full, s.empty), (3, 0, 2, 1, 1));
    }
}
