//! Point lookups: placement -> one seek -> header + occupied records -> binary search.

use crate::block::{read_block_into, search_records_counted, BlockPos};
use crate::errors::{IoContext, PlotError, Result};
use crate::layout::{Record, StoreLayout};
use crate::meta::StoreMeta;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct StoreReader {
    path: PathBuf,
    file: File,
    layout: StoreLayout,
    meta: Option<StoreMeta>,
    buf: Vec<u8>,
    seeks: u64,
    comparisons: u64,
}

impl StoreReader {
    /// Open a store using its `.meta.json` sidecar for the layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let meta = StoreMeta::load(path.as_ref())?;
        let layout = meta.layout;
        Self::open_inner(path.as_ref(), layout, Some(meta))
    }

    /// Open a store whose layout is known out of band.
    pub fn open_with_layout(path: impl AsRef<Path>, layout: StoreLayout) -> Result<Self> {
        layout.validate()?;
        Self::open_inner(path.as_ref(), layout, None)
    }

    fn open_inner(path: &Path, layout: StoreLayout, meta: Option<StoreMeta>) -> Result<Self> {
        let file = File::open(path).at("open store", 0)?;
        let len = file.metadata().at("stat store", 0)?.len();
        if len != layout.file_size() {
            return Err(PlotError::LayoutMismatch(format!(
                "{} is {len} bytes, layout expects {} buckets x {} = {}",
                path.display(),
                layout.num_buckets,
                layout.block_size(),
                layout.file_size()
            )));
        }
        Ok(Self { path: path.to_path_buf(), file, layout, meta, buf: Vec::new(), seeks: 0, comparisons: 0 })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn layout(&self) -> &StoreLayout { &self.layout }
    pub fn meta(&self) -> Option<&StoreMeta> { self.meta.as_ref() }

    /// Block seeks issued so far.
    pub fn seeks(&self) -> u64 { self.seeks }

    /// In-memory key comparisons made by lookups so far.
    pub fn comparisons(&self) -> u64 { self.comparisons }

    /// Read the occupied records of one bucket (count header, then `count` records).
    pub fn read_bucket(&mut self, bucket: u64) -> Result<&[u8]> {
        if bucket >= self.layout.num_buckets {
            return Err(PlotError::InvalidConfig(format!(
                "bucket {bucket} outside 0..{}",
                self.layout.num_buckets
            )));
        }
        let pos = BlockPos { bucket, batch: None, offset: self.layout.block_offset(bucket) };
        self.buf.clear();
        self.seeks += 1;
        read_block_into(&mut self.file, &self.layout, &pos, &mut self.buf)?;
        Ok(&self.buf)
    }

    /// Find the record whose key equals `key`. `Ok(None)` is a miss, not an error.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Record>> {
        if key.len() != self.layout.key_len {
            return Err(PlotError::InvalidConfig(format!(
                "key is {} bytes, store keys are {}",
                key.len(),
                self.layout.key_len
            )));
        }
        let bucket = self.layout.placement(key);
        let rs = self.layout.record_size();
        let k = self.layout.key_len;
        self.read_bucket(bucket)?;
        let (slot, cmps) = search_records_counted(&self.buf, rs, key);
        self.comparisons += cmps as u64;
        Ok(slot.map(|slot| Record::from_bytes(&self.buf[slot * rs..(slot + 1) * rs], k)))
    }

    /// Recompute the key of nonce `n` and look it up.
    pub fn lookup_nonce(&mut self, n: u64) -> Result<Option<Record>> {
        let proof = crate::nonce::encode(n, self.layout.proof_len);
        let key = self.layout.digest.digest(&proof, self.layout.key_len);
        self.lookup(&key)
    }
}

/// One-off lookup against the store at `path`.
pub fn lookup(path: impl AsRef<Path>, key: &[u8]) -> Result<Option<Record>> {
    StoreReader::open(path)?.lookup(key)
}
