//! Bucket block encode/decode over plain byte buffers.
//!
//! A block is `count: u16 LE` followed by `capacity` fixed-size record slots.
//! Only the first `count` slots carry data; the rest are zero.

use crate::consts::COUNT_BYTES;
use crate::errors::{IoContext, PlotError, Result};
use crate::layout::StoreLayout;
use crate::utils::{read_u16, write_u16};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Write one padded block holding `records` (exactly `count * record_size` bytes).
pub fn write_block<W: Write>(w: &mut W, layout: &StoreLayout, records: &[u8]) -> io::Result<()> {
    let rs = layout.record_size();
    debug_assert_eq!(records.len() % rs, 0);
    let count = records.len() / rs;
    debug_assert!(count <= layout.bucket_capacity);
    write_u16(w, count as u16)?;
    w.write_all(records)?;
    write_zeros(w, (layout.bucket_capacity - count) * rs)
}

fn write_zeros<W: Write>(w: &mut W, mut n: usize) -> io::Result<()> {
    const ZEROS: [u8; 4096] = [0u8; 4096];
    while n > 0 {
        let step = n.min(ZEROS.len());
        w.write_all(&ZEROS[..step])?;
        n -= step;
    }
    Ok(())
}

/// Where a block came from, for error reporting.
#[derive(Debug, Clone, Copy)]
pub struct BlockPos {
    pub bucket: u64,
    pub batch: Option<u64>,
    pub offset: u64,
}

impl BlockPos {
    pub fn corrupt(&self, reason: impl Into<String>) -> PlotError {
        PlotError::CorruptBlock {
            bucket: self.bucket,
            batch: self.batch,
            offset: self.offset,
            reason: reason.into(),
        }
    }
}

/// Check a count read from disk against the block capacity.
pub fn check_count(count: u16, capacity: usize, pos: &BlockPos) -> Result<usize> {
    let count = count as usize;
    if count > capacity {
        return Err(pos.corrupt(format!("count {count} exceeds capacity {capacity}")));
    }
    Ok(count)
}

/// Seek to `pos.offset`, read the count and then exactly `count` records, appending
/// them to `out`. Returns the record count. Padding is never read.
pub fn read_block_into<R: Read + Seek>(
    r: &mut R,
    layout: &StoreLayout,
    pos: &BlockPos,
    out: &mut Vec<u8>,
) -> Result<usize> {
    r.seek(SeekFrom::Start(pos.offset)).at("seek block", pos.offset)?;
    let count = match read_u16(r) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(pos.corrupt("short read of count header"));
        }
        Err(e) => return Err(e).at("read block header", pos.offset),
    };
    let count = check_count(count, layout.bucket_capacity, pos)?;
    let start = out.len();
    let n = count * layout.record_size();
    out.resize(start + n, 0);
    match r.read_exact(&mut out[start..]) {
        Ok(()) => Ok(count),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            out.truncate(start);
            Err(pos.corrupt(format!("short read of {count} records")))
        }
        Err(e) => Err(e).at("read block records", pos.offset + COUNT_BYTES as u64),
    }
}

/// Parse a whole block already in memory. Returns the occupied record bytes.
pub fn parse_block<'a>(buf: &'a [u8], layout: &StoreLayout, pos: &BlockPos) -> Result<&'a [u8]> {
    if buf.len() < COUNT_BYTES {
        return Err(pos.corrupt("block shorter than its header"));
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]);
    let count = check_count(count, layout.bucket_capacity, pos)?;
    let end = COUNT_BYTES + count * layout.record_size();
    buf.get(COUNT_BYTES..end)
        .ok_or_else(|| pos.corrupt(format!("block too short for {count} records")))
}

/// Sort fixed-size records in place by their first `key_len` bytes.
pub fn sort_records(buf: &mut [u8], record_size: usize, key_len: usize) {
    if buf.len() <= record_size { return; }
    let sorted = {
        let mut recs: Vec<&[u8]> = buf.chunks_exact(record_size).collect();
        recs.sort_unstable_by(|a, b| a[..key_len].cmp(&b[..key_len]));
        recs.concat()
    };
    buf.copy_from_slice(&sorted);
}

/// Number of adjacent pairs with `key[i-1] > key[i]`, and the first offending slot.
pub fn count_unsorted(records: &[u8], record_size: usize, key_len: usize) -> (u64, Option<usize>) {
    let mut n = 0u64;
    let mut first = None;
    let mut prev: Option<&[u8]> = None;
    for (i, rec) in records.chunks_exact(record_size).enumerate() {
        let key = &rec[..key_len];
        if let Some(p) = prev {
            if p > key {
                n += 1;
                first.get_or_insert(i);
            }
        }
        prev = Some(key);
    }
    (n, first)
}

/// Binary search sorted records for `key`. Returns the matching slot.
pub fn search_records(records: &[u8], record_size: usize, key: &[u8]) -> Option<usize> {
    search_records_counted(records, record_size, key).0
}

/// [`search_records`] plus the number of key comparisons it made, at most
/// `ceil(log2(count + 1))`.
pub fn search_records_counted(records: &[u8], record_size: usize, key: &[u8]) -> (Option<usize>, u32) {
    let count = records.len() / record_size;
    let (mut lo, mut hi) = (0usize, count);
    let mut cmps = 0u32;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let at = mid * record_size;
        cmps += 1;
        match records[at..at + key.len()].cmp(key) {
            std::cmp::Ordering::Equal => return (Some(mid), cmps),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    (None, cmps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn layout() -> StoreLayout { StoreLayout::new(2, 2, 2, 4) }

    #[test]
    fn block_is_fixed_size_and_padded() {
        let l = layout();
        let mut buf = Vec::new();
        write_block(&mut buf, &l, &[1, 1, 9, 9, 2, 2, 8, 8]).unwrap();
        assert_eq!(buf.len() as u64, l.block_size());
        assert_eq!(&buf[..2], &[2, 0]);
        assert!(buf[2 + 8..].iter().all(|&b| b == 0));

        let mut empty = Vec::new();
        write_block(&mut empty, &l, &[]).unwrap();
        assert_eq!(empty.len(), buf.len());
    }

    #[test]
    fn read_block_stops_at_count() {
        let l = layout();
        let mut file = Vec::new();
        write_block(&mut file, &l, &[0, 0, 0, 0]).unwrap();
        write_block(&mut file, &l, &[5, 5, 6, 6, 7, 7, 8, 8]).unwrap();
        let mut out = vec![0xAA];
        let pos = BlockPos { bucket: 1, batch: None, offset: l.block_offset(1) };
        let n = read_block_into(&mut Cursor::new(&file), &l, &pos, &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, vec![0xAA, 5, 5, 6, 6, 7, 7, 8, 8]);
    }

    #[test]
    fn oversized_count_is_corrupt() {
        let l = layout();
        let mut file = Vec::new();
        write_block(&mut file, &l, &[]).unwrap();
        file[0] = 5;
        let pos = BlockPos { bucket: 0, batch: Some(3), offset: 0 };
        let err = read_block_into(&mut Cursor::new(&file), &l, &pos, &mut Vec::new()).unwrap_err();
        match err {
            PlotError::CorruptBlock { bucket: 0, batch: Some(3), .. } => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_block(&file, &l, &pos).is_err());
    }

    #[test]
    fn truncated_block_is_corrupt() {
        let l = layout();
        let mut file = Vec::new();
        write_block(&mut file, &l, &[1, 1, 1, 1, 2, 2, 2, 2]).unwrap();
        file.truncate(5);
        let pos = BlockPos { bucket: 0, batch: None, offset: 0 };
        let err = read_block_into(&mut Cursor::new(&file), &l, &pos, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PlotError::CorruptBlock { .. }));
    }

    #[test]
    fn sort_then_search() {
        let mut recs = vec![9, 0, 1, 1, 3, 0, 2, 2, 1, 0, 3, 3];
        sort_records(&mut recs, 4, 2);
        assert_eq!(recs, vec![1, 0, 3, 3, 3, 0, 2, 2, 9, 0, 1, 1]);
        assert_eq!(count_unsorted(&recs, 4, 2), (0, None));
        assert_eq!(search_records(&recs, 4, &[3, 0]), Some(1));
        assert_eq!(search_records(&recs, 4, &[9, 0]), Some(2));
        assert_eq!(search_records(&recs, 4, &[4, 0]), None);
        assert_eq!(search_records(&[], 4, &[4, 0]), None);
    }

    #[test]
    fn miss_in_full_bucket_is_logarithmic() {
        // 100 slots of 2-byte keys: even values 0, 2, .., 198
        let recs: Vec<u8> = (0..100u16).flat_map(|i| (i * 2).to_be_bytes()).collect();
        for miss in (0..=200u16).step_by(2).map(|k| k + 1).chain([u16::MAX]) {
            let (hit, cmps) = search_records_counted(&recs, 2, &miss.to_be_bytes());
            assert_eq!(hit, None);
            assert!(cmps <= crate::utils::ceil_log2(100), "{miss}: {cmps} comparisons");
        }
        // a power-of-two count needs one more than log2 for some keys
        let recs: Vec<u8> = (0..64u16).flat_map(|i| (i * 2 + 2).to_be_bytes()).collect();
        for k in 0..=130u16 {
            let (_, cmps) = search_records_counted(&recs, 2, &k.to_be_bytes());
            assert!(cmps <= crate::utils::ceil_log2(65));
        }
    }

    #[test]
    fn unsorted_pairs_counted() {
        let recs = vec![5, 0, 4, 0, 6, 0, 1, 0];
        assert_eq!(count_unsorted(&recs, 2, 1), (2, Some(1)));
    }
}
