use plot_core::bucket::BucketSet;
use plot_core::generator::generate;
use plot_core::{
    build_store, nonce, verify, BuildConfig, MappedStore, PlotError, Sample, StoreLayout, StoreMeta, StoreReader,
    VerifyOptions,
};
use std::path::Path;
use tempfile::tempdir;

fn small_cfg(dir: &Path) -> BuildConfig {
    BuildConfig {
        output: dir.join("plot.bin"),
        key_len: 2,
        proof_len: 6,
        num_buckets: 4,
        total_records: 8,
        bucket_capacity: Some(4),
        gen_threads: 2,
        sort_threads: 2,
        ..BuildConfig::default()
    }
}

fn stored_records(path: &Path, layout: StoreLayout) -> Vec<(u64, Vec<u8>)> {
    let m = MappedStore::open(path, layout).unwrap();
    let rs = layout.record_size();
    let mut out = Vec::new();
    for b in 0..layout.num_buckets {
        for rec in m.bucket(b).unwrap().chunks_exact(rs) {
            out.push((b, rec.to_vec()));
        }
    }
    out
}

#[test]
fn four_buckets_eight_nonces() {
    let dir = tempdir().unwrap();
    let cfg = small_cfg(dir.path());
    let report = build_store(&cfg).unwrap();
    assert!(report.plan.is_one_shot());
    assert_eq!(report.gen.generated, 8);

    let layout = StoreMeta::load(&cfg.output).unwrap().layout;
    assert_eq!(layout.bucket_capacity, 4);
    assert_eq!(layout.prefix_bytes(), 1);
    assert_eq!(std::fs::metadata(&cfg.output).unwrap().len(), 4 * (2 + 4 * 8));

    let m = MappedStore::open(&cfg.output, layout).unwrap();
    let mut total = 0;
    for b in 0..4u64 {
        let recs = m.bucket(b).unwrap();
        let keys: Vec<&[u8]> = recs.chunks_exact(8).map(|r| &r[..2]).collect();
        assert!(keys.len() <= 4);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "bucket {b} unsorted");
        for k in &keys {
            assert_eq!((k[0] as u64 * 4) >> 8, b);
        }
        total += keys.len() as u64;
    }
    assert_eq!(total, report.stored);
    assert_eq!(report.dropped(), 8 - total);
}

#[test]
fn every_stored_record_is_found() {
    let dir = tempdir().unwrap();
    let mut cfg = small_cfg(dir.path());
    cfg.key_len = 4;
    cfg.num_buckets = 16;
    cfg.total_records = 500;
    cfg.bucket_capacity = None;
    build_store(&cfg).unwrap();

    let mut r = StoreReader::open(&cfg.output).unwrap();
    let layout = *r.layout();
    for (_, rec) in stored_records(&cfg.output, layout) {
        let found = r.lookup(&rec[..4]).unwrap().expect("stored key must be found");
        assert_eq!(found.key, &rec[..4]);
        assert!(layout.digest.verify(&found.key, &found.proof));
    }
    let before = r.seeks();
    r.lookup(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
    assert_eq!(r.seeks(), before + 1);
}

#[test]
fn lookups_read_one_bucket_and_search_logarithmically() {
    let dir = tempdir().unwrap();
    let mut cfg = small_cfg(dir.path());
    cfg.key_len = 4;
    cfg.num_buckets = 2;
    cfg.total_records = 200;
    cfg.bucket_capacity = Some(100);
    build_store(&cfg).unwrap();

    let mut r = StoreReader::open(&cfg.output).unwrap();
    let fill = MappedStore::open(&cfg.output, *r.layout()).unwrap().fill_stats().unwrap();
    assert!(fill.full >= 1);

    // nonces past the built range are misses
    let bound = plot_core::utils::ceil_log2(100) as u64;
    for n in 1_000..1_200 {
        let (seeks, cmps) = (r.seeks(), r.comparisons());
        r.lookup_nonce(n).unwrap();
        assert_eq!(r.seeks(), seeks + 1);
        assert!(r.comparisons() - cmps <= bound, "nonce {n}");
    }
}

#[test]
fn multi_batch_build_merges_and_cleans_up() {
    let dir = tempdir().unwrap();
    let cfg = BuildConfig {
        output: dir.path().join("big.bin"),
        key_len: 4,
        proof_len: 6,
        num_buckets: 8,
        total_records: 200,
        // 8 buckets * 10-byte records * cap 5
        memory_bytes: 400,
        gen_threads: 3,
        sort_threads: 2,
        ..BuildConfig::default()
    };
    let report = build_store(&cfg).unwrap();
    assert_eq!(report.plan.batch_layout.bucket_capacity, 5);
    assert_eq!(report.plan.num_batches, 5);
    assert_eq!(report.plan.store_layout.bucket_capacity, 25);
    assert!(!cfg.staging_path().exists());

    let merge = report.merge.unwrap();
    assert_eq!(merge.buckets, 8);
    assert_eq!(merge.trimmed, 0);
    assert_eq!(merge.records, report.gen.stored);
    assert_eq!(report.gen.generated - report.gen.stored, report.gen.dropped);

    let meta = StoreMeta::load(&cfg.output).unwrap();
    assert_eq!(meta.num_batches, 5);
    assert_eq!(meta.stored + meta.dropped, 200);

    let layout = meta.layout;
    let recs = stored_records(&cfg.output, layout);
    assert_eq!(recs.len() as u64, meta.stored);
    let mut r = StoreReader::open(&cfg.output).unwrap();
    let mut found = 0;
    for n in 0..200 {
        if let Some(rec) = r.lookup_nonce(n).unwrap() {
            assert_eq!(nonce::decode(&rec.proof), n);
            found += 1;
        }
    }
    assert_eq!(found, meta.stored);

    let opts = VerifyOptions { authenticity: Some(Sample::Head(u64::MAX)), ..VerifyOptions::default() };
    let v = verify(&cfg.output, &opts).unwrap();
    assert!(v.is_clean());
    assert_eq!(v.records, meta.stored);
    assert_eq!(v.hashes_checked, meta.stored);
}

#[test]
fn single_corrupt_proof_is_located() {
    let dir = tempdir().unwrap();
    let mut cfg = small_cfg(dir.path());
    cfg.total_records = 64;
    cfg.num_buckets = 8;
    cfg.bucket_capacity = None;
    build_store(&cfg).unwrap();
    let layout = StoreMeta::load(&cfg.output).unwrap().layout;

    let clean = verify(&cfg.output, &VerifyOptions { authenticity: Some(Sample::Head(u64::MAX)), ..VerifyOptions::default() })
        .unwrap();
    assert!(clean.is_clean());

    let (bucket, _) = stored_records(&cfg.output, layout)[0].clone();
    let rec_off = layout.block_offset(bucket) + 2;
    let mut bytes = std::fs::read(&cfg.output).unwrap();
    // last proof byte of the first record in that bucket
    bytes[(rec_off as usize) + layout.record_size() - 1] ^= 0x5A;
    std::fs::write(&cfg.output, &bytes).unwrap();

    let opts = VerifyOptions { authenticity: Some(Sample::Head(u64::MAX)), ..VerifyOptions::default() };
    let report = verify(&cfg.output, &opts).unwrap();
    assert_eq!(report.hashes_failed, 1);
    assert_eq!(report.unsorted, 0);
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].bucket, bucket);
    assert_eq!(report.mismatches[0].slot, 0);
    assert_eq!(report.mismatches[0].offset, rec_off);

    // same input, same findings
    assert_eq!(verify(&cfg.output, &opts).unwrap(), report);

    let ff = VerifyOptions { fail_fast: true, ..opts };
    assert!(matches!(verify(&cfg.output, &ff).unwrap_err(), PlotError::VerificationFailed(_)));
}

#[test]
fn skewed_overflow_counts_every_drop() {
    // two buckets of two slots; 100 nonces
    let layout = StoreLayout::new(2, 6, 2, 2);
    let set = BucketSet::new(layout).unwrap();
    let stats = generate(&set, 0, 100, 4, None);
    assert_eq!(stats.generated, 100);
    assert!(stats.stored <= 4);
    assert_eq!(stats.dropped, stats.generated - stats.stored);
    assert_eq!(set.stored(), stats.stored);
}

#[test]
fn failed_plan_leaves_no_store() {
    let dir = tempdir().unwrap();
    let mut cfg = small_cfg(dir.path());
    cfg.memory_bytes = 8;
    assert!(matches!(build_store(&cfg).unwrap_err(), PlotError::BudgetTooSmall { .. }));
    assert!(!cfg.output.exists());
    assert!(!StoreMeta::path_for(&cfg.output).exists());
}

#[test]
fn rebuild_never_pairs_store_with_old_meta() {
    let dir = tempdir().unwrap();
    let mut cfg = small_cfg(dir.path());
    build_store(&cfg).unwrap();
    let old = StoreMeta::load(&cfg.output).unwrap();

    // the new sidecar cannot be written: its temp path is a directory
    let meta = StoreMeta::path_for(&cfg.output);
    std::fs::create_dir(format!("{}.tmp", meta.display())).unwrap();
    cfg.num_buckets = 8;
    cfg.total_records = 64;
    cfg.bucket_capacity = None;
    assert!(build_store(&cfg).is_err());

    assert!(!meta.exists());
    assert_ne!(std::fs::metadata(&cfg.output).unwrap().len(), old.layout.file_size());
    assert!(StoreReader::open(&cfg.output).is_err());
}

#[test]
fn sha256_store_round_trips() {
    let dir = tempdir().unwrap();
    let mut cfg = small_cfg(dir.path());
    cfg.digest = plot_core::DigestKind::Sha256;
    cfg.key_len = 8;
    cfg.total_records = 100;
    cfg.bucket_capacity = None;
    build_store(&cfg).unwrap();
    let mut r = StoreReader::open(&cfg.output).unwrap();
    assert_eq!(r.layout().digest, plot_core::DigestKind::Sha256);
    let hit = r.lookup_nonce(42).unwrap();
    assert!(hit.is_some());
}
