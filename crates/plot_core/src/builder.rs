//! Build pipeline: generate -> (stage + merge) -> publish.
//!
//! One batch: generate into accumulators, sort them in memory, write the store
//! straight to a temp file. Several batches: each batch is appended to the staging
//! file as a full pass, then the merge sorts every bucket across passes into the
//! temp file. The temp file is renamed over the output only after everything
//! succeeded, followed by the `.meta.json` sidecar.

use crate::bucket::{BucketSet, FlushMode};
use crate::config::{BuildConfig, BuildPlan};
use crate::errors::{IoContext, Result};
use crate::generator::{generate, GenStats};
use crate::merge::{merge_staging, MergeStats};
use crate::meta::StoreMeta;
use crate::progress::Progress;
use crate::utils::fsync_dir;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    pub plan: BuildPlan,
    pub gen: GenStats,
    pub merge: Option<MergeStats>,
    /// Records present in the final store.
    pub stored: u64,
    pub elapsed: Duration,
}

impl BuildReport {
    /// Every record generated but absent from the store: bucket overflow during
    /// generation plus merge trimming.
    pub fn dropped(&self) -> u64 { self.gen.generated - self.stored }
}

/// Build a complete store at `cfg.output`.
pub fn build_store(cfg: &BuildConfig) -> Result<BuildReport> {
    let started = Instant::now();
    let plan = cfg.plan()?;
    let batch_mem = plan.batch_layout.num_buckets * plan.batch_layout.bucket_capacity as u64
        * plan.batch_layout.record_size() as u64;
    info!(
        output = %cfg.output.display(),
        records = plan.total_records,
        buckets = plan.store_layout.num_buckets,
        batches = plan.num_batches,
        "build start"
    );
    debug!(?plan, batch_mem, "build plan");
    if batch_mem > cfg.memory_bytes {
        warn!(batch_mem, budget = cfg.memory_bytes, "accumulators exceed the memory budget");
    }

    let gen_pool = ThreadPoolBuilder::new().num_threads(cfg.gen_threads).build()?;
    let dir = match cfg.output.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = tempfile::Builder::new().prefix(".plot_").tempfile_in(&dir)?;

    let (gen, merge) = if plan.is_one_shot() {
        (one_shot(cfg, &plan, &gen_pool, &tmp)?, None)
    } else {
        let staging = cfg.staging_path();
        let gen = stage_batches(cfg, &plan, &gen_pool, &staging)?;
        let sort_pool = ThreadPoolBuilder::new().num_threads(cfg.sort_threads).build()?;
        let progress = Progress::new("MERGE", plan.store_layout.num_buckets);
        let stats = sort_pool.install(|| {
            merge_staging(&plan, &staging, tmp.path(), cfg.sort_threads, Some(&progress))
        })?;
        progress.finish();
        std::fs::remove_file(&staging).at("remove staging", 0)?;
        (gen, Some(stats))
    };

    tmp.as_file().sync_all().at("sync store", 0)?;
    // a previous build's sidecar must never describe the new store
    match std::fs::remove_file(StoreMeta::path_for(&cfg.output)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e).at("remove stale meta", 0),
        _ => {}
    }
    tmp.persist(&cfg.output)?;
    let _ = fsync_dir(&cfg.output);

    let stored = merge.map(|m| m.records).unwrap_or(gen.stored);
    let mut meta = StoreMeta::new(plan.store_layout);
    meta.generated = gen.generated;
    meta.stored = stored;
    meta.dropped = gen.generated - stored;
    meta.num_batches = plan.num_batches;
    meta.start_nonce = plan.start_nonce;
    meta.save_atomic(&cfg.output)?;

    let report = BuildReport { output: cfg.output.clone(), plan, gen, merge, stored, elapsed: started.elapsed() };
    if report.dropped() > 0 {
        warn!(dropped = report.dropped(), "records lost to full buckets");
    }
    info!(stored, elapsed_s = report.elapsed.as_secs_f64(), "build done");
    Ok(report)
}

fn one_shot(
    cfg: &BuildConfig,
    plan: &BuildPlan,
    pool: &rayon::ThreadPool,
    tmp: &NamedTempFile,
) -> Result<GenStats> {
    let mut buckets = BucketSet::new(plan.batch_layout)?;
    let (start, len) = plan.batch_range(0);
    let progress = Progress::new("GEN", len);
    let stats = pool.install(|| {
        let stats = generate(&buckets, start, len, cfg.gen_threads, Some(&progress));
        buckets.sort_all();
        stats
    });
    progress.finish();
    buckets.flush(tmp.path(), FlushMode::Truncate)?;
    Ok(stats)
}

fn stage_batches(cfg: &BuildConfig, plan: &BuildPlan, pool: &rayon::ThreadPool, staging: &Path) -> Result<GenStats> {
    // a leftover staging file from an aborted run would shift every pass
    if staging.exists() {
        std::fs::remove_file(staging).at("remove stale staging", 0)?;
    }
    let progress = Progress::new("GEN", plan.total_records);
    let mut total = GenStats::default();
    for i in 0..plan.num_batches {
        let (start, len) = plan.batch_range(i);
        let buckets = BucketSet::new(plan.batch_layout)?;
        let stats = pool.install(|| generate(&buckets, start, len, cfg.gen_threads, Some(&progress)));
        let at = buckets.flush(staging, FlushMode::Append)?;
        debug!(batch = i, start, len, offset = at, dropped = stats.dropped, "batch staged");
        total.add(stats);
    }
    progress.finish();
    Ok(total)
}
