//! Build configuration and the batch plan derived from it.

use crate::consts::{
    DEFAULT_KEY_BYTES, DEFAULT_MEMORY_BYTES, DEFAULT_PROOF_BYTES, MAX_BUCKET_CAPACITY, STAGING_SUFFIX,
};
use crate::digest::DigestKind;
use crate::errors::{PlotError, Result};
use crate::layout::StoreLayout;
use crate::nonce;
use crate::utils::{ceil_div, with_suffix};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub output: PathBuf,
    /// Defaults to `<output>.staging`.
    pub staging: Option<PathBuf>,
    pub key_len: usize,
    pub proof_len: usize,
    pub digest: DigestKind,
    pub num_buckets: u64,
    pub total_records: u64,
    /// Per-batch bucket cap. Derived from the memory budget when unset.
    pub bucket_capacity: Option<usize>,
    pub memory_bytes: u64,
    pub gen_threads: usize,
    pub sort_threads: usize,
    pub start_nonce: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            output: PathBuf::from("plot.bin"),
            staging: None,
            key_len: DEFAULT_KEY_BYTES,
            proof_len: DEFAULT_PROOF_BYTES,
            digest: DigestKind::Blake3,
            num_buckets: 1,
            total_records: 0,
            bucket_capacity: None,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            gen_threads: threads,
            sort_threads: threads,
            start_nonce: 0,
        }
    }
}

impl BuildConfig {
    pub fn staging_path(&self) -> PathBuf {
        self.staging.clone().unwrap_or_else(|| with_suffix(&self.output, STAGING_SUFFIX))
    }

    pub fn plan(&self) -> Result<BuildPlan> {
        BuildPlan::derive(self)
    }
}

/// Geometry of one build: how many batches, and the caps of staging and store blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    /// Layout of every staging pass (per-batch capacity).
    pub batch_layout: StoreLayout,
    /// Layout of the final store.
    pub store_layout: StoreLayout,
    pub total_records: u64,
    pub batch_records: u64,
    pub num_batches: u64,
    pub start_nonce: u64,
}

impl BuildPlan {
    pub fn derive(cfg: &BuildConfig) -> Result<Self> {
        if cfg.total_records == 0 {
            return Err(PlotError::InvalidConfig("total_records must be > 0".into()));
        }
        if cfg.gen_threads == 0 || cfg.sort_threads == 0 {
            return Err(PlotError::InvalidConfig("thread counts must be > 0".into()));
        }
        let end = cfg.start_nonce.checked_add(cfg.total_records);
        match end {
            Some(end) if end <= nonce::space(cfg.proof_len) => {}
            _ => {
                return Err(PlotError::InvalidConfig(format!(
                    "{} proof bytes cannot count from {} to {} without repeating",
                    cfg.proof_len, cfg.start_nonce, cfg.start_nonce as u128 + cfg.total_records as u128
                )))
            }
        }

        let shape = StoreLayout::new(cfg.key_len, cfg.proof_len, cfg.num_buckets, 1).with_digest(cfg.digest);
        shape.validate()?;
        let rs = shape.record_size() as u64;

        let capacity = match cfg.bucket_capacity {
            Some(cap) => {
                let needed = cap as u64 * rs;
                if needed > cfg.memory_bytes {
                    return Err(PlotError::BudgetTooSmall { needed, budget: cfg.memory_bytes });
                }
                cap
            }
            None => {
                let by_memory = cfg.memory_bytes / (cfg.num_buckets.saturating_mul(rs));
                if by_memory == 0 {
                    return Err(PlotError::BudgetTooSmall { needed: rs.saturating_mul(cfg.num_buckets), budget: cfg.memory_bytes });
                }
                by_memory
                    .min(one_shot_capacity(cfg.total_records, cfg.num_buckets))
                    .min(MAX_BUCKET_CAPACITY as u64) as usize
            }
        };
        let batch_layout = shape.with_capacity(capacity);
        batch_layout.validate()?;

        let batch_records = cfg.num_buckets.saturating_mul(capacity as u64);
        let num_batches = ceil_div(cfg.total_records, batch_records);
        let store_cap = (capacity as u64).saturating_mul(num_batches).min(MAX_BUCKET_CAPACITY as u64);
        let store_layout = shape.with_capacity(store_cap as usize);

        Ok(Self {
            batch_layout,
            store_layout,
            total_records: cfg.total_records,
            batch_records,
            num_batches,
            start_nonce: cfg.start_nonce,
        })
    }

    pub fn is_one_shot(&self) -> bool { self.num_batches == 1 }

    /// Nonce range `[start, start + len)` of batch `i`.
    pub fn batch_range(&self, i: u64) -> (u64, u64) {
        let offset = i * self.batch_records;
        let len = self.batch_records.min(self.total_records - offset);
        (self.start_nonce + offset, len)
    }

    /// Bytes of one full staging pass.
    pub fn pass_size(&self) -> u64 { self.batch_layout.file_size() }
}

/// Expected load `λ` plus a Poisson tail margin of `3·sqrt(λ) + 1`.
pub fn one_shot_capacity(total: u64, num_buckets: u64) -> u64 {
    let lambda = ceil_div(total, num_buckets);
    lambda + (3.0 * (lambda as f64).sqrt()).ceil() as u64 + 1
}
