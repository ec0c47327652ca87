use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;
use tracing::Level;

use plot_core::{
    build_store,
    consts::{DEFAULT_KEY_BYTES, DEFAULT_PROOF_BYTES, DEFAULT_READ_CHUNK_BUCKETS, DEFAULT_RECORDS_PER_BUCKET},
    utils::ceil_div,
    verify, BuildConfig, DigestKind, MappedStore, Sample, StoreMeta, StoreReader, VerifyOptions,
};

#[derive(Parser)]
#[command(name = "plot", about = "Bucketed plot store: build, look up, verify")]
struct Cli {
    /// Log at DEBUG level.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Generate a store.
    #[command(group(ArgGroup::new("size").required(true).args(["records", "k"])))]
    Gen {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        records: Option<u64>,
        /// Generate 2^k records.
        #[arg(long)]
        k: Option<u32>,
        /// Defaults to one bucket per 16 records.
        #[arg(long)]
        buckets: Option<u64>,
        /// Per-batch bucket capacity; derived from --memory-mb when unset.
        #[arg(long)]
        capacity: Option<usize>,
        #[arg(long, default_value_t = 256)]
        memory_mb: u64,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        sort_threads: Option<usize>,
        #[arg(long, default_value_t = DEFAULT_KEY_BYTES)]
        key_bytes: usize,
        #[arg(long, default_value_t = DEFAULT_PROOF_BYTES)]
        proof_bytes: usize,
        /// blake3 or sha256
        #[arg(long, default_value = "blake3")]
        digest: DigestKind,
        #[arg(long)]
        staging: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        start_nonce: u64,
    },

    /// Look up one key, one nonce, or a batch of random keys.
    #[command(group(ArgGroup::new("target").required(true).args(["key_hex", "nonce", "random"])))]
    Lookup {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        key_hex: Option<String>,
        #[arg(long)]
        nonce: Option<u64>,
        /// Number of random lookups to time.
        #[arg(long)]
        random: Option<u64>,
        /// Random leading bytes per key; the rest are zero. Defaults to the full key.
        #[arg(long)]
        prefix_bytes: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },

    Verify {
        #[arg(long)]
        file: PathBuf,
        /// Skip the sort-order check.
        #[arg(long, default_value_t = false)]
        no_order: bool,
        /// Check the hashes of the first N records.
        #[arg(long, conflicts_with = "random")]
        head: Option<u64>,
        /// Check the hashes of N randomly chosen records.
        #[arg(long)]
        random: Option<u64>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = DEFAULT_READ_CHUNK_BUCKETS)]
        chunk_buckets: usize,
        #[arg(long, default_value_t = false)]
        fail_fast: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print records in file order.
    Print {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        head: Option<usize>,
        #[arg(long)]
        tail: Option<usize>,
    },

    Info {
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    match cli.cmd {
        Cmd::Gen {
            file,
            records,
            k,
            buckets,
            capacity,
            memory_mb,
            threads,
            sort_threads,
            key_bytes,
            proof_bytes,
            digest,
            staging,
            start_nonce,
        } => {
            let total = match (records, k) {
                (Some(n), _) => n,
                (None, Some(k)) if k < 64 => 1u64 << k,
                (None, Some(k)) => bail!("--k {k} is too large"),
                (None, None) => bail!("one of --records or --k is required"),
            };
            let defaults = BuildConfig::default();
            let cfg = BuildConfig {
                output: file,
                staging,
                key_len: key_bytes,
                proof_len: proof_bytes,
                digest,
                num_buckets: buckets.unwrap_or_else(|| ceil_div(total, DEFAULT_RECORDS_PER_BUCKET).max(1)),
                total_records: total,
                bucket_capacity: capacity,
                memory_bytes: memory_mb << 20,
                gen_threads: threads.unwrap_or(defaults.gen_threads),
                sort_threads: sort_threads.or(threads).unwrap_or(defaults.sort_threads),
                start_nonce,
            };
            let report = build_store(&cfg).with_context(|| format!("building {}", cfg.output.display()))?;
            println!("gen: {}", report.output.display());
            println!(
                "     records={} buckets={} capacity={} batches={}",
                report.gen.generated,
                report.plan.store_layout.num_buckets,
                report.plan.store_layout.bucket_capacity,
                report.plan.num_batches
            );
            println!(
                "     stored={} dropped={} elapsed={:.3}s",
                report.stored,
                report.dropped(),
                report.elapsed.as_secs_f64()
            );
        }
        Cmd::Lookup { file, key_hex, nonce, random, prefix_bytes, seed } => {
            let mut reader = StoreReader::open(&file).with_context(|| format!("opening {}", file.display()))?;
            if let Some(h) = key_hex {
                let key = hex::decode(h.trim()).context("--key-hex is not valid hex")?;
                if key.len() != reader.layout().key_len {
                    bail!("key is {} bytes, store keys are {}", key.len(), reader.layout().key_len);
                }
                print_hit(reader.lookup(&key)?);
            } else if let Some(n) = nonce {
                print_hit(reader.lookup_nonce(n)?);
            } else if let Some(n) = random {
                let k = reader.layout().key_len;
                let p = prefix_bytes.unwrap_or(k).min(k);
                let mut rng = match seed {
                    Some(s) => StdRng::seed_from_u64(s),
                    None => StdRng::from_os_rng(),
                };
                let mut key = vec![0u8; k];
                let mut found = 0u64;
                let started = Instant::now();
                for _ in 0..n {
                    rng.fill(&mut key[..p]);
                    if reader.lookup(&key)?.is_some() {
                        found += 1;
                    }
                }
                let secs = started.elapsed().as_secs_f64();
                let ms_per = if n == 0 { 0.0 } else { secs * 1e3 / n as f64 };
                let per_sec = if secs > 0.0 { n as f64 / secs } else { 0.0 };
                println!("lookups={n} found={found} seeks={}", reader.seeks());
                println!("         {ms_per:.4} ms/lookup  {per_sec:.0} lookups/s");
            }
        }
        Cmd::Verify { file, no_order, head, random, seed, chunk_buckets, fail_fast, json } => {
            let authenticity = match (head, random) {
                (Some(n), _) => Some(Sample::Head(n)),
                (None, Some(count)) => Some(Sample::Random { count, seed }),
                (None, None) => None,
            };
            let opts = VerifyOptions { check_order: !no_order, authenticity, read_chunk_buckets: chunk_buckets, fail_fast };
            let report = verify(&file, &opts).with_context(|| format!("verifying {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("verify: buckets={} records={} full={} empty={}", report.buckets, report.records, report.full_buckets, report.empty_buckets);
                println!("        unsorted={} hashes_checked={} hashes_failed={}", report.unsorted, report.hashes_checked, report.hashes_failed);
                for l in &report.unsorted_at {
                    println!("        unsorted: bucket={} slot={} offset={}", l.bucket, l.slot, l.offset);
                }
                for l in &report.mismatches {
                    println!("        bad hash: bucket={} slot={} offset={}", l.bucket, l.slot, l.offset);
                }
            }
            if !report.is_clean() {
                bail!("{} unsorted pairs, {} bad hashes", report.unsorted, report.hashes_failed);
            }
        }
        Cmd::Print { file, head, tail } => {
            let meta = StoreMeta::load(&file)?;
            let store = MappedStore::open(&file, meta.layout)?;
            let head = if head.is_none() && tail.is_none() { Some(10) } else { head };
            if let Some(n) = head {
                for r in store.head(n)? {
                    println!("{}", r.render());
                }
            }
            if let Some(n) = tail {
                for r in store.tail(n)? {
                    println!("{}", r.render());
                }
            }
        }
        Cmd::Info { file } => {
            let meta = StoreMeta::load(&file)?;
            let l = meta.layout;
            let size = std::fs::metadata(&file)?.len();
            let fill = MappedStore::open(&file, l)?.fill_stats()?;
            println!("file     : {} ({size} bytes)", file.display());
            println!("layout   : key={}B proof={}B digest={:?} prefix={}B", l.key_len, l.proof_len, l.digest, meta.prefix_bytes);
            println!("buckets  : {} x {} slots ({} bytes/block)", l.num_buckets, l.bucket_capacity, l.block_size());
            println!(
                "records  : generated={} stored={} dropped={} batches={} start_nonce={}",
                meta.generated, meta.stored, meta.dropped, meta.num_batches, meta.start_nonce
            );
            println!(
                "fill     : min={} max={} mean={:.2} full={} empty={}",
                fill.min, fill.max, fill.mean, fill.full, fill.empty
            );
        }
    }
    Ok(())
}

fn print_hit(hit: Option<plot_core::Record>) {
    match hit {
        Some(r) => println!(
            "found: key={} proof={} nonce={}",
            hex::encode(&r.key),
            hex::encode(&r.proof),
            plot_core::nonce::decode(&r.proof)
        ),
        None => println!("not found"),
    }
}
