//! Rate-limited progress lines for long stages.

use crate::consts::PROGRESS_INTERVAL;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

pub struct Progress {
    stage: &'static str,
    total: u64,
    done: AtomicU64,
    start: Instant,
    interval: Duration,
    last: Mutex<Instant>,
}

impl Progress {
    pub fn new(stage: &'static str, total: u64) -> Self {
        Self::with_interval(stage, total, PROGRESS_INTERVAL)
    }

    pub fn with_interval(stage: &'static str, total: u64, interval: Duration) -> Self {
        let now = Instant::now();
        Self { stage, total, done: AtomicU64::new(0), start: now, interval, last: Mutex::new(now) }
    }

    pub fn done(&self) -> u64 { self.done.load(Ordering::Relaxed) }
    pub fn elapsed(&self) -> Duration { self.start.elapsed() }

    /// Record `n` more units. Emits at most one line per interval across all threads.
    pub fn advance(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        let now = Instant::now();
        // try_lock: a thread that loses the race simply skips this report
        let Ok(mut last) = self.last.try_lock() else { return };
        if now.duration_since(*last) < self.interval && done < self.total {
            return;
        }
        *last = now;
        drop(last);
        self.emit(done);
    }

    /// Unconditional final line for the stage.
    pub fn finish(&self) {
        self.emit(self.done());
    }

    fn emit(&self, done: u64) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let pct = if self.total == 0 { 100.0 } else { 100.0 * done as f64 / self.total as f64 };
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        let eta = if rate > 0.0 { self.total.saturating_sub(done) as f64 / rate } else { 0.0 };
        info!(
            stage = self.stage,
            done,
            total = self.total,
            "[{:.3}][{}]: {:.2}% completed, ETA {:.1} seconds, {:.0}/s",
            elapsed,
            self.stage,
            pct.min(100.0),
            eta,
            rate
        );
    }
}
