use crate::ratelimit::LimiterHandle;
use histogram::AtomicHistogram;
use ringlog::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// geometrically-spaced buckets: values up to 2^64 with roughly 1%
// relative error, constant memory regardless of sample count
const GROUPING_POWER: u8 = 7;
const MAX_VALUE_POWER: u8 = 64;

fn histogram() -> AtomicHistogram {
    AtomicHistogram::new(GROUPING_POWER, MAX_VALUE_POWER)
        .expect("failed to initialize latency histogram")
}

struct LatencyStat {
    histogram: AtomicHistogram,
    sum: AtomicU64,
    count: AtomicU64,
}

impl LatencyStat {
    fn new() -> Self {
        Self {
            histogram: histogram(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn record(&self, nanos: u64) {
        let _ = self.histogram.increment(nanos);
        self.sum.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn average(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            self.sum.load(Ordering::Relaxed) / count
        }
    }

    // smallest bucket boundary whose cumulative count meets the quantile
    fn percentile(&self, percentile: f64) -> u64 {
        self.histogram
            .load()
            .percentile(percentile)
            .ok()
            .flatten()
            .map(|bucket| bucket.end())
            .unwrap_or(0)
    }

    fn clear_window(&self) {
        let _ = self.histogram.drain();
    }

    fn reset(&self) {
        let _ = self.histogram.drain();
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Concurrent run statistics: monotonic success/failure and cache counters
/// per operation class, latency histograms, and the last computed RPS.
///
/// All increments are lock-free; many workers write while the reporter and
/// control callers read.
pub struct Monitor {
    read_success: AtomicU64,
    read_failure: AtomicU64,
    write_success: AtomicU64,
    write_failure: AtomicU64,
    cache_hit: AtomicU64,
    cache_miss: AtomicU64,
    read_rps: AtomicU64,
    write_rps: AtomicU64,
    read_latency: LatencyStat,
    write_latency: LatencyStat,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            read_success: AtomicU64::new(0),
            read_failure: AtomicU64::new(0),
            write_success: AtomicU64::new(0),
            write_failure: AtomicU64::new(0),
            cache_hit: AtomicU64::new(0),
            cache_miss: AtomicU64::new(0),
            read_rps: AtomicU64::new(0),
            write_rps: AtomicU64::new(0),
            read_latency: LatencyStat::new(),
            write_latency: LatencyStat::new(),
        }
    }

    pub fn inc_read_success(&self) {
        self.read_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_read_failure(&self) {
        self.read_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_success(&self) {
        self.write_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_failure(&self) {
        self.write_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_miss(&self) {
        self.cache_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_success(&self) -> u64 {
        self.read_success.load(Ordering::Relaxed)
    }

    pub fn read_failure(&self) -> u64 {
        self.read_failure.load(Ordering::Relaxed)
    }

    pub fn write_success(&self) -> u64 {
        self.write_success.load(Ordering::Relaxed)
    }

    pub fn write_failure(&self) -> u64 {
        self.write_failure.load(Ordering::Relaxed)
    }

    pub fn cache_hit(&self) -> u64 {
        self.cache_hit.load(Ordering::Relaxed)
    }

    pub fn cache_miss(&self) -> u64 {
        self.cache_miss.load(Ordering::Relaxed)
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hit();
        let total = hits + self.cache_miss();
        if total == 0 {
            0.0
        } else {
            hits as f64 * 100.0 / total as f64
        }
    }

    pub fn record_read_latency(&self, latency: Duration) {
        self.read_latency.record(latency.as_nanos() as u64);
    }

    pub fn record_write_latency(&self, latency: Duration) {
        self.write_latency.record(latency.as_nanos() as u64);
    }

    pub fn read_latency_avg(&self) -> u64 {
        self.read_latency.average()
    }

    pub fn write_latency_avg(&self) -> u64 {
        self.write_latency.average()
    }

    /// Read latency percentile in nanoseconds, e.g. `99.9`.
    pub fn read_latency_percentile(&self, percentile: f64) -> u64 {
        self.read_latency.percentile(percentile)
    }

    pub fn write_latency_percentile(&self, percentile: f64) -> u64 {
        self.write_latency.percentile(percentile)
    }

    pub fn read_rps(&self) -> u64 {
        self.read_rps.load(Ordering::Relaxed)
    }

    pub fn write_rps(&self) -> u64 {
        self.write_rps.load(Ordering::Relaxed)
    }

    pub fn set_read_rps(&self, rps: u64) {
        self.read_rps.store(rps, Ordering::Relaxed);
    }

    pub fn set_write_rps(&self, rps: u64) {
        self.write_rps.store(rps, Ordering::Relaxed);
    }

    /// Drain the latency histograms so percentiles reflect a recent window.
    /// Cumulative counters are untouched.
    pub fn clear_latency_window(&self) {
        self.read_latency.clear_window();
        self.write_latency.clear_window();
    }

    /// Zero every counter, histogram, and RPS value.
    pub fn reset_stats(&self) {
        self.read_success.store(0, Ordering::Relaxed);
        self.read_failure.store(0, Ordering::Relaxed);
        self.write_success.store(0, Ordering::Relaxed);
        self.write_failure.store(0, Ordering::Relaxed);
        self.cache_hit.store(0, Ordering::Relaxed);
        self.cache_miss.store(0, Ordering::Relaxed);
        self.read_rps.store(0, Ordering::Relaxed);
        self.write_rps.store(0, Ordering::Relaxed);
        self.read_latency.reset();
        self.write_latency.reset();
    }
}

/// One reporter tick's output.
#[derive(Clone, Copy, Debug, Default)]
pub struct RpsSample {
    pub read_rps: u64,
    pub write_rps: u64,
    pub success_ratio: u64,
    pub read_below_target: bool,
    pub write_below_target: bool,
}

/// Computes RPS over a fixed interval from the monitor's cumulative
/// counters and warns when a running direction falls short of its
/// configured rate, a sign the generator itself may be the bottleneck.
pub struct Reporter {
    monitor: Arc<Monitor>,
    read_limiter: Arc<LimiterHandle>,
    write_limiter: Arc<LimiterHandle>,
    reads_started: Arc<AtomicBool>,
    writes_started: Arc<AtomicBool>,
    read_enabled: bool,
    write_enabled: bool,
    interval: Duration,
    reads_seen: AtomicU64,
    writes_seen: AtomicU64,
}

impl Reporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        monitor: Arc<Monitor>,
        read_limiter: Arc<LimiterHandle>,
        write_limiter: Arc<LimiterHandle>,
        reads_started: Arc<AtomicBool>,
        writes_started: Arc<AtomicBool>,
        read_enabled: bool,
        write_enabled: bool,
        interval: Duration,
    ) -> Self {
        Self {
            monitor,
            read_limiter,
            write_limiter,
            reads_started,
            writes_started,
            read_enabled,
            write_enabled,
            interval,
            reads_seen: AtomicU64::new(0),
            writes_seen: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Called once per interval.
    pub fn update(&self) -> RpsSample {
        let seconds = self.interval.as_secs().max(1);

        let total_reads = self.monitor.read_success() + self.monitor.read_failure();
        let total_writes = self.monitor.write_success() + self.monitor.write_failure();
        let total_ops = total_reads + total_writes;
        let total_success = self.monitor.read_success() + self.monitor.write_success();

        // Counters can move backwards across a stats reset, so the delta
        // saturates and the swap re-anchors on the post-reset totals.
        let read_rps = total_reads
            .saturating_sub(self.reads_seen.swap(total_reads, Ordering::Relaxed))
            / seconds;
        let write_rps = total_writes
            .saturating_sub(self.writes_seen.swap(total_writes, Ordering::Relaxed))
            / seconds;

        let success_ratio = if total_ops > 0 {
            total_success * 100 / total_ops
        } else {
            0
        };

        self.monitor.set_read_rps(read_rps);
        self.monitor.set_write_rps(write_rps);

        info!(
            "read avg: {:.3}ms, read rps: {read_rps}, write avg: {:.3}ms, write rps: {write_rps}, \
             total rps: {}, success ratio: {success_ratio}%",
            self.monitor.read_latency_avg() as f64 / 1_000_000.0,
            self.monitor.write_latency_avg() as f64 / 1_000_000.0,
            read_rps + write_rps,
        );

        let read_below_target = self.read_enabled
            && self.reads_started.load(Ordering::Relaxed)
            && self
                .read_limiter
                .rate()
                .map(|expected| read_rps < expected as u64)
                .unwrap_or(false);
        let write_below_target = self.write_enabled
            && self.writes_started.load(Ordering::Relaxed)
            && self
                .write_limiter
                .rate()
                .map(|expected| write_rps < expected as u64)
                .unwrap_or(false);

        if read_below_target {
            warn!(
                "observed read rps ({read_rps}) below the configured read rate ({:?}); if this \
                 occurs consistently the benchmark client could be the bottleneck",
                self.read_limiter.rate()
            );
        }
        if write_below_target {
            warn!(
                "observed write rps ({write_rps}) below the configured write rate ({:?}); if this \
                 occurs consistently the benchmark client could be the bottleneck",
                self.write_limiter.rate()
            );
        }

        RpsSample {
            read_rps,
            write_rps,
            success_ratio,
            read_below_target,
            write_below_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_exact() {
        let monitor = Monitor::new();
        for _ in 0..7 {
            monitor.inc_read_success();
        }
        for _ in 0..3 {
            monitor.inc_read_failure();
        }
        for _ in 0..5 {
            monitor.inc_write_success();
        }
        monitor.inc_write_failure();
        assert_eq!(monitor.read_success(), 7);
        assert_eq!(monitor.read_failure(), 3);
        assert_eq!(monitor.write_success(), 5);
        assert_eq!(monitor.write_failure(), 1);
    }

    #[test]
    fn cache_hit_ratio_is_a_percentage() {
        let monitor = Monitor::new();
        assert_eq!(monitor.cache_hit_ratio(), 0.0);
        for _ in 0..3 {
            monitor.inc_cache_hit();
        }
        monitor.inc_cache_miss();
        assert_eq!(monitor.cache_hit_ratio(), 75.0);
    }

    #[test]
    fn single_value_histogram_returns_it_for_every_percentile() {
        let monitor = Monitor::new();
        monitor.record_write_latency(Duration::from_nanos(100));
        for p in [50.0, 95.0, 99.0, 99.5, 99.9] {
            assert_eq!(monitor.write_latency_percentile(p), 100);
        }
        assert_eq!(monitor.write_latency_avg(), 100);
    }

    #[test]
    fn reset_zeroes_everything() {
        let monitor = Monitor::new();
        monitor.inc_read_success();
        monitor.inc_write_failure();
        monitor.inc_cache_hit();
        monitor.set_read_rps(100);
        monitor.record_read_latency(Duration::from_micros(5));

        monitor.reset_stats();

        assert_eq!(monitor.read_success(), 0);
        assert_eq!(monitor.write_failure(), 0);
        assert_eq!(monitor.cache_hit(), 0);
        assert_eq!(monitor.read_rps(), 0);
        assert_eq!(monitor.read_latency_avg(), 0);
        for p in [50.0, 99.0, 99.9] {
            assert_eq!(monitor.read_latency_percentile(p), 0);
        }
    }

    #[test]
    fn window_clear_keeps_counters() {
        let monitor = Monitor::new();
        monitor.inc_write_success();
        monitor.record_write_latency(Duration::from_nanos(100));
        monitor.clear_latency_window();
        assert_eq!(monitor.write_success(), 1);
        assert_eq!(monitor.write_latency_percentile(99.0), 0);
    }

    fn reporter(
        monitor: Arc<Monitor>,
        started: bool,
        read_rate: Option<f64>,
    ) -> (Reporter, Arc<AtomicBool>) {
        let read_limiter = Arc::new(LimiterHandle::new());
        if let Some(rate) = read_rate {
            read_limiter.set_rate(rate).unwrap();
        }
        let reads_started = Arc::new(AtomicBool::new(started));
        let reporter = Reporter::new(
            monitor,
            read_limiter,
            Arc::new(LimiterHandle::new()),
            reads_started.clone(),
            Arc::new(AtomicBool::new(false)),
            true,
            true,
            Duration::from_secs(5),
        );
        (reporter, reads_started)
    }

    #[test]
    fn rps_is_delta_over_interval() {
        let monitor = Arc::new(Monitor::new());
        let (reporter, _) = reporter(monitor.clone(), false, None);

        for _ in 0..100 {
            monitor.inc_read_success();
        }
        let sample = reporter.update();
        assert_eq!(sample.read_rps, 20);
        assert_eq!(monitor.read_rps(), 20);
        assert_eq!(sample.success_ratio, 100);

        // no new operations: the next tick reads zero
        let sample = reporter.update();
        assert_eq!(sample.read_rps, 0);
    }

    #[test]
    fn rps_survives_a_stats_reset_between_ticks() {
        let monitor = Arc::new(Monitor::new());
        let (reporter, _) = reporter(monitor.clone(), false, None);

        for _ in 0..100 {
            monitor.inc_read_success();
        }
        assert_eq!(reporter.update().read_rps, 20);

        // the cumulative totals fall below the last-seen anchors here
        monitor.reset_stats();
        assert_eq!(reporter.update().read_rps, 0);

        // the anchors re-seat on the post-reset totals
        for _ in 0..50 {
            monitor.inc_read_success();
        }
        assert_eq!(reporter.update().read_rps, 10);
    }

    #[test]
    fn warns_only_while_running_and_below_target() {
        let monitor = Arc::new(Monitor::new());
        let (reporter, reads_started) = reporter(monitor.clone(), true, Some(1000.0));

        // running, observed 20 rps < 1000 target
        for _ in 0..100 {
            monitor.inc_read_success();
        }
        assert!(reporter.update().read_below_target);

        // not running: no warning even though rps is low
        reads_started.store(false, Ordering::Relaxed);
        assert!(!reporter.update().read_below_target);

        // running and meeting the target: no warning
        reads_started.store(true, Ordering::Relaxed);
        for _ in 0..10_000 {
            monitor.inc_read_success();
        }
        assert!(!reporter.update().read_below_target);
    }
}
