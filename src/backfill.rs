//! Bulk keyspace preparation. Fills a slice of the keyspace through the
//! client before a read-heavy run so reads have data to hit.

use crate::client::Client;
use crate::config::{Config, ConfigError};
use crate::workload::keyspace;
use rand::Rng;
use ringlog::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("a backfill is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What each visited key gets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackfillMode {
    /// Write every key unconditionally.
    Write,
    /// Read first, write only the keys that are absent.
    WriteIfMissing,
    /// Write, then read back, counting keys whose write did not stick.
    Verify,
}

/// Split one key slot into per-thread contiguous ranges.
///
/// The keyspace is divided into `key_slots` equal slots of
/// `num_keys / key_slots` keys; the chosen slot is then divided into
/// `num_threads` disjoint ranges that cover it exactly. When the slot
/// does not divide evenly, the first ranges carry one extra key.
pub fn partition(
    num_keys: u64,
    key_slots: u64,
    num_threads: usize,
    slot: u64,
) -> Vec<Range<u64>> {
    let slot_size = num_keys / key_slots;
    let slot_start = slot * slot_size;

    let threads = num_threads as u64;
    let base = slot_size / threads;
    let remainder = slot_size % threads;

    let mut ranges = Vec::with_capacity(num_threads);
    let mut next = slot_start;
    for thread in 0..threads {
        let len = if thread < remainder { base + 1 } else { base };
        ranges.push(next..next + len);
        next += len;
    }
    ranges
}

/// Drives a backfill through the client on its own worker pool, with
/// progress counters a caller can poll while it runs.
pub struct Backfill {
    config: Config,
    pool: Mutex<Option<Runtime>>,
    stop: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    missing: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    remaining: Arc<AtomicU64>,
}

impl Backfill {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pool: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            written: Arc::new(AtomicU64::new(0)),
            missing: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            remaining: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().unwrap().is_some() && self.remaining.load(Ordering::Acquire) > 0
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn missing(&self) -> u64 {
        self.missing.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Launch a backfill and return immediately. One random slot of the
    /// keyspace is filled per call, split across the configured threads.
    pub fn start(
        &self,
        client: Arc<dyn Client>,
        mode: BackfillMode,
    ) -> Result<(), BackfillError> {
        let mut pool = self.pool.lock().unwrap();
        if pool.is_some() {
            if self.remaining.load(Ordering::Acquire) > 0 {
                return Err(BackfillError::AlreadyRunning);
            }
            // reap the finished pool before launching a new one
            if let Some(old) = pool.take() {
                old.shutdown_background();
            }
        }

        let workload = self.config.workload();
        let backfill = self.config.backfill();
        let num_keys = workload.num_keys() as u64;
        let key_slots = backfill.key_slots();
        let threads = backfill.threads();

        let slot = rand::thread_rng().gen_range(0..key_slots);
        let ranges = partition(num_keys, key_slots, threads, slot);

        self.stop.store(false, Ordering::Release);
        self.written.store(0, Ordering::Relaxed);
        self.missing.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.remaining.store(ranges.len() as u64, Ordering::Release);

        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("backfill")
            .enable_all()
            .build()
            .map_err(|e| {
                ConfigError::parameter(format!("failed to launch backfill runtime: {e}"))
            })?;

        info!(
            "backfill ({mode:?}) of slot {slot}/{key_slots} across {threads} threads, ranges: {ranges:?}"
        );

        for range in ranges {
            runtime.spawn(walk(
                client.clone(),
                range,
                mode,
                self.stop.clone(),
                self.written.clone(),
                self.missing.clone(),
                self.failed.clone(),
                self.remaining.clone(),
            ));
        }

        let stop = self.stop.clone();
        let written = self.written.clone();
        let missing = self.missing.clone();
        let remaining = self.remaining.clone();
        runtime.spawn(async move {
            while remaining.load(Ordering::Acquire) > 0 && !stop.load(Ordering::Acquire) {
                tokio::time::sleep(PROGRESS_INTERVAL).await;
                info!(
                    "backfill progress: {} written, {} missing",
                    written.load(Ordering::Relaxed),
                    missing.load(Ordering::Relaxed)
                );
            }
        });

        *pool = Some(runtime);
        Ok(())
    }

    /// Run a backfill to completion, blocking the caller.
    pub fn run(&self, client: Arc<dyn Client>, mode: BackfillMode) -> Result<(), BackfillError> {
        self.start(client, mode)?;
        while self.remaining.load(Ordering::Acquire) > 0 && !self.stop.load(Ordering::Acquire) {
            std::thread::sleep(WAIT_INTERVAL);
        }
        info!(
            "backfill complete: {} written, {} missing, {} failed",
            self.written(),
            self.missing(),
            self.failed()
        );
        Ok(())
    }

    /// Signal the walkers to stop after their current key and tear the
    /// pool down.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.shutdown();
    }

    /// Tear the worker pool down, bounded by the configured shutdown
    /// timeout.
    pub fn shutdown(&self) {
        let pool = self.pool.lock().unwrap().take();
        if let Some(pool) = pool {
            pool.shutdown_timeout(self.config.general().shutdown_timeout());
        }
    }
}

// per-key failures are logged and skipped, never retried, so a bad key
// cannot stall the walk
#[allow(clippy::too_many_arguments)]
async fn walk(
    client: Arc<dyn Client>,
    range: Range<u64>,
    mode: BackfillMode,
    stop: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    missing: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    remaining: Arc<AtomicU64>,
) {
    for index in range {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let key = keyspace::synthesize(index as usize);
        let result = match mode {
            BackfillMode::Write => client.write_single(&key).await.map(|_| true),
            BackfillMode::WriteIfMissing => match client.read_single(&key).await {
                Ok(Some(_)) => Ok(false),
                Ok(None) => {
                    missing.fetch_add(1, Ordering::Relaxed);
                    client.write_single(&key).await.map(|_| true)
                }
                Err(e) => Err(e),
            },
            BackfillMode::Verify => match client.write_single(&key).await {
                Ok(_) => match client.read_single(&key).await {
                    Ok(Some(_)) => Ok(true),
                    Ok(None) => {
                        missing.fetch_add(1, Ordering::Relaxed);
                        Ok(true)
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            },
        };
        match result {
            Ok(true) => {
                written.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                failed.fetch_add(1, Ordering::Relaxed);
                error!("backfill failed for key {key}: {e}");
            }
        }
    }
    remaining.fetch_sub(1, Ordering::AcqRel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DataGenerator, MemoryClient};

    #[test]
    fn partition_covers_the_slot_exactly() {
        let ranges = partition(1000, 10, 3, 4);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start, 400);
        assert_eq!(ranges.last().unwrap().end, 500);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let total: u64 = ranges.iter().map(|r| r.end - r.start).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn partition_spreads_the_remainder_over_the_first_ranges() {
        let ranges = partition(1000, 10, 3, 0);
        let lengths: Vec<u64> = ranges.iter().map(|r| r.end - r.start).collect();
        assert_eq!(lengths, vec![34, 33, 33]);
    }

    #[test]
    fn single_slot_single_thread_covers_everything() {
        let ranges = partition(1000, 1, 1, 0);
        assert_eq!(ranges, vec![0..1000]);
    }

    fn config(extra: &str) -> Config {
        let config: Config = toml::from_str(extra).unwrap();
        config.validate().unwrap();
        config
    }

    fn initialized_client(config: &Config) -> Arc<MemoryClient> {
        let client = Arc::new(MemoryClient::new());
        let data = Arc::new(DataGenerator::new(config, 1));
        let runtime = Builder::new_current_thread().build().unwrap();
        runtime.block_on(client.init(data)).unwrap();
        client
    }

    #[test]
    fn write_backfill_fills_the_slot() {
        let config = config("[workload]\nnum_keys = 50\n[backfill]\nthreads = 2\nkey_slots = 1");
        let client = initialized_client(&config);
        let backfill = Backfill::new(config);

        backfill.run(client.clone(), BackfillMode::Write).unwrap();
        assert_eq!(backfill.written(), 50);
        assert_eq!(backfill.failed(), 0);
        assert!(!backfill.is_running());

        backfill.run(client, BackfillMode::Verify).unwrap();
        assert_eq!(backfill.missing(), 0);
    }

    #[test]
    fn conditional_backfill_writes_only_missing_keys() {
        let config = config("[workload]\nnum_keys = 20\n[backfill]\nthreads = 1\nkey_slots = 1");
        let client = initialized_client(&config);
        let runtime = Builder::new_current_thread().build().unwrap();
        for i in 0..10 {
            runtime
                .block_on(client.write_single(&keyspace::synthesize(i)))
                .unwrap();
        }

        let backfill = Backfill::new(config);
        backfill
            .run(client, BackfillMode::WriteIfMissing)
            .unwrap();
        assert_eq!(backfill.missing(), 10);
        assert_eq!(backfill.written(), 10);
    }

    #[test]
    fn concurrent_backfills_are_rejected() {
        let config = config("[workload]\nnum_keys = 1000\n[backfill]\nthreads = 1\nkey_slots = 1");
        let client = initialized_client(&config);
        let backfill = Backfill::new(config);

        backfill
            .start(client.clone(), BackfillMode::Write)
            .unwrap();
        // the running flag may clear if the tiny fill finishes first
        if backfill.is_running() {
            assert!(matches!(
                backfill.start(client, BackfillMode::Write),
                Err(BackfillError::AlreadyRunning)
            ));
        }
        backfill.shutdown();
    }
}
