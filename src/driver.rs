//! The run engine. Owns the worker pools, the rate limiters, and the
//! client lifecycle, and exposes a synchronous control surface so a
//! caller can start and stop load while a run is in flight.

use crate::client::{Client, DataGenerator};
use crate::config::{Config, ConfigError};
use crate::monitor::{Monitor, Reporter};
use crate::ratelimit::LimiterHandle;
use crate::workload::ramp::AutoTuner;
use crate::workload::{key_generator, KeyGenerator, LoadParams};
use ahash::{HashSet, HashSetExt};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro512PlusPlus;
use ringlog::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};

// workers back off this long when idle or throttled
const BACKOFF: Duration = Duration::from_micros(100);

// exhaustion watcher poll interval
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver is not initialized")]
    NotInitialized,
    #[error("driver is already initialized")]
    AlreadyInitialized,
    #[error("client initialization failed: {0}")]
    ClientInit(#[source] anyhow::Error),
    #[error("client operation failed: {0}")]
    Operation(#[source] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

impl Direction {
    fn name(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

// a running worker pool for one direction
struct Pool {
    runtime: Runtime,
    generator: Arc<dyn KeyGenerator>,
}

struct DriverInner {
    config: Config,
    monitor: Arc<Monitor>,
    client: RwLock<Option<Arc<dyn Client>>>,
    data: RwLock<Option<Arc<DataGenerator>>>,
    initialized: AtomicBool,
    reads_started: Arc<AtomicBool>,
    writes_started: Arc<AtomicBool>,
    read_limiter: Arc<LimiterHandle>,
    write_limiter: Arc<LimiterHandle>,
    tuner: Option<AutoTuner>,
    reads: Mutex<Option<Pool>>,
    writes: Mutex<Option<Pool>>,
    reporter_on: Arc<AtomicBool>,
    seed: Mutex<Xoshiro512PlusPlus>,
    control: Runtime,
}

/// Handle to the run engine. Cheap to clone; all clones drive the same
/// engine.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    pub fn new(config: Config) -> Result<Self, DriverError> {
        let control = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("control")
            .enable_all()
            .build()
            .map_err(|e| ConfigError::parameter(format!("failed to launch control runtime: {e}")))?;

        let tuner = match config.autotune() {
            Some(autotune) if autotune.enabled() => Some(autotune.tuner()?),
            _ => None,
        };

        let seed = match config.general().initial_seed() {
            Some(seed) => Xoshiro512PlusPlus::seed_from_u64(seed),
            None => Xoshiro512PlusPlus::from_entropy(),
        };

        Ok(Self {
            inner: Arc::new(DriverInner {
                config,
                monitor: Arc::new(Monitor::new()),
                client: RwLock::new(None),
                data: RwLock::new(None),
                initialized: AtomicBool::new(false),
                reads_started: Arc::new(AtomicBool::new(false)),
                writes_started: Arc::new(AtomicBool::new(false)),
                read_limiter: Arc::new(LimiterHandle::new()),
                write_limiter: Arc::new(LimiterHandle::new()),
                tuner,
                reads: Mutex::new(None),
                writes: Mutex::new(None),
                reporter_on: Arc::new(AtomicBool::new(false)),
                seed: Mutex::new(seed),
                control,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        self.inner.monitor.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn reads_running(&self) -> bool {
        self.inner.reads_started.load(Ordering::Relaxed)
    }

    pub fn writes_running(&self) -> bool {
        self.inner.writes_started.load(Ordering::Relaxed)
    }

    pub fn read_rate(&self) -> Option<f64> {
        self.inner.read_limiter.rate()
    }

    pub fn write_rate(&self) -> Option<f64> {
        self.inner.write_limiter.rate()
    }

    fn client(&self) -> Result<Arc<dyn Client>, DriverError> {
        self.inner
            .client
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(DriverError::NotInitialized)
    }

    /// The value pool handed to the client at init.
    pub fn data_generator(&self) -> Result<Arc<DataGenerator>, DriverError> {
        self.inner
            .data
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(DriverError::NotInitialized)
    }

    fn fork_rng(&self) -> Xoshiro512PlusPlus {
        let mut master = self.inner.seed.lock().unwrap();
        Xoshiro512PlusPlus::seed_from_u64(master.next_u64())
    }

    /// One-shot setup: connect the client, install both rate limiters,
    /// and launch the periodic reporter. A failed client init leaves the
    /// driver uninitialized so a corrected client can retry.
    pub fn init(&self, client: Arc<dyn Client>) -> Result<(), DriverError> {
        if self
            .inner
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DriverError::AlreadyInitialized);
        }

        let data_seed = self.fork_rng().next_u64();
        let data = Arc::new(DataGenerator::new(&self.inner.config, data_seed));

        info!("initializing client: {}", client.connection_info());
        if let Err(e) = self.inner.control.block_on(client.init(data.clone())) {
            self.inner.initialized.store(false, Ordering::Release);
            return Err(DriverError::ClientInit(e));
        }

        *self.inner.data.write().unwrap() = Some(data);
        *self.inner.client.write().unwrap() = Some(client);

        let workload = self.inner.config.workload();
        self.inner
            .read_limiter
            .set_rate(workload.read_rate_limit())?;
        self.inner
            .write_limiter
            .set_rate(workload.write_rate_limit())?;

        self.spawn_reporter();
        Ok(())
    }

    fn spawn_reporter(&self) {
        self.inner.reporter_on.store(true, Ordering::Release);

        let workload = self.inner.config.workload();
        let reporter = Reporter::new(
            self.inner.monitor.clone(),
            self.inner.read_limiter.clone(),
            self.inner.write_limiter.clone(),
            self.inner.reads_started.clone(),
            self.inner.writes_started.clone(),
            workload.read_enabled(),
            workload.write_enabled(),
            self.inner.config.general().stats_update_freq(),
        );
        let on = self.inner.reporter_on.clone();
        self.inner.control.spawn(async move {
            while on.load(Ordering::Acquire) {
                tokio::time::sleep(reporter.interval()).await;
                if on.load(Ordering::Acquire) {
                    reporter.update();
                }
            }
        });

        // periodic histogram drain so percentiles track recent behavior
        let monitor = self.inner.monitor.clone();
        let on = self.inner.reporter_on.clone();
        let reset_freq = self.inner.config.general().stats_reset_freq();
        self.inner.control.spawn(async move {
            while on.load(Ordering::Acquire) {
                tokio::time::sleep(reset_freq).await;
                if on.load(Ordering::Acquire) {
                    monitor.clear_latency_window();
                }
            }
        });
    }

    /// Start every direction the config enables.
    pub fn start(&self) -> Result<(), DriverError> {
        let workload = self.inner.config.workload();
        if workload.write_enabled() {
            self.start_writes()?;
        }
        if workload.read_enabled() {
            self.start_reads()?;
        }
        Ok(())
    }

    pub fn start_reads(&self) -> Result<(), DriverError> {
        self.start_direction(Direction::Read, self.inner.config.load_params())
    }

    pub fn start_writes(&self) -> Result<(), DriverError> {
        self.start_direction(Direction::Write, self.inner.config.load_params())
    }

    /// Start reads with parameters other than the configured ones, e.g.
    /// from a control surface.
    pub fn start_reads_with(&self, params: LoadParams) -> Result<(), DriverError> {
        self.start_direction(Direction::Read, params)
    }

    /// Start writes with parameters other than the configured ones.
    pub fn start_writes_with(&self, params: LoadParams) -> Result<(), DriverError> {
        self.start_direction(Direction::Write, params)
    }

    /// The key generator driving the read workload, while one is running.
    pub fn read_generator(&self) -> Option<Arc<dyn KeyGenerator>> {
        self.inner
            .reads
            .lock()
            .unwrap()
            .as_ref()
            .map(|pool| pool.generator.clone())
    }

    /// The key generator driving the write workload, while one is running.
    pub fn write_generator(&self) -> Option<Arc<dyn KeyGenerator>> {
        self.inner
            .writes
            .lock()
            .unwrap()
            .as_ref()
            .map(|pool| pool.generator.clone())
    }

    pub fn stop_reads(&self) {
        self.stop_direction(Direction::Read);
    }

    pub fn stop_writes(&self) {
        self.stop_direction(Direction::Write);
    }

    /// Stop both directions and zero the run statistics.
    pub fn stop(&self) {
        self.stop_reads();
        self.stop_writes();
        self.inner.monitor.reset_stats();
    }

    /// Disconnect the client. Load must already be stopped.
    pub fn shutdown_client(&self) -> Result<(), DriverError> {
        let client = self.client()?;
        self.inner.reporter_on.store(false, Ordering::Release);
        self.inner
            .control
            .block_on(client.shutdown())
            .map_err(DriverError::Operation)
    }

    /// One ad-hoc read outside the worker pools.
    pub fn read_single(&self, key: &str) -> Result<Option<String>, DriverError> {
        let client = self.client()?;
        self.inner
            .control
            .block_on(client.read_single(key))
            .map_err(DriverError::Operation)
    }

    /// One ad-hoc write outside the worker pools.
    pub fn write_single(&self, key: &str) -> Result<String, DriverError> {
        let client = self.client()?;
        self.inner
            .control
            .block_on(client.write_single(key))
            .map_err(DriverError::Operation)
    }

    /// Replace the read rate limit. A no-op when unchanged.
    pub fn set_read_rate(&self, rate: f64) -> Result<(), DriverError> {
        if self.inner.read_limiter.set_rate(rate)? {
            info!("read rate limit changed to {rate}");
        }
        Ok(())
    }

    /// Replace the write rate limit. A no-op when unchanged.
    pub fn set_write_rate(&self, rate: f64) -> Result<(), DriverError> {
        if self.inner.write_limiter.set_rate(rate)? {
            info!("write rate limit changed to {rate}");
        }
        Ok(())
    }

    fn start_direction(&self, direction: Direction, params: LoadParams) -> Result<(), DriverError> {
        if !self.is_initialized() {
            return Err(DriverError::NotInitialized);
        }

        let workload = self.inner.config.workload();
        let (slot, started, workers) = match direction {
            Direction::Read => (
                &self.inner.reads,
                &self.inner.reads_started,
                workload.num_readers(),
            ),
            Direction::Write => (
                &self.inner.writes,
                &self.inner.writes_started,
                workload.num_writers(),
            ),
        };

        let mut slot = slot.lock().unwrap();
        if slot.is_some() {
            debug!("{}s already running", direction.name());
            return Ok(());
        }

        let generator = key_generator(
            &params,
            workload.num_keys(),
            workload.preload_keys(),
            workload.zipf_exponent(),
        )?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(direction.name())
            .enable_all()
            .build()
            .map_err(|e| {
                ConfigError::parameter(format!("failed to launch worker runtime: {e}"))
            })?;

        let exhausted = Arc::new(AtomicBool::new(false));
        started.store(true, Ordering::Release);

        info!(
            "starting {} {} workers",
            workers,
            direction.name()
        );

        for _ in 0..workers {
            let worker = Worker {
                driver: self.clone(),
                direction,
                generator: generator.clone(),
                bulk_size: params.bulk_size,
                started: started.clone(),
                exhausted: exhausted.clone(),
            };
            let rng = self.fork_rng();
            runtime.spawn(worker.run(rng));
        }

        *slot = Some(Pool {
            runtime,
            generator,
        });
        drop(slot);

        self.spawn_exhaustion_watcher(direction, exhausted, started.clone());
        Ok(())
    }

    // keyspace exhaustion is detected inside async workers but teardown
    // drops a runtime, so it runs on a plain thread
    fn spawn_exhaustion_watcher(
        &self,
        direction: Direction,
        exhausted: Arc<AtomicBool>,
        started: Arc<AtomicBool>,
    ) {
        let driver = self.clone();
        std::thread::Builder::new()
            .name(format!("{}-watch", direction.name()))
            .spawn(move || {
                while started.load(Ordering::Acquire) {
                    if exhausted.load(Ordering::Acquire) {
                        info!(
                            "{} keyspace exhausted, stopping {}s",
                            direction.name(),
                            direction.name()
                        );
                        driver.stop_direction(direction);
                        return;
                    }
                    std::thread::sleep(WATCH_INTERVAL);
                }
            })
            .expect("failed to spawn watcher thread");
    }

    fn stop_direction(&self, direction: Direction) {
        let (slot, started) = match direction {
            Direction::Read => (&self.inner.reads, &self.inner.reads_started),
            Direction::Write => (&self.inner.writes, &self.inner.writes_started),
        };

        let pool = slot.lock().unwrap().take();
        if let Some(pool) = pool {
            started.store(false, Ordering::Release);
            info!("stopping {}s", direction.name());
            pool.runtime
                .shutdown_timeout(self.inner.config.general().shutdown_timeout());
        }
    }
}

struct Worker {
    driver: Driver,
    direction: Direction,
    generator: Arc<dyn KeyGenerator>,
    bulk_size: usize,
    started: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self, mut rng: Xoshiro512PlusPlus) {
        let client = match self.driver.client() {
            Ok(client) => client,
            Err(_) => return,
        };

        let limiter = match self.direction {
            Direction::Read => self.driver.inner.read_limiter.clone(),
            Direction::Write => self.driver.inner.write_limiter.clone(),
        };
        let bulk_size = self.bulk_size;

        while self.started.load(Ordering::Acquire) {
            let Some(bucket) = limiter.current() else {
                tokio::time::sleep(BACKOFF).await;
                continue;
            };
            if !bucket.try_acquire() {
                tokio::time::sleep(BACKOFF).await;
                continue;
            }

            let (keys, exhausted) = self.gather_keys(bulk_size, &mut rng);

            if !keys.is_empty() {
                match self.direction {
                    Direction::Read => self.read(&client, &keys).await,
                    Direction::Write => self.write(&client, &keys).await,
                }
            }

            if exhausted {
                self.exhausted.store(true, Ordering::Release);
                break;
            }
        }
    }

    // distinct keys per batch; generators may repeat, so collect through a
    // set until the batch is full. A partial batch is still issued when the
    // keyspace runs out mid-gather.
    fn gather_keys(
        &self,
        bulk_size: usize,
        rng: &mut Xoshiro512PlusPlus,
    ) -> (Vec<String>, bool) {
        let mut keys = HashSet::with_capacity(bulk_size);
        while keys.len() < bulk_size {
            if !self.generator.has_next() {
                return (keys.into_iter().collect(), true);
            }
            keys.insert(self.generator.next_key(rng));
        }
        (keys.into_iter().collect(), false)
    }

    async fn read(&self, client: &Arc<dyn Client>, keys: &[String]) {
        let monitor = &self.driver.inner.monitor;
        let begin = Instant::now();
        let result = if keys.len() == 1 {
            client.read_single(&keys[0]).await.map(|v| vec![v])
        } else {
            client.read_bulk(keys).await
        };
        match result {
            Ok(values) => {
                monitor.record_read_latency(begin.elapsed());
                monitor.inc_read_success();
                for value in &values {
                    if value.is_some() {
                        monitor.inc_cache_hit();
                    } else {
                        monitor.inc_cache_miss();
                    }
                }
            }
            Err(e) => {
                monitor.inc_read_failure();
                error!("failed to read key(s) {keys:?}: {e}");
            }
        }
    }

    async fn write(&self, client: &Arc<dyn Client>, keys: &[String]) {
        let monitor = &self.driver.inner.monitor;
        let begin = Instant::now();
        let result = if keys.len() == 1 {
            client.write_single(&keys[0]).await.map(|r| vec![r])
        } else {
            client.write_bulk(keys).await
        };
        match result {
            Ok(results) => {
                monitor.record_write_latency(begin.elapsed());
                monitor.inc_write_success();
                self.auto_tune(client, results.last().map(String::as_str).unwrap_or(""));
            }
            Err(e) => {
                monitor.inc_write_failure();
                error!("failed to write key(s) {keys:?}: {e}");
            }
        }
    }

    // the client hook wins over the configured stepwise tuner
    fn auto_tune(&self, client: &Arc<dyn Client>, last_result: &str) {
        let limiter = &self.driver.inner.write_limiter;
        let Some(current) = limiter.rate() else {
            return;
        };
        let monitor = &self.driver.inner.monitor;

        let recommended = client
            .auto_tune_write_rate_limit(current, last_result, monitor)
            .or_else(|| {
                self.driver
                    .inner
                    .tuner
                    .as_ref()
                    .map(|tuner| tuner.recommend(current, monitor))
            });

        if let Some(rate) = recommended {
            if rate != current {
                if let Err(e) = limiter.set_rate(rate) {
                    warn!("rejected auto-tuned write rate {rate}: {e}");
                } else {
                    info!("auto-tuned write rate limit from {current} to {rate}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;

    fn driver() -> Driver {
        let config: Config = toml::from_str("[general]\ninitial_seed = 42").unwrap();
        Driver::new(config).unwrap()
    }

    #[test]
    fn operations_require_init() {
        let driver = driver();
        assert!(matches!(
            driver.start_reads(),
            Err(DriverError::NotInitialized)
        ));
        assert!(matches!(
            driver.read_single("T0"),
            Err(DriverError::NotInitialized)
        ));
    }

    #[test]
    fn init_is_one_shot() {
        let driver = driver();
        driver.init(Arc::new(MemoryClient::new())).unwrap();
        assert!(matches!(
            driver.init(Arc::new(MemoryClient::new())),
            Err(DriverError::AlreadyInitialized)
        ));
    }

    #[test]
    fn failed_client_init_releases_the_guard() {
        struct FailingClient;

        #[async_trait::async_trait]
        impl Client for FailingClient {
            async fn init(&self, _data: Arc<DataGenerator>) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("connection refused"))
            }
            async fn read_single(&self, _key: &str) -> anyhow::Result<Option<String>> {
                Ok(None)
            }
            async fn write_single(&self, _key: &str) -> anyhow::Result<String> {
                Ok("ok".to_string())
            }
            async fn shutdown(&self) -> anyhow::Result<()> {
                Ok(())
            }
            fn connection_info(&self) -> String {
                "failing".to_string()
            }
        }

        let driver = driver();
        assert!(matches!(
            driver.init(Arc::new(FailingClient)),
            Err(DriverError::ClientInit(_))
        ));
        assert!(!driver.is_initialized());
        // a working client can still take over
        driver.init(Arc::new(MemoryClient::new())).unwrap();
        assert!(driver.is_initialized());
    }

    #[test]
    fn ad_hoc_operations_hit_the_store() {
        let driver = driver();
        driver.init(Arc::new(MemoryClient::new())).unwrap();
        assert_eq!(driver.read_single("T0").unwrap(), None);
        driver.write_single("T0").unwrap();
        assert!(driver.read_single("T0").unwrap().is_some());
    }

    #[test]
    fn rate_updates_swap_only_on_change() {
        let driver = driver();
        driver.init(Arc::new(MemoryClient::new())).unwrap();
        assert_eq!(driver.write_rate(), Some(1.0));
        driver.set_write_rate(50.0).unwrap();
        assert_eq!(driver.write_rate(), Some(50.0));
        driver.set_write_rate(50.0).unwrap();
        assert_eq!(driver.write_rate(), Some(50.0));
    }

    #[test]
    fn custom_parameters_apply_per_start() {
        use crate::workload::LoadPattern;

        let driver = driver();
        driver.init(Arc::new(MemoryClient::new())).unwrap();
        let params = LoadParams {
            pattern: LoadPattern::Random,
            window_size: 1,
            window_duration: Duration::from_secs(60),
            bulk_size: 5,
            duration: None,
        };
        driver.start_writes_with(params).unwrap();
        assert!(driver.writes_running());
        driver.stop();
        assert!(!driver.writes_running());

        // a batch of distinct keys larger than the keyspace is rejected
        // before any worker launches
        let params = LoadParams {
            bulk_size: 10_000,
            ..params
        };
        assert!(matches!(
            driver.start_writes_with(params),
            Err(DriverError::Config(_))
        ));
        assert!(!driver.writes_running());
    }

    #[test]
    fn a_bounded_sliding_walk_stops_its_direction() {
        use crate::workload::LoadPattern;

        let config: Config = toml::from_str(
            "[general]\ninitial_seed = 42\n\
             [workload]\nwrite_rate_limit = 1000.0\nnum_writers = 1\n",
        )
        .unwrap();
        let driver = Driver::new(config).unwrap();
        driver.init(Arc::new(MemoryClient::new())).unwrap();

        let params = LoadParams {
            pattern: LoadPattern::SlidingWindow,
            window_size: 10,
            window_duration: Duration::from_secs(60),
            bulk_size: 1,
            duration: Some(Duration::from_millis(50)),
        };
        driver.start_writes_with(params).unwrap();
        assert!(driver.writes_running());

        // the generator runs out after 50ms and the watcher stops the
        // direction on its own
        for _ in 0..50 {
            if !driver.writes_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert!(!driver.writes_running());
        assert!(driver.write_generator().is_none());
    }

    #[test]
    fn start_is_idempotent_and_stop_clears_state() {
        let driver = driver();
        driver.init(Arc::new(MemoryClient::new())).unwrap();
        driver.start_writes().unwrap();
        driver.start_writes().unwrap();
        assert!(driver.writes_running());
        assert!(driver.write_generator().is_some());
        assert!(driver.read_generator().is_none());
        driver.stop_writes();
        assert!(!driver.writes_running());
        assert!(driver.write_generator().is_none());
        // a stopped direction can be started again
        driver.start_writes().unwrap();
        assert!(driver.writes_running());
        driver.stop();
    }
}
