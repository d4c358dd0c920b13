use super::*;
use crate::workload::ramp::{AutoTuner, StepwiseRamp};
use crate::workload::LoadParams;

fn num_keys() -> usize {
    1000
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        * 4
}

fn enabled() -> bool {
    true
}

fn rate_limit() -> f64 {
    1.0
}

fn zipf_exponent() -> f64 {
    1.0
}

fn window_size() -> usize {
    1
}

fn window_duration_secs() -> u64 {
    60
}

fn bulk_size() -> usize {
    1
}

#[derive(Clone, Deserialize)]
pub struct Workload {
    #[serde(default = "num_keys")]
    num_keys: usize,
    /// Worker pool sizes. Default: available parallelism * 4.
    #[serde(default)]
    num_readers: Option<usize>,
    #[serde(default)]
    num_writers: Option<usize>,
    #[serde(default = "enabled")]
    read_enabled: bool,
    #[serde(default = "enabled")]
    write_enabled: bool,
    #[serde(default = "rate_limit")]
    read_rate_limit: f64,
    #[serde(default = "rate_limit")]
    write_rate_limit: f64,
    /// Precompute the key strings instead of synthesizing them per call.
    #[serde(default)]
    preload_keys: bool,
    #[serde(default)]
    pattern: LoadPattern,
    #[serde(default = "zipf_exponent")]
    zipf_exponent: f64,
    #[serde(default = "window_size")]
    window_size: usize,
    #[serde(default = "window_duration_secs")]
    window_duration_secs: u64,
    #[serde(default = "bulk_size")]
    bulk_size: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            num_keys: num_keys(),
            num_readers: None,
            num_writers: None,
            read_enabled: true,
            write_enabled: true,
            read_rate_limit: rate_limit(),
            write_rate_limit: rate_limit(),
            preload_keys: false,
            pattern: LoadPattern::default(),
            zipf_exponent: zipf_exponent(),
            window_size: window_size(),
            window_duration_secs: window_duration_secs(),
            bulk_size: bulk_size(),
        }
    }
}

impl Workload {
    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn num_readers(&self) -> usize {
        self.num_readers.unwrap_or_else(default_workers)
    }

    pub fn num_writers(&self) -> usize {
        self.num_writers.unwrap_or_else(default_workers)
    }

    pub fn read_enabled(&self) -> bool {
        self.read_enabled
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    pub fn read_rate_limit(&self) -> f64 {
        self.read_rate_limit
    }

    pub fn write_rate_limit(&self) -> f64 {
        self.write_rate_limit
    }

    pub fn preload_keys(&self) -> bool {
        self.preload_keys
    }

    pub fn pattern(&self) -> LoadPattern {
        self.pattern
    }

    pub fn zipf_exponent(&self) -> f64 {
        self.zipf_exponent
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_duration_secs)
    }

    pub fn bulk_size(&self) -> usize {
        self.bulk_size
    }

    pub fn load_params(&self) -> LoadParams {
        LoadParams {
            pattern: self.pattern,
            window_size: self.window_size,
            window_duration: self.window_duration(),
            bulk_size: self.bulk_size,
            duration: None,
        }
    }
}

fn num_values() -> usize {
    100
}

fn data_size() -> usize {
    128
}

fn data_size_lower_bound() -> usize {
    1000
}

fn data_size_upper_bound() -> usize {
    5000
}

#[derive(Clone, Deserialize)]
pub struct Data {
    #[serde(default = "num_values")]
    num_values: usize,
    #[serde(default = "data_size")]
    data_size: usize,
    #[serde(default)]
    use_variable_data_size: bool,
    #[serde(default = "data_size_lower_bound")]
    data_size_lower_bound: usize,
    #[serde(default = "data_size_upper_bound")]
    data_size_upper_bound: usize,
    /// Serve the same payload for every value. Useful for isolating
    /// backend behavior from payload entropy.
    #[serde(default)]
    use_static_data: bool,
}

impl Default for Data {
    fn default() -> Self {
        Self {
            num_values: num_values(),
            data_size: data_size(),
            use_variable_data_size: false,
            data_size_lower_bound: data_size_lower_bound(),
            data_size_upper_bound: data_size_upper_bound(),
            use_static_data: false,
        }
    }
}

impl Data {
    pub fn num_values(&self) -> usize {
        self.num_values
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn use_variable_data_size(&self) -> bool {
        self.use_variable_data_size
    }

    pub fn data_size_lower_bound(&self) -> usize {
        self.data_size_lower_bound
    }

    pub fn data_size_upper_bound(&self) -> usize {
        self.data_size_upper_bound
    }

    pub fn use_static_data(&self) -> bool {
        self.use_static_data
    }
}

fn failure_ratio_threshold() -> f64 {
    0.1
}

#[derive(Clone, Deserialize)]
pub struct Autotune {
    #[serde(default)]
    enabled: bool,
    init_rate: f64,
    final_rate: f64,
    ramp_period_ms: u64,
    step_interval_ms: u64,
    #[serde(default = "failure_ratio_threshold")]
    failure_ratio_threshold: f64,
}

impl Autotune {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tuner(&self) -> Result<AutoTuner, ConfigError> {
        let ramp = StepwiseRamp::new(
            Duration::from_millis(self.ramp_period_ms),
            Duration::from_millis(self.step_interval_ms),
            self.init_rate,
            self.final_rate,
        )?;
        AutoTuner::new(ramp, self.failure_ratio_threshold)
    }
}

fn backfill_threads() -> usize {
    1
}

fn key_slots() -> u64 {
    1
}

#[derive(Clone, Deserialize)]
pub struct Backfill {
    #[serde(default = "backfill_threads")]
    threads: usize,
    /// The keyspace is divided into this many contiguous slots; each job
    /// covers one randomly chosen slot so that independent nodes spread
    /// their work across the keyspace with few collisions.
    #[serde(default = "key_slots")]
    key_slots: u64,
}

impl Default for Backfill {
    fn default() -> Self {
        Self {
            threads: backfill_threads(),
            key_slots: key_slots(),
        }
    }
}

impl Backfill {
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn key_slots(&self) -> u64 {
        self.key_slots
    }
}
