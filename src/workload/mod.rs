use crate::config::ConfigError;
use rand::RngCore;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub mod keyspace;
pub mod ramp;

pub use keyspace::{
    RandomKeyGenerator, SlidingWindowFlipKeyGenerator, SlidingWindowKeyGenerator,
    ZipfianKeyGenerator,
};

/// The access-pattern strategy used to choose which key an operation
/// targets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    #[default]
    Random,
    SlidingWindow,
    SlidingWindowFlip,
    Zipfian,
}

impl std::fmt::Display for LoadPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Random => "random",
            Self::SlidingWindow => "sliding_window",
            Self::SlidingWindowFlip => "sliding_window_flip",
            Self::Zipfian => "zipfian",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LoadPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "sliding_window" => Ok(Self::SlidingWindow),
            "sliding_window_flip" => Ok(Self::SlidingWindowFlip),
            "zipfian" => Ok(Self::Zipfian),
            other => Err(ConfigError::parameter(format!(
                "unknown load pattern: {other}"
            ))),
        }
    }
}

/// Parameters for one workload start request.
#[derive(Clone, Copy, Debug)]
pub struct LoadParams {
    pub pattern: LoadPattern,
    pub window_size: usize,
    pub window_duration: Duration,
    pub bulk_size: usize,
    /// Bound on the sliding walk. Once this much time has elapsed since
    /// `init`, the window generators report themselves exhausted and the
    /// owning direction stops. `None` slides forever.
    pub duration: Option<Duration>,
}

impl LoadParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk_size == 0 {
            return Err(ConfigError::parameter("bulk_size must be > 0"));
        }
        match self.pattern {
            LoadPattern::SlidingWindow | LoadPattern::SlidingWindowFlip => {
                if self.window_size < 1 || self.window_duration < Duration::from_secs(1) {
                    return Err(ConfigError::parameter(format!(
                        "window_size and window_duration_secs can not be less than 1, \
                         provided: window_size: {}, window_duration_secs: {}",
                        self.window_size,
                        self.window_duration.as_secs()
                    )));
                }
                // distinct batches are drawn from within one window
                if self.bulk_size > self.window_size {
                    return Err(ConfigError::parameter(format!(
                        "bulk_size ({}) must not exceed window_size ({})",
                        self.bulk_size, self.window_size
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Produces key values according to an access-pattern strategy.
///
/// `next_key` is called concurrently from many workers; each worker passes
/// its own RNG, so implementations hold only state that is read-only after
/// `init`.
pub trait KeyGenerator: Send + Sync + std::fmt::Debug {
    /// Anchor any time-based state and preload keys if configured. Called
    /// once before the generator is shared with workers.
    fn init(&mut self);

    fn next_key(&self, rng: &mut dyn RngCore) -> String;

    /// False once the generator has run out of keys; the owning workload
    /// stops itself when this happens.
    fn has_next(&self) -> bool {
        true
    }

    fn preload_keys(&self) -> bool;

    fn num_keys(&self) -> usize;
}

/// Build and initialize the generator for the requested pattern.
pub fn key_generator(
    params: &LoadParams,
    num_keys: usize,
    preload_keys: bool,
    zipf_exponent: f64,
) -> Result<Arc<dyn KeyGenerator>, ConfigError> {
    params.validate()?;

    // a batch holds distinct keys, so a worker could never fill one that
    // outsizes the keyspace
    if params.bulk_size > num_keys {
        return Err(ConfigError::parameter(format!(
            "bulk_size ({}) must not exceed num_keys ({num_keys})",
            params.bulk_size
        )));
    }

    let mut generator: Box<dyn KeyGenerator> = match params.pattern {
        LoadPattern::Random => Box::new(RandomKeyGenerator::new(num_keys, preload_keys)),
        LoadPattern::SlidingWindow => Box::new(SlidingWindowKeyGenerator::new(
            num_keys,
            params.window_size,
            params.window_duration,
            params.duration,
            preload_keys,
        )?),
        LoadPattern::SlidingWindowFlip => Box::new(SlidingWindowFlipKeyGenerator::new(
            num_keys,
            params.window_size,
            params.window_duration,
            params.duration,
            preload_keys,
        )?),
        LoadPattern::Zipfian => Box::new(ZipfianKeyGenerator::new(
            num_keys,
            zipf_exponent,
            preload_keys,
        )?),
    };

    generator.init();
    Ok(Arc::from(generator))
}
