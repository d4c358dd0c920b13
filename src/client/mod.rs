//! The pluggable surface: anything that can read and write keyed string
//! values can be driven. Implementations register a constructor under a
//! name and are selected by the `client` config field.

mod memory;

pub use memory::MemoryClient;

use crate::config::{Config, ConfigError};
use crate::monitor::Monitor;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro512PlusPlus;
use std::collections::HashMap;
use std::sync::Arc;

/// A store under test.
///
/// `init` is called exactly once before any operation and `shutdown` at
/// most once after the last one. Operation methods run concurrently from
/// many workers, so implementations hold their own synchronization.
#[async_trait]
pub trait Client: Send + Sync {
    /// Connect and prepare. The generator supplies the payloads this run
    /// will write.
    async fn init(&self, data: Arc<DataGenerator>) -> anyhow::Result<()>;

    /// Fetch one key. `Ok(None)` is a miss, not an error.
    async fn read_single(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store one key, returning a short result description.
    async fn write_single(&self, key: &str) -> anyhow::Result<String>;

    /// Fetch a batch of distinct keys. Override when the store has a
    /// native multi-get.
    async fn read_bulk(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        let _ = keys;
        Err(anyhow::anyhow!("bulk reads are not supported by this client"))
    }

    /// Store a batch of distinct keys.
    async fn write_bulk(&self, keys: &[String]) -> anyhow::Result<Vec<String>> {
        let _ = keys;
        Err(anyhow::anyhow!("bulk writes are not supported by this client"))
    }

    /// Release connections. Called once at teardown.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// One-line description of the target, for logs.
    fn connection_info(&self) -> String;

    /// Hook for clients that steer their own write rate from observed
    /// run statistics. Returning `Some(rate)` replaces the write rate
    /// limit. The default never adjusts.
    fn auto_tune_write_rate_limit(
        &self,
        current_rate: f64,
        last_result: &str,
        monitor: &Monitor,
    ) -> Option<f64> {
        let _ = (current_rate, last_result, monitor);
        None
    }
}

/// Pre-generates the value pool once so the hot path only picks an index.
pub struct DataGenerator {
    values: Vec<String>,
    use_static_data: bool,
}

impl DataGenerator {
    pub fn new(config: &Config, seed: u64) -> Self {
        let data = config.data();
        let mut rng = Xoshiro512PlusPlus::seed_from_u64(seed);

        let values = (0..data.num_values())
            .map(|_| {
                let size = if data.use_variable_data_size() {
                    rng.gen_range(data.data_size_lower_bound()..=data.data_size_upper_bound())
                } else {
                    data.data_size()
                };
                random_string(&mut rng, size)
            })
            .collect();

        Self {
            values,
            use_static_data: data.use_static_data(),
        }
    }

    /// A payload for one write, drawn from the pre-generated pool. With
    /// static data every write carries the same payload, isolating the
    /// backend from payload entropy.
    pub fn value<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        if self.use_static_data {
            self.values[0].clone()
        } else {
            self.values[rng.gen_range(0..self.values.len())].clone()
        }
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }
}

fn random_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

type Constructor = Box<dyn Fn(&Config) -> anyhow::Result<Arc<dyn Client>> + Send + Sync>;

/// Maps client names to constructors. The binary registers the built-in
/// clients; embedders add their own before constructing the driver.
#[derive(Default)]
pub struct ClientRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registry pre-populated with the built-in clients.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_| Ok(Arc::new(MemoryClient::new())));
        registry
    }

    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&Config) -> anyhow::Result<Arc<dyn Client>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct the client the config names.
    pub fn build(&self, config: &Config) -> anyhow::Result<Arc<dyn Client>> {
        let name = config.general().client();
        match self.constructors.get(name) {
            Some(constructor) => constructor(config),
            None => Err(ConfigError::parameter(format!(
                "unknown client: {name} (registered: {})",
                self.names().join(", ")
            ))
            .into()),
        }
    }
}
