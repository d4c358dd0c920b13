use super::*;
use rand::Rng;
use ringlog::*;
use std::time::Instant;
use zipf::ZipfDistribution;

/// The canonical key for an index.
pub fn synthesize(index: usize) -> String {
    format!("T{index}")
}

fn preload(num_keys: usize) -> Vec<String> {
    let mut keys = Vec::with_capacity(num_keys);
    for i in 0..num_keys {
        if i % 100_000 == 0 {
            debug!("still preloading keys: {i}/{num_keys}");
        }
        keys.push(synthesize(i));
    }
    keys
}

/// Key index uniformly sampled from the full keyspace. Unbounded.
#[derive(Debug)]
pub struct RandomKeyGenerator {
    num_keys: usize,
    preload_keys: bool,
    keys: Vec<String>,
}

impl RandomKeyGenerator {
    pub fn new(num_keys: usize, preload_keys: bool) -> Self {
        Self {
            num_keys,
            preload_keys,
            keys: Vec::new(),
        }
    }

    fn key_for(&self, index: usize) -> String {
        if self.preload_keys {
            self.keys[index].clone()
        } else {
            synthesize(index)
        }
    }
}

impl KeyGenerator for RandomKeyGenerator {
    fn init(&mut self) {
        if self.preload_keys {
            self.keys = preload(self.num_keys);
        }
    }

    fn next_key(&self, rng: &mut dyn RngCore) -> String {
        self.key_for(rng.gen_range(0..self.num_keys))
    }

    fn preload_keys(&self) -> bool {
        self.preload_keys
    }

    fn num_keys(&self) -> usize {
        self.num_keys
    }
}

/// A window of hot keys that slides forward in discrete steps as wall-clock
/// time advances, modeling temporal locality. The window start is
/// `floor(elapsed / window_duration) mod (num_keys - window_size + 1)`, so
/// consecutive windows overlap by all but one step.
#[derive(Debug)]
pub struct SlidingWindowKeyGenerator {
    num_keys: usize,
    window_size: usize,
    window_duration: Duration,
    duration: Option<Duration>,
    preload_keys: bool,
    keys: Vec<String>,
    start: Option<Instant>,
}

impl SlidingWindowKeyGenerator {
    pub fn new(
        num_keys: usize,
        window_size: usize,
        window_duration: Duration,
        duration: Option<Duration>,
        preload_keys: bool,
    ) -> Result<Self, ConfigError> {
        if window_size > num_keys {
            return Err(ConfigError::parameter(format!(
                "window_size ({window_size}) must not exceed num_keys ({num_keys})"
            )));
        }
        Ok(Self {
            num_keys,
            window_size,
            window_duration,
            duration,
            preload_keys,
            keys: Vec::new(),
            start: None,
        })
    }

    fn window_index(&self, elapsed: Duration) -> usize {
        let steps = (elapsed.as_millis() / self.window_duration.as_millis()) as usize;
        steps % (self.num_keys - self.window_size + 1)
    }

    fn key_for(&self, index: usize) -> String {
        if self.preload_keys {
            self.keys[index].clone()
        } else {
            synthesize(index)
        }
    }
}

impl KeyGenerator for SlidingWindowKeyGenerator {
    fn init(&mut self) {
        if self.preload_keys {
            self.keys = preload(self.num_keys);
        }
        self.start = Some(Instant::now());
    }

    fn next_key(&self, rng: &mut dyn RngCore) -> String {
        let elapsed = self.start.map(|s| s.elapsed()).unwrap_or_default();
        let min = self.window_index(elapsed);
        self.key_for(rng.gen_range(min..min + self.window_size))
    }

    // the walk is bounded when a run duration was requested
    fn has_next(&self) -> bool {
        match (self.start, self.duration) {
            (Some(start), Some(duration)) => start.elapsed() < duration,
            _ => true,
        }
    }

    fn preload_keys(&self) -> bool {
        self.preload_keys
    }

    fn num_keys(&self) -> usize {
        self.num_keys
    }
}

/// Like the sliding window, but the window advances through non-overlapping,
/// wrapping partitions of the keyspace: window `w` covers
/// `[w * window_size, (w + 1) * window_size)` with
/// `w = floor(elapsed / window_duration) mod (num_keys / window_size)`.
#[derive(Debug)]
pub struct SlidingWindowFlipKeyGenerator {
    num_keys: usize,
    window_size: usize,
    window_duration: Duration,
    duration: Option<Duration>,
    preload_keys: bool,
    keys: Vec<String>,
    start: Option<Instant>,
}

impl SlidingWindowFlipKeyGenerator {
    pub fn new(
        num_keys: usize,
        window_size: usize,
        window_duration: Duration,
        duration: Option<Duration>,
        preload_keys: bool,
    ) -> Result<Self, ConfigError> {
        if window_size > num_keys {
            return Err(ConfigError::parameter(format!(
                "window_size ({window_size}) must not exceed num_keys ({num_keys})"
            )));
        }
        Ok(Self {
            num_keys,
            window_size,
            window_duration,
            duration,
            preload_keys,
            keys: Vec::new(),
            start: None,
        })
    }

    fn window_index(&self, elapsed: Duration) -> usize {
        let steps = (elapsed.as_millis() / self.window_duration.as_millis()) as usize;
        steps % (self.num_keys / self.window_size)
    }

    fn key_for(&self, index: usize) -> String {
        if self.preload_keys {
            self.keys[index].clone()
        } else {
            synthesize(index)
        }
    }
}

impl KeyGenerator for SlidingWindowFlipKeyGenerator {
    fn init(&mut self) {
        if self.preload_keys {
            self.keys = preload(self.num_keys);
        }
        self.start = Some(Instant::now());
    }

    fn next_key(&self, rng: &mut dyn RngCore) -> String {
        let elapsed = self.start.map(|s| s.elapsed()).unwrap_or_default();
        let min = self.window_index(elapsed) * self.window_size;
        self.key_for(rng.gen_range(min..min + self.window_size))
    }

    fn has_next(&self) -> bool {
        match (self.start, self.duration) {
            (Some(start), Some(duration)) => start.elapsed() < duration,
            _ => true,
        }
    }

    fn preload_keys(&self) -> bool {
        self.preload_keys
    }

    fn num_keys(&self) -> usize {
        self.num_keys
    }
}

/// Zipf-distributed key indices: a heavy head of hot keys and a long tail,
/// emulating skewed production access patterns.
#[derive(Debug)]
pub struct ZipfianKeyGenerator {
    num_keys: usize,
    preload_keys: bool,
    keys: Vec<String>,
    zipf: ZipfDistribution,
}

impl ZipfianKeyGenerator {
    pub fn new(num_keys: usize, exponent: f64, preload_keys: bool) -> Result<Self, ConfigError> {
        let zipf = ZipfDistribution::new(num_keys, exponent).map_err(|()| {
            ConfigError::parameter(format!(
                "invalid zipfian parameters: num_keys: {num_keys}, exponent: {exponent}"
            ))
        })?;
        Ok(Self {
            num_keys,
            preload_keys,
            keys: Vec::new(),
            zipf,
        })
    }

    fn key_for(&self, index: usize) -> String {
        if self.preload_keys {
            self.keys[index].clone()
        } else {
            synthesize(index)
        }
    }
}

impl KeyGenerator for ZipfianKeyGenerator {
    fn init(&mut self) {
        if self.preload_keys {
            self.keys = preload(self.num_keys);
        }
    }

    fn next_key(&self, rng: &mut dyn RngCore) -> String {
        use rand::distributions::Distribution;
        // samples are 1-based
        self.key_for(self.zipf.sample(rng) - 1)
    }

    fn preload_keys(&self) -> bool {
        self.preload_keys
    }

    fn num_keys(&self) -> usize {
        self.num_keys
    }
}
