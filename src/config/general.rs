use super::*;

fn client() -> String {
    "memory".to_string()
}

fn stats_update_freq_secs() -> u64 {
    5
}

fn stats_reset_freq_secs() -> u64 {
    200
}

fn shutdown_timeout_secs() -> u64 {
    5
}

#[derive(Clone, Deserialize)]
pub struct General {
    /// Name of the client adapter to drive, resolved through the registry.
    #[serde(default = "client")]
    client: String,
    /// Seed for the master PRNG. Worker streams derive from it, so a fixed
    /// seed makes key sequences reproducible across runs.
    #[serde(default)]
    initial_seed: Option<u64>,
    /// How often the reporter recomputes RPS from the cumulative counters.
    #[serde(default = "stats_update_freq_secs")]
    stats_update_freq_secs: u64,
    /// How often the latency histograms are drained so percentiles track a
    /// recent window. Cumulative counters are unaffected.
    #[serde(default = "stats_reset_freq_secs")]
    stats_reset_freq_secs: u64,
    /// Bound on waiting for worker pools to terminate before force-cancel.
    #[serde(default = "shutdown_timeout_secs")]
    shutdown_timeout_secs: u64,
    /// Optional test duration. Absent means run until interrupted.
    #[serde(default)]
    duration_secs: Option<u64>,
}

impl Default for General {
    fn default() -> Self {
        Self {
            client: client(),
            initial_seed: None,
            stats_update_freq_secs: stats_update_freq_secs(),
            stats_reset_freq_secs: stats_reset_freq_secs(),
            shutdown_timeout_secs: shutdown_timeout_secs(),
            duration_secs: None,
        }
    }
}

impl General {
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn initial_seed(&self) -> Option<u64> {
        self.initial_seed
    }

    pub fn stats_update_freq(&self) -> Duration {
        Duration::from_secs(self.stats_update_freq_secs)
    }

    pub fn stats_reset_freq(&self) -> Duration {
        Duration::from_secs(self.stats_reset_freq_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}
