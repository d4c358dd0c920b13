use crate::workload::LoadPattern;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

mod debug;
mod general;
mod workload;

pub use debug::Debug;
pub use general::General;
pub use workload::{Autotune, Backfill, Data, Workload};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid parameter: {0}")]
    Parameter(String),
}

impl ConfigError {
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::Parameter(msg.into())
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    workload: Workload,
    #[serde(default)]
    data: Data,
    #[serde(default)]
    autotune: Option<Autotune>,
    #[serde(default)]
    backfill: Backfill,
    #[serde(default)]
    debug: Debug,
}

impl Config {
    pub fn new(file: &str) -> Result<Self, ConfigError> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn autotune(&self) -> Option<&Autotune> {
        self.autotune.as_ref()
    }

    pub fn backfill(&self) -> &Backfill {
        &self.backfill
    }

    pub fn debug(&self) -> &Debug {
        &self.debug
    }

    /// Workload parameters for a config-driven start, bounded by the
    /// configured test duration when one is set.
    pub fn load_params(&self) -> crate::workload::LoadParams {
        let mut params = self.workload.load_params();
        params.duration = self.general.duration();
        params
    }

    /// Fail-fast validation of every tunable. Invalid values are rejected
    /// with the offending field named, never silently clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.workload;

        if w.num_keys() == 0 {
            return Err(ConfigError::parameter("num_keys must be > 0"));
        }
        if w.bulk_size() == 0 {
            return Err(ConfigError::parameter("bulk_size must be > 0"));
        }
        // batches hold distinct keys, so they cannot outsize the keyspace
        if w.bulk_size() > w.num_keys() {
            return Err(ConfigError::parameter(format!(
                "bulk_size ({}) must not exceed num_keys ({})",
                w.bulk_size(),
                w.num_keys()
            )));
        }
        if w.read_rate_limit() < 1.0 {
            return Err(ConfigError::parameter(format!(
                "read_rate_limit must be >= 1, provided: {}",
                w.read_rate_limit()
            )));
        }
        if w.write_rate_limit() < 1.0 {
            return Err(ConfigError::parameter(format!(
                "write_rate_limit must be >= 1, provided: {}",
                w.write_rate_limit()
            )));
        }

        w.load_params().validate()?;

        if w.pattern() == LoadPattern::Zipfian && w.zipf_exponent() <= 0.0 {
            return Err(ConfigError::parameter(format!(
                "zipf_exponent must be > 0, provided: {}",
                w.zipf_exponent()
            )));
        }

        if self.general.stats_update_freq() == Duration::ZERO {
            return Err(ConfigError::parameter("stats_update_freq_secs must be > 0"));
        }
        if self.general.stats_reset_freq() == Duration::ZERO {
            return Err(ConfigError::parameter("stats_reset_freq_secs must be > 0"));
        }

        if self.backfill.threads() == 0 {
            return Err(ConfigError::parameter("backfill threads must be > 0"));
        }
        if self.backfill.key_slots() == 0 || self.backfill.key_slots() as usize > w.num_keys() {
            return Err(ConfigError::parameter(format!(
                "backfill key_slots must be in [1, num_keys], provided: {}",
                self.backfill.key_slots()
            )));
        }

        if let Some(autotune) = &self.autotune {
            // constructing the tuner exercises the full ramp/threshold checks
            let _ = autotune.tuner()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_from(content: &str) -> Result<Config, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        Config::new(file.path().to_str().unwrap())
    }

    #[test]
    fn defaults_are_valid() {
        let config = config_from("").unwrap();
        assert_eq!(config.workload().num_keys(), 1000);
        assert_eq!(config.workload().bulk_size(), 1);
        assert!(config.workload().read_enabled());
        assert!(config.workload().write_enabled());
        assert!(config.autotune().is_none());
        assert_eq!(config.general().client(), "memory");
    }

    #[test]
    fn num_readers_defaults_to_four_per_core() {
        let config = config_from("").unwrap();
        let expected = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1)
            * 4;
        assert_eq!(config.workload().num_readers(), expected);
        assert_eq!(config.workload().num_writers(), expected);
    }

    #[test]
    fn duration_bounds_the_load_params() {
        let config = config_from("[general]\nduration_secs = 30\n").unwrap();
        assert_eq!(config.load_params().duration, Some(Duration::from_secs(30)));
        let config = config_from("").unwrap();
        assert_eq!(config.load_params().duration, None);
    }

    #[test]
    fn rejects_zero_rate_limit() {
        let result = config_from("[workload]\nread_rate_limit = 0\n");
        assert!(matches!(result, Err(ConfigError::Parameter(_))));
    }

    #[test]
    fn rejects_sliding_window_without_window_params() {
        let result = config_from(
            "[workload]\npattern = \"sliding_window\"\nwindow_size = 0\nwindow_duration_secs = 60\n",
        );
        let err = result.err().unwrap();
        assert!(err.to_string().contains("window_size"));
    }

    #[test]
    fn rejects_invalid_autotune_ramp() {
        // step interval does not evenly divide the ramp period
        let result = config_from(
            "[autotune]\nenabled = true\ninit_rate = 1.0\nfinal_rate = 100.0\nramp_period_ms = 1000\nstep_interval_ms = 300\nfailure_ratio_threshold = 0.1\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn parses_full_config() {
        let config = config_from(
            r#"
            [general]
            client = "memory"
            stats_update_freq_secs = 2
            initial_seed = 42

            [workload]
            num_keys = 50000
            pattern = "zipfian"
            zipf_exponent = 1.2
            read_rate_limit = 5000
            write_rate_limit = 1000

            [backfill]
            threads = 4
            key_slots = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.workload().pattern(), LoadPattern::Zipfian);
        assert_eq!(config.workload().num_keys(), 50000);
        assert_eq!(config.backfill().key_slots(), 10);
        assert_eq!(config.general().initial_seed(), Some(42));
    }
}
