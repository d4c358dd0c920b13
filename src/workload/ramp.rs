use crate::config::ConfigError;
use crate::monitor::Monitor;
use ringlog::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cap on the number of ramp steps, so a misconfigured interval cannot
/// produce a degenerate schedule.
pub const MAX_STEPS: u128 = 10_000;

/// A monotonically non-decreasing rate schedule: starting at `init_rate`,
/// the rate increases by a constant amount every `step_interval` until it
/// caps at `final_rate` after `ramp_period`.
#[derive(Clone, Copy, Debug)]
pub struct StepwiseRamp {
    init_rate: f64,
    final_rate: f64,
    step_interval: Duration,
    increment_per_step: f64,
}

impl StepwiseRamp {
    pub fn new(
        ramp_period: Duration,
        step_interval: Duration,
        init_rate: f64,
        final_rate: f64,
    ) -> Result<Self, ConfigError> {
        // the limiter floor is 1/s, so any scheduled rate below that would
        // be rejected on every step
        if init_rate < 1.0 {
            return Err(ConfigError::parameter(format!(
                "init_rate must be >= 1, provided: {init_rate}"
            )));
        }
        if final_rate <= 0.0 {
            return Err(ConfigError::parameter("final_rate must be > 0"));
        }
        if final_rate <= init_rate {
            return Err(ConfigError::parameter("final_rate must be > init_rate"));
        }
        if ramp_period.is_zero() {
            return Err(ConfigError::parameter("ramp_period must be > 0"));
        }
        if step_interval.is_zero() {
            return Err(ConfigError::parameter("step_interval must be > 0"));
        }
        if ramp_period.as_millis() % step_interval.as_millis() != 0 {
            return Err(ConfigError::parameter(
                "ramp_period must be evenly divisible by step_interval",
            ));
        }
        let num_steps = ramp_period.as_millis() / step_interval.as_millis();
        if num_steps > MAX_STEPS {
            return Err(ConfigError::parameter(format!(
                "ramp_period / step_interval must not exceed {MAX_STEPS}"
            )));
        }

        Ok(Self {
            init_rate,
            final_rate,
            step_interval,
            increment_per_step: (final_rate - init_rate) / num_steps as f64,
        })
    }

    /// The scheduled rate for a given elapsed time since the ramp's
    /// reference instant. Never exceeds `final_rate`.
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let steps = (elapsed.as_millis() / self.step_interval.as_millis()) as f64;
        (self.init_rate + steps * self.increment_per_step).min(self.final_rate)
    }

    pub fn init_rate(&self) -> f64 {
        self.init_rate
    }

    pub fn final_rate(&self) -> f64 {
        self.final_rate
    }
}

/// Recommends write rates along a stepwise ramp, freezing permanently once
/// the observed write failure ratio crosses a threshold.
///
/// The halt is sticky: after the threshold has been crossed once, every
/// subsequent recommendation returns the caller-supplied current rate, even
/// if the failure ratio later drops back below the threshold.
pub struct AutoTuner {
    ramp: StepwiseRamp,
    failure_ratio_threshold: f64,
    anchor: Mutex<Option<Instant>>,
    halted: AtomicBool,
}

impl AutoTuner {
    pub fn new(ramp: StepwiseRamp, failure_ratio_threshold: f64) -> Result<Self, ConfigError> {
        if failure_ratio_threshold <= 0.0 || failure_ratio_threshold >= 1.0 {
            return Err(ConfigError::parameter(format!(
                "failure_ratio_threshold must be in (0, 1), provided: {failure_ratio_threshold}"
            )));
        }
        Ok(Self {
            ramp,
            failure_ratio_threshold,
            anchor: Mutex::new(None),
            halted: AtomicBool::new(false),
        })
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    /// Recommend a new write rate given the currently installed rate and
    /// the stats observed so far. The first call anchors the ramp.
    pub fn recommend(&self, current_rate: f64, monitor: &Monitor) -> f64 {
        let now = Instant::now();
        let anchor = {
            let mut anchor = self.anchor.lock().unwrap();
            *anchor.get_or_insert(now)
        };

        if self.halted() {
            return current_rate;
        }

        // only evaluated once writes have succeeded, to avoid dividing by
        // zero on a fresh run
        let successes = monitor.write_success();
        if successes > 0 {
            let ratio = monitor.write_failure() as f64 / successes as f64;
            if ratio >= self.failure_ratio_threshold {
                self.halted.store(true, Ordering::Relaxed);
                info!(
                    "write failure ratio {:.4} crossed threshold {:.4}, freezing rate at {}",
                    ratio, self.failure_ratio_threshold, current_rate
                );
                return current_rate;
            }
        }

        self.ramp.rate_at(now.duration_since(anchor))
    }
}
