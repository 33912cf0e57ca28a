//! Configuration constants for the perf lab engine
//!
//! This module contains the tunable parameters that the render loop, the
//! worker pool and the busy threads start from, plus [`EngineConfig`], the
//! runtime-adjustable view of the same values.

use std::time::Duration;

use crate::error::{PerfLabError, Result};

/// Initial number of busy threads
///
/// Busy threads are off unless asked for: they cost CPU time by construction.
pub const DEFAULT_NUM_BUSY_THREADS: usize = 0;

/// Spin/wake interval of a busy thread
///
/// Together with [`DEFAULT_BUSY_THREAD_CPU_USAGE`] this is tuned to ramp up
/// CPUs without exceeding the background CPU usage limit.
pub const DEFAULT_BUSY_THREAD_PERIOD: Duration = Duration::from_millis(35);

/// Fraction of each busy-thread period spent spinning (0.0..=1.0)
pub const DEFAULT_BUSY_THREAD_CPU_USAGE: f64 = 0.5;

/// Initial worker pool size, not counting the render thread itself
pub const DEFAULT_NUM_WORKER_THREADS: usize = 1;

/// Assumed hardware cache line width in bytes
///
/// 128 covers both the adjacent-line prefetcher on x86_64 and the line size
/// of Apple silicon. Used for padding per-thread state, see
/// [`crate::padded::CacheAligned`].
pub const CACHE_LINE_SIZE: usize = 128;

/// Default preferred processing buffer size, in sample frames per render cycle
pub const DEFAULT_PREFERRED_BUFFER_SIZE: usize = 128;

/// Scheduling time slice requested for real-time threads
pub const REALTIME_THREAD_QUANTUM: Duration = Duration::from_micros(500);

/// Rate of the simulated render clock (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default number of sine partials in the synthetic workload
pub const DEFAULT_NUM_SINES: usize = 256;

/// Upper bound on worker threads accepted by [`EngineConfig::validate`]
pub const MAX_NUM_WORKER_THREADS: usize = 64;

/// Upper bound on busy threads accepted by [`EngineConfig::validate`]
pub const MAX_NUM_BUSY_THREADS: usize = 64;

/// Upper bound on sine partials accepted by [`EngineConfig::validate`]
pub const MAX_NUM_SINES: usize = 1 << 16;

/// Capacity of each lock-free measurement queue
///
/// At the default buffer size the render loop produces ~345 cycles per second,
/// so this holds several seconds of history between drains.
pub const MEASUREMENT_QUEUE_CAPACITY: usize = 4096;

const _: () =
    assert!(DEFAULT_BUSY_THREAD_CPU_USAGE >= 0.0 && DEFAULT_BUSY_THREAD_CPU_USAGE <= 1.0);
const _: () = assert!(!DEFAULT_BUSY_THREAD_PERIOD.is_zero());
const _: () = assert!(!REALTIME_THREAD_QUANTUM.is_zero());
const _: () = assert!(CACHE_LINE_SIZE.is_power_of_two());
const _: () = assert!(DEFAULT_PREFERRED_BUFFER_SIZE > 0);
const _: () = assert!(DEFAULT_NUM_WORKER_THREADS <= MAX_NUM_WORKER_THREADS);
const _: () = assert!(DEFAULT_NUM_BUSY_THREADS <= MAX_NUM_BUSY_THREADS);
const _: () = assert!(DEFAULT_NUM_SINES <= MAX_NUM_SINES);

/// Runtime configuration for [`crate::engine::Engine`]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub num_busy_threads: usize,
    pub busy_thread_period: Duration,
    pub busy_thread_cpu_usage: f64,
    pub num_worker_threads: usize,
    /// Frames rendered per cycle
    pub preferred_buffer_size: usize,
    pub sample_rate: u32,
    pub num_sines: usize,
    pub realtime_quantum: Duration,
    /// Pin worker threads to distinct CPUs
    pub pin_threads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_busy_threads: DEFAULT_NUM_BUSY_THREADS,
            busy_thread_period: DEFAULT_BUSY_THREAD_PERIOD,
            busy_thread_cpu_usage: DEFAULT_BUSY_THREAD_CPU_USAGE,
            num_worker_threads: DEFAULT_NUM_WORKER_THREADS,
            preferred_buffer_size: DEFAULT_PREFERRED_BUFFER_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_sines: DEFAULT_NUM_SINES,
            realtime_quantum: REALTIME_THREAD_QUANTUM,
            pin_threads: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PERFLAB_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "PERFLAB_NUM_BUSY_THREADS")? {
            config.num_busy_threads = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PERFLAB_BUSY_THREAD_PERIOD_MS")? {
            config.busy_thread_period = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "PERFLAB_BUSY_THREAD_CPU_USAGE")? {
            config.busy_thread_cpu_usage = v;
        }
        if let Some(v) = parse_var(&lookup, "PERFLAB_NUM_WORKER_THREADS")? {
            config.num_worker_threads = v;
        }
        if let Some(v) = parse_var(&lookup, "PERFLAB_BUFFER_SIZE")? {
            config.preferred_buffer_size = v;
        }
        if let Some(v) = parse_var(&lookup, "PERFLAB_SAMPLE_RATE")? {
            config.sample_rate = v;
        }
        if let Some(v) = parse_var(&lookup, "PERFLAB_NUM_SINES")? {
            config.num_sines = v;
        }
        if let Some(v) = parse_var(&lookup, "PERFLAB_PIN_THREADS")? {
            config.pin_threads = v;
        }

        config.validate()?;
        tracing::debug!(?config, "Loaded engine configuration");
        Ok(config)
    }

    /// Check every value against the bounds the engine relies on
    pub fn validate(&self) -> Result<()> {
        validate_busy_params(self.busy_thread_period, self.busy_thread_cpu_usage)?;

        if self.num_busy_threads > MAX_NUM_BUSY_THREADS {
            return Err(PerfLabError::InvalidConfig(format!(
                "num_busy_threads {} exceeds {}",
                self.num_busy_threads, MAX_NUM_BUSY_THREADS
            )));
        }
        if self.num_worker_threads > MAX_NUM_WORKER_THREADS {
            return Err(PerfLabError::InvalidConfig(format!(
                "num_worker_threads {} exceeds {}",
                self.num_worker_threads, MAX_NUM_WORKER_THREADS
            )));
        }
        validate_num_sines(self.num_sines)?;
        if self.preferred_buffer_size == 0 {
            return Err(PerfLabError::InvalidConfig(
                "preferred_buffer_size must be positive".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(PerfLabError::InvalidConfig(
                "sample_rate must be positive".to_string(),
            ));
        }
        if self.realtime_quantum.is_zero() {
            return Err(PerfLabError::InvalidConfig(
                "realtime_quantum must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Wall-clock length of one render cycle
    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.preferred_buffer_size as f64 / self.sample_rate as f64)
    }
}

pub(crate) fn validate_num_sines(num_sines: usize) -> Result<()> {
    if num_sines > MAX_NUM_SINES {
        return Err(PerfLabError::InvalidConfig(format!(
            "num_sines {} exceeds {}",
            num_sines, MAX_NUM_SINES
        )));
    }
    Ok(())
}

/// Shared bounds check for busy-thread parameters
pub(crate) fn validate_busy_params(period: Duration, cpu_usage: f64) -> Result<()> {
    if period.is_zero() {
        return Err(PerfLabError::InvalidConfig(
            "busy thread period must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&cpu_usage) {
        return Err(PerfLabError::InvalidConfig(format!(
            "busy thread cpu usage {} is outside [0, 1]",
            cpu_usage
        )));
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PerfLabError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_constant_values() {
        assert_eq!(DEFAULT_NUM_BUSY_THREADS, 0);
        assert_eq!(DEFAULT_BUSY_THREAD_PERIOD, Duration::from_millis(35));
        assert_eq!(DEFAULT_BUSY_THREAD_CPU_USAGE, 0.5);
        assert_eq!(DEFAULT_NUM_WORKER_THREADS, 1);
        assert_eq!(CACHE_LINE_SIZE, 128);
        assert_eq!(DEFAULT_PREFERRED_BUFFER_SIZE, 128);
        assert_eq!(REALTIME_THREAD_QUANTUM, Duration::from_micros(500));
    }

    #[test]
    fn test_constant_invariants() {
        assert!((0.0..=1.0).contains(&DEFAULT_BUSY_THREAD_CPU_USAGE));
        assert!(DEFAULT_BUSY_THREAD_PERIOD > Duration::ZERO);
        assert!(REALTIME_THREAD_QUANTUM > Duration::ZERO);
        assert!(REALTIME_THREAD_QUANTUM < EngineConfig::default().buffer_duration());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.num_worker_threads, DEFAULT_NUM_WORKER_THREADS);
        assert_eq!(config.busy_thread_period, DEFAULT_BUSY_THREAD_PERIOD);
    }

    #[test]
    fn test_buffer_duration() {
        let config = EngineConfig {
            preferred_buffer_size: 441,
            sample_rate: 44_100,
            ..EngineConfig::default()
        };
        assert_eq!(config.buffer_duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("PERFLAB_NUM_BUSY_THREADS", "2"),
            ("PERFLAB_BUSY_THREAD_PERIOD_MS", "20"),
            ("PERFLAB_BUSY_THREAD_CPU_USAGE", "0.25"),
            ("PERFLAB_NUM_WORKER_THREADS", " 3 "),
            ("PERFLAB_PIN_THREADS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.num_busy_threads, 2);
        assert_eq!(config.busy_thread_period, Duration::from_millis(20));
        assert_eq!(config.busy_thread_cpu_usage, 0.25);
        assert_eq!(config.num_worker_threads, 3);
        assert!(config.pin_threads);
        assert_eq!(config.preferred_buffer_size, DEFAULT_PREFERRED_BUFFER_SIZE);
    }

    #[test]
    fn test_env_parse_error() {
        let err = EngineConfig::from_lookup(lookup_from(&[("PERFLAB_NUM_SINES", "lots")]))
            .unwrap_err();
        match err {
            PerfLabError::InvalidEnv { var, value } => {
                assert_eq!(var, "PERFLAB_NUM_SINES");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_env_values_are_validated() {
        let err = EngineConfig::from_lookup(lookup_from(&[(
            "PERFLAB_NUM_SINES",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(matches!(err, PerfLabError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad_usage = EngineConfig {
            busy_thread_cpu_usage: 1.5,
            ..EngineConfig::default()
        };
        assert!(bad_usage.validate().is_err());

        let nan_usage = EngineConfig {
            busy_thread_cpu_usage: f64::NAN,
            ..EngineConfig::default()
        };
        assert!(nan_usage.validate().is_err());

        let zero_period = EngineConfig {
            busy_thread_period: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(zero_period.validate().is_err());

        let zero_buffer = EngineConfig {
            preferred_buffer_size: 0,
            ..EngineConfig::default()
        };
        assert!(zero_buffer.validate().is_err());

        let too_many_workers = EngineConfig {
            num_worker_threads: MAX_NUM_WORKER_THREADS + 1,
            ..EngineConfig::default()
        };
        assert!(too_many_workers.validate().is_err());

        let too_many_sines = EngineConfig {
            num_sines: MAX_NUM_SINES + 1,
            ..EngineConfig::default()
        };
        assert!(too_many_sines.validate().is_err());
    }
}
