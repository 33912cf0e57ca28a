//! audio-perf-lab: a headless laboratory for real-time audio thread behaviour
//!
//! This crate drives a simulated audio render loop and measures how the
//! operating system schedules it:
//! - A paced render thread renders one buffer per cycle
//! - A worker pool shares each cycle's synthetic workload
//! - Optional busy threads keep CPUs awake at a bounded duty cycle
//! - Per-cycle and per-thread measurements flow through lock-free queues
//! - An activity timeline turns measurements into a drawable series
//!
//! ## Tuning
//!
//! Defaults live in [`config`]. The busy-thread period and CPU usage are tuned
//! together to ramp CPUs up without exceeding the background CPU usage limit.
//! Every default can be overridden at runtime through [`EngineConfig`].
//!
//! ## Examples
//!
//! ```rust,no_run
//! use audio_perf_lab::{Engine, EngineConfig};
//! use std::time::Duration;
//!
//! let mut engine = Engine::start(EngineConfig::default()).unwrap();
//! engine.set_num_busy_threads(2).unwrap();
//!
//! std::thread::sleep(Duration::from_secs(1));
//!
//! for cycle in engine.drain_cycles() {
//!     println!("load {:.1}%", cycle.load() * 100.0);
//! }
//! engine.stop();
//! ```

#![deny(warnings)]

pub mod activity;
pub mod busy;
pub mod config;
pub mod engine;
pub mod pacer;
pub mod padded;
pub mod stats;
pub mod synth;
pub mod thread;
pub mod worker;

#[cfg(feature = "signal")]
pub mod signal;

// Re-export core types
pub use activity::{ActivityPoint, ActivityTimeline};
pub use busy::BusyThreads;
pub use config::EngineConfig;
pub use engine::{Engine, Renderer};
pub use pacer::Pacer;
pub use padded::CacheAligned;
pub use stats::{CycleMeasurement, DriveMeasurement, MeasurementQueue};
pub use synth::SineBank;
pub use thread::RealtimeConstraint;
pub use worker::{DispatchReport, Job, WorkerPool};

/// Error types for the engine
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum PerfLabError {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid value {value:?} for environment variable {var}")]
        InvalidEnv { var: String, value: String },

        #[error("Failed to spawn thread: {0}")]
        ThreadSpawn(#[from] std::io::Error),

        #[error("Real-time promotion failed: {0}")]
        Realtime(String),

        #[error("CPU affinity failed: {0}")]
        Affinity(String),

        #[error("Engine is not running")]
        NotRunning,
    }

    pub type Result<T> = std::result::Result<T, PerfLabError>;
}
