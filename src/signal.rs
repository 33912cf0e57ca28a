//! Signal handling module
//!
//! Spawns a dedicated thread that listens for SIGINT, SIGTERM and SIGHUP using
//! the signal-hook crate. On the first signal the shared shutdown flag is set
//! and registered callbacks run; a second signal exits the process.

use signal_hook::{consts::signal::*, iterator::Signals};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::Result;

/// Type for user-defined signal callbacks
pub type SignalCallback = Box<dyn Fn(i32) + Send + Sync>;

/// Shutdown flag raised by termination signals
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    callbacks: HashMap<i32, Vec<SignalCallback>>,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            callbacks: HashMap::new(),
        }
    }

    /// Register a callback for a specific signal
    pub fn register_callback<F>(&mut self, signal: i32, callback: F)
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.callbacks
            .entry(signal)
            .or_default()
            .push(Box::new(callback));
    }

    /// Shared flag, set once a termination signal arrives
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Start listening for termination signals in a dedicated thread
    pub fn install(self) -> Result<Arc<AtomicBool>> {
        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        let flag = self.flag.clone();
        let callbacks = self.callbacks;

        thread::Builder::new()
            .name("perflab-signal".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    if flag.swap(true, Ordering::SeqCst) {
                        tracing::warn!("Received second signal {}, forcing exit", signal);
                        std::process::exit(1);
                    }

                    tracing::info!("Received signal {}, shutting down", signal);
                    if let Some(handlers) = callbacks.get(&signal) {
                        for callback in handlers {
                            callback(signal);
                        }
                    }
                }
            })?;

        Ok(self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[test]
    fn test_flag_starts_clear() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());
        assert!(!signal.flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_sighup_sets_flag_and_runs_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut signal = ShutdownSignal::new();
        let counter = calls.clone();
        signal.register_callback(SIGHUP, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let flag = signal.install().unwrap();
        signal_hook::low_level::raise(SIGHUP).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
