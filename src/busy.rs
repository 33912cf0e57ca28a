//! Busy threads
//!
//! A busy thread alternates between spinning and sleeping on a fixed period so
//! the CPU it runs on stays clocked up and never drops into a deep idle
//! state. The CPU cost is bounded by the duty cycle: each period the thread
//! spins for `period * cpu_usage` and sleeps for the rest.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::validate_busy_params;
use crate::error::Result;
use crate::pacer::Pacer;
use crate::padded::CacheAligned;

/// Parameters shared by every busy thread, read once per period
#[derive(Debug)]
struct BusyParams {
    period_nanos: AtomicU64,
    cpu_usage_bits: AtomicU64,
}

impl BusyParams {
    fn new(period: Duration, cpu_usage: f64) -> Self {
        Self {
            period_nanos: AtomicU64::new(period.as_nanos() as u64),
            cpu_usage_bits: AtomicU64::new(cpu_usage.to_bits()),
        }
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos.load(Ordering::Relaxed))
    }

    fn cpu_usage(&self) -> f64 {
        f64::from_bits(self.cpu_usage_bits.load(Ordering::Relaxed))
    }
}

/// Handle to one running busy thread
struct BusyThread {
    stop: Arc<CacheAligned<AtomicBool>>,
    /// Dropping the sender wakes the thread out of its sleep
    wake: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl BusyThread {
    fn spawn(index: usize, params: Arc<BusyParams>) -> Result<Self> {
        let stop = Arc::new(CacheAligned::new(AtomicBool::new(false)));
        let (wake, sleeper) = bounded::<()>(1);

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("perflab-busy-{}", index))
            .spawn(move || run_busy_loop(index, &params, &thread_stop, &sleeper))?;

        Ok(Self {
            stop,
            wake: Some(wake),
            handle: Some(handle),
        })
    }

    fn request_stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.wake.take();
    }

    fn join(mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Busy thread panicked");
            }
        }
    }
}

fn run_busy_loop(
    index: usize,
    params: &BusyParams,
    stop: &AtomicBool,
    sleeper: &Receiver<()>,
) {
    tracing::debug!("Busy thread {} started", index);

    let mut pacer = Pacer::new(params.period());
    let mut period_start = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let period = params.period();
        pacer.set_period(period);

        // Spin phase
        let spin_end = period_start + period.mul_f64(params.cpu_usage());
        while Instant::now() < spin_end {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            std::hint::spin_loop();
        }

        // Sleep phase, interruptible by dropping the wake sender
        match sleeper.recv_deadline(pacer.next_deadline()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        period_start = pacer.next_deadline();
        pacer.advance(Instant::now());
    }

    tracing::debug!("Busy thread {} stopped", index);
}

/// A resizable set of busy threads sharing one period and duty cycle
pub struct BusyThreads {
    params: Arc<BusyParams>,
    threads: Vec<BusyThread>,
}

impl std::fmt::Debug for BusyThreads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyThreads")
            .field("count", &self.threads.len())
            .field("period", &self.params.period())
            .field("cpu_usage", &self.params.cpu_usage())
            .finish()
    }
}

impl BusyThreads {
    /// Create an empty set; no threads run until [`BusyThreads::set_count`]
    pub fn new(period: Duration, cpu_usage: f64) -> Result<Self> {
        validate_busy_params(period, cpu_usage)?;
        Ok(Self {
            params: Arc::new(BusyParams::new(period, cpu_usage)),
            threads: Vec::new(),
        })
    }

    pub fn count(&self) -> usize {
        self.threads.len()
    }

    pub fn period(&self) -> Duration {
        self.params.period()
    }

    pub fn cpu_usage(&self) -> f64 {
        self.params.cpu_usage()
    }

    /// Grow or shrink the set to `count` threads
    ///
    /// Shrinking stops the most recently started threads and waits for them.
    pub fn set_count(&mut self, count: usize) -> Result<()> {
        if count == self.threads.len() {
            return Ok(());
        }
        tracing::info!("Busy threads: {} -> {}", self.threads.len(), count);

        while self.threads.len() > count {
            if let Some(thread) = self.threads.pop() {
                thread.join();
            }
        }
        while self.threads.len() < count {
            let thread = BusyThread::spawn(self.threads.len(), self.params.clone())?;
            self.threads.push(thread);
        }
        Ok(())
    }

    /// Takes effect on each thread at its next period
    pub fn set_period(&mut self, period: Duration) -> Result<()> {
        validate_busy_params(period, self.cpu_usage())?;
        self.params
            .period_nanos
            .store(period.as_nanos() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Takes effect on each thread at its next period
    pub fn set_cpu_usage(&mut self, cpu_usage: f64) -> Result<()> {
        validate_busy_params(self.period(), cpu_usage)?;
        self.params
            .cpu_usage_bits
            .store(cpu_usage.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Stop and join every thread
    pub fn stop(&mut self) {
        // Signal all first so the threads wind down in parallel
        for thread in &mut self.threads {
            thread.request_stop();
        }
        for thread in self.threads.drain(..) {
            thread.join();
        }
    }
}

impl Drop for BusyThreads {
    fn drop(&mut self) {
        self.stop();
    }
}
