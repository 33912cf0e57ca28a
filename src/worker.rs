//! Worker pool for sharing one render cycle across threads
//!
//! Each cycle the dispatching thread wakes every worker and then processes
//! items itself. Items are claimed from a shared atomic counter, so whichever
//! thread is awake first does the most work and a worker that wakes late
//! simply finds nothing left. `dispatch` returns once every item completed.
//! A panicking item counts as completed and is reported as failed.

use crossbeam::utils::Backoff;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::padded::CacheAligned;
use crate::stats::{self, DriveMeasurement, MeasurementQueue};
use crate::thread::{
    available_cpus, current_cpu, pin_to_cpu, promote_to_realtime, RealtimeConstraint,
};

/// Unit of work processed by the pool
pub trait Job: Send + Sync {
    /// Process `item`; `thread_index` is 0 for the dispatching thread
    fn run(&self, item: usize, thread_index: usize);
}

impl<F> Job for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn run(&self, item: usize, thread_index: usize) {
        self(item, thread_index)
    }
}

/// State of one dispatched cycle
struct Cycle {
    job: Arc<dyn Job>,
    num_items: usize,
    next_item: CacheAligned<AtomicUsize>,
    completed: CacheAligned<AtomicUsize>,
    failed: AtomicUsize,
}

impl Cycle {
    fn new(job: Arc<dyn Job>, num_items: usize) -> Self {
        Self {
            job,
            num_items,
            next_item: CacheAligned::new(AtomicUsize::new(0)),
            completed: CacheAligned::new(AtomicUsize::new(0)),
            failed: AtomicUsize::new(0),
        }
    }

    /// Claim and run items until none are left; returns how many this thread ran
    fn drive(&self, thread_index: usize, drives: &MeasurementQueue<DriveMeasurement>) -> usize {
        let start = Instant::now();
        let mut processed = 0;

        loop {
            let item = self.next_item.fetch_add(1, Ordering::Relaxed);
            if item >= self.num_items {
                break;
            }
            let ran = panic::catch_unwind(AssertUnwindSafe(|| self.job.run(item, thread_index)));
            if ran.is_err() {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Item {} panicked on thread {}", item, thread_index);
            }
            processed += 1;
            self.completed.fetch_add(1, Ordering::Release);
        }

        drives.push(DriveMeasurement {
            thread_index,
            cpu: current_cpu(),
            start: stats::since_epoch(start),
            duration: start.elapsed(),
            num_items: processed,
        });
        processed
    }

    fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.num_items
    }
}

enum WorkerCommand {
    Drive(Arc<Cycle>),
    Shutdown,
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drive(cycle) => f
                .debug_struct("Drive")
                .field("num_items", &cycle.num_items)
                .finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Handle to one worker thread
struct Worker {
    index: usize,
    sender: Sender<WorkerCommand>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        index: usize,
        constraint: Option<RealtimeConstraint>,
        pin_cpu: Option<usize>,
        drives: Arc<MeasurementQueue<DriveMeasurement>>,
    ) -> Result<Self> {
        // One slot: a worker never has more than one cycle outstanding
        let (sender, receiver) = bounded(1);

        let handle = thread::Builder::new()
            .name(format!("perflab-worker-{}", index))
            .spawn(move || run_worker(index, constraint, pin_cpu, receiver, &drives))?;

        Ok(Self {
            index,
            sender,
            handle: Some(handle),
        })
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn join(mut self) {
        // A full slot means the worker is still draining; the blocking send
        // lands once it picks that cycle up
        let _ = self.sender.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Worker {} panicked", self.index);
            }
        }
    }
}

fn run_worker(
    index: usize,
    constraint: Option<RealtimeConstraint>,
    pin_cpu: Option<usize>,
    receiver: Receiver<WorkerCommand>,
    drives: &MeasurementQueue<DriveMeasurement>,
) {
    if let Some(cpu) = pin_cpu {
        if let Err(e) = pin_to_cpu(cpu) {
            tracing::warn!("Worker {}: {}", index, e);
        }
    }
    if let Some(constraint) = constraint {
        if let Err(e) = promote_to_realtime(&constraint) {
            tracing::warn!("Worker {} stays at normal priority: {}", index, e);
        }
    }

    tracing::debug!("Worker {} started", index);

    while let Ok(command) = receiver.recv() {
        match command {
            WorkerCommand::Drive(cycle) => {
                let processed = cycle.drive(index, drives);
                tracing::trace!("Worker {} processed {} items", index, processed);
            }
            WorkerCommand::Shutdown => break,
        }
    }

    tracing::debug!("Worker {} stopped", index);
}

/// Outcome of one [`WorkerPool::dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub num_items: usize,
    /// Items processed by the dispatching thread itself
    pub caller_items: usize,
    pub workers_woken: usize,
    /// Items whose job panicked
    pub failed_items: usize,
    pub duration: Duration,
}

/// Resizable pool of worker threads
pub struct WorkerPool {
    workers: Vec<Worker>,
    constraint: Option<RealtimeConstraint>,
    pin_threads: bool,
    drives: Arc<MeasurementQueue<DriveMeasurement>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_workers", &self.workers.len())
            .field("constraint", &self.constraint)
            .field("pin_threads", &self.pin_threads)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool of `num_workers` threads
    ///
    /// With a `constraint`, every worker requests real-time scheduling when it
    /// starts. With `pin_threads`, worker `i` is bound to CPU `i % num_cpus`.
    pub fn new(
        num_workers: usize,
        constraint: Option<RealtimeConstraint>,
        pin_threads: bool,
        drives: Arc<MeasurementQueue<DriveMeasurement>>,
    ) -> Result<Self> {
        let mut pool = Self {
            workers: Vec::with_capacity(num_workers),
            constraint,
            pin_threads,
            drives,
        };
        pool.resize(num_workers)?;
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn drives(&self) -> &Arc<MeasurementQueue<DriveMeasurement>> {
        &self.drives
    }

    /// Change the number of workers; must not race a dispatch
    pub fn resize(&mut self, num_workers: usize) -> Result<()> {
        if num_workers == self.workers.len() {
            return Ok(());
        }
        tracing::info!("Worker threads: {} -> {}", self.workers.len(), num_workers);

        while self.workers.len() > num_workers {
            if let Some(worker) = self.workers.pop() {
                worker.join();
            }
        }
        while self.workers.len() < num_workers {
            // Index 0 belongs to the dispatching thread
            let index = self.workers.len() + 1;
            let pin_cpu = self.pin_threads.then(|| index % available_cpus());
            let worker = Worker::spawn(index, self.constraint, pin_cpu, self.drives.clone())?;
            self.workers.push(worker);
        }
        Ok(())
    }

    /// Run `job` over items `0..num_items` on the workers and the calling thread
    pub fn dispatch(&self, job: Arc<dyn Job>, num_items: usize) -> DispatchReport {
        let start = Instant::now();
        let cycle = Arc::new(Cycle::new(job, num_items));

        let mut woken = Vec::with_capacity(self.workers.len());
        if num_items > 0 {
            for worker in &self.workers {
                match worker.sender.try_send(WorkerCommand::Drive(cycle.clone())) {
                    Ok(()) => woken.push(worker),
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!("Worker {} still busy, skipped", worker.index);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        tracing::warn!("Worker {} is gone", worker.index);
                    }
                }
            }
        }

        let caller_items = cycle.drive(0, &self.drives);

        let backoff = Backoff::new();
        while !cycle.is_complete() {
            // Items claimed by a worker that exited will never complete
            if backoff.is_completed()
                && woken.iter().all(|w| w.is_finished())
                && !cycle.is_complete()
            {
                tracing::error!("Every woken worker exited with items outstanding");
                break;
            }
            backoff.snooze();
        }

        DispatchReport {
            num_items,
            caller_items,
            workers_woken: woken.len(),
            failed_items: cycle.failed.load(Ordering::Relaxed),
            duration: start.elapsed(),
        }
    }

    /// Stop and join every worker; safe to call more than once
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        tracing::info!("Shutting down {} workers", self.workers.len());
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
