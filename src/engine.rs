//! Paced render loop
//!
//! The engine owns one render thread that behaves like an audio callback:
//! once per buffer duration it renders `preferred_buffer_size` frames of the
//! synthetic workload through the worker pool and records how long that
//! took. Busy threads and the worker pool are owned by the render thread and
//! reconfigured between cycles, so a cycle never races a control change.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::busy::BusyThreads;
use crate::config::{
    validate_busy_params, validate_num_sines, EngineConfig, MAX_NUM_BUSY_THREADS,
    MAX_NUM_WORKER_THREADS, MEASUREMENT_QUEUE_CAPACITY,
};
use crate::error::{PerfLabError, Result};
use crate::pacer::Pacer;
use crate::padded::CacheAligned;
use crate::stats::{self, CycleMeasurement, DriveMeasurement, MeasurementQueue};
use crate::synth::{self, SineBank};
use crate::thread::{promote_to_realtime, RealtimeConstraint};
use crate::worker::{DispatchReport, Job, WorkerPool};

/// Per-cycle job: every item renders one partial group into its own buffer
struct RenderJob {
    bank: SineBank,
    start_frame: AtomicU64,
    outputs: Vec<CacheAligned<Mutex<Vec<f32>>>>,
}

impl RenderJob {
    fn new(bank: SineBank, buffer_size: usize) -> Self {
        let outputs = (0..bank.num_items())
            .map(|_| CacheAligned::new(Mutex::new(vec![0.0; buffer_size])))
            .collect();
        Self {
            bank,
            start_frame: AtomicU64::new(0),
            outputs,
        }
    }
}

impl Job for RenderJob {
    fn run(&self, item: usize, _thread_index: usize) {
        let Some(slot) = self.outputs.get(item) else {
            return;
        };
        let mut out = slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.bank
            .render_item(item, self.start_frame.load(Ordering::Relaxed), &mut out);
    }
}

/// Result of one rendered cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
    pub dispatch: DispatchReport,
    pub peak: f32,
}

/// The body of a render cycle without pacing
///
/// Owns the worker pool and the mix buffer. [`Engine`] drives one of these
/// from its render thread; tests and benchmarks can drive it directly.
pub struct Renderer {
    pool: WorkerPool,
    job: Arc<RenderJob>,
    mix: Vec<f32>,
    frame: u64,
    sample_rate: u32,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("num_workers", &self.pool.num_workers())
            .field("num_sines", &self.job.bank.num_sines())
            .field("buffer_size", &self.mix.len())
            .field("frame", &self.frame)
            .finish()
    }
}

impl Renderer {
    /// Build a renderer and its worker pool from `config`
    ///
    /// Workers request real-time scheduling only when `realtime` is set.
    pub fn new(
        config: &EngineConfig,
        realtime: bool,
        drives: Arc<MeasurementQueue<DriveMeasurement>>,
    ) -> Result<Self> {
        config.validate()?;

        let constraint = realtime
            .then(|| RealtimeConstraint::new(config.buffer_duration(), config.realtime_quantum));
        let pool = WorkerPool::new(
            config.num_worker_threads,
            constraint,
            config.pin_threads,
            drives,
        )?;
        let bank = SineBank::new(config.num_sines, config.sample_rate);

        Ok(Self {
            pool,
            job: Arc::new(RenderJob::new(bank, config.preferred_buffer_size)),
            mix: vec![0.0; config.preferred_buffer_size],
            frame: 0,
            sample_rate: config.sample_rate,
        })
    }

    /// Render the next buffer
    pub fn render_cycle(&mut self) -> CycleOutcome {
        self.job.start_frame.store(self.frame, Ordering::Relaxed);

        let num_items = self.job.bank.num_items();
        let job: Arc<dyn Job> = self.job.clone();
        let dispatch = self.pool.dispatch(job, num_items);

        let guards: Vec<_> = self
            .job
            .outputs
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        SineBank::mix_into(guards.iter().map(|g| g.as_slice()), &mut self.mix);
        drop(guards);

        self.frame += self.mix.len() as u64;

        CycleOutcome {
            dispatch,
            peak: synth::peak(&self.mix),
        }
    }

    /// The most recently rendered buffer
    pub fn output(&self) -> &[f32] {
        &self.mix
    }

    /// Frames rendered so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn num_workers(&self) -> usize {
        self.pool.num_workers()
    }

    pub fn num_sines(&self) -> usize {
        self.job.bank.num_sines()
    }

    pub fn set_num_workers(&mut self, num_workers: usize) -> Result<()> {
        self.pool.resize(num_workers)
    }

    /// Replace the workload; output stays phase-continuous
    pub fn set_num_sines(&mut self, num_sines: usize) -> Result<()> {
        validate_num_sines(num_sines)?;
        let bank = SineBank::new(num_sines, self.sample_rate);
        self.job = Arc::new(RenderJob::new(bank, self.mix.len()));
        Ok(())
    }
}

type Reply = Sender<Result<()>>;

/// Control messages applied by the render thread between cycles
enum Command {
    SetNumBusyThreads(usize, Reply),
    SetBusyThreadPeriod(Duration, Reply),
    SetBusyThreadCpuUsage(f64, Reply),
    SetNumWorkerThreads(usize, Reply),
    SetNumSines(usize, Reply),
    Stop,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetNumBusyThreads(n, _) => f.debug_tuple("SetNumBusyThreads").field(n).finish(),
            Self::SetBusyThreadPeriod(d, _) => {
                f.debug_tuple("SetBusyThreadPeriod").field(d).finish()
            }
            Self::SetBusyThreadCpuUsage(u, _) => {
                f.debug_tuple("SetBusyThreadCpuUsage").field(u).finish()
            }
            Self::SetNumWorkerThreads(n, _) => {
                f.debug_tuple("SetNumWorkerThreads").field(n).finish()
            }
            Self::SetNumSines(n, _) => f.debug_tuple("SetNumSines").field(n).finish(),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// State shared between the engine handle and its render thread
#[derive(Debug)]
struct EngineShared {
    cycles: MeasurementQueue<CycleMeasurement>,
    drives: Arc<MeasurementQueue<DriveMeasurement>>,
    cycles_rendered: AtomicU64,
    peak_bits: AtomicU32,
    running: AtomicBool,
}

/// Clears the running flag when the render thread exits, including by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a running render loop
pub struct Engine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    commands: Sender<Command>,
    render_thread: Option<thread::JoinHandle<Result<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("cycles_rendered", &self.cycles_rendered())
            .finish()
    }
}

impl Engine {
    /// Validate `config` and start the busy threads, workers and render thread
    pub fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            "Starting engine: {} frames @ {} Hz ({:?}/cycle), {} workers, {} busy threads",
            config.preferred_buffer_size,
            config.sample_rate,
            config.buffer_duration(),
            config.num_worker_threads,
            config.num_busy_threads
        );

        let drives = Arc::new(MeasurementQueue::new(MEASUREMENT_QUEUE_CAPACITY));
        let shared = Arc::new(EngineShared {
            cycles: MeasurementQueue::new(MEASUREMENT_QUEUE_CAPACITY),
            drives: drives.clone(),
            cycles_rendered: AtomicU64::new(0),
            peak_bits: AtomicU32::new(0),
            running: AtomicBool::new(true),
        });

        let mut busy = BusyThreads::new(config.busy_thread_period, config.busy_thread_cpu_usage)?;
        busy.set_count(config.num_busy_threads)?;
        let renderer = Renderer::new(&config, true, drives)?;
        let constraint = RealtimeConstraint::new(config.buffer_duration(), config.realtime_quantum);

        let (commands, command_rx) = unbounded();
        let thread_shared = shared.clone();
        let render_thread = thread::Builder::new()
            .name("perflab-render".to_string())
            .spawn(move || {
                let _running = RunningGuard(&thread_shared.running);
                run_render_loop(renderer, busy, constraint, &command_rx, &thread_shared)
            })?;

        Ok(Self {
            config,
            shared,
            commands,
            render_thread: Some(render_thread),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn set_num_busy_threads(&mut self, count: usize) -> Result<()> {
        if count > MAX_NUM_BUSY_THREADS {
            return Err(PerfLabError::InvalidConfig(format!(
                "num_busy_threads {} exceeds {}",
                count, MAX_NUM_BUSY_THREADS
            )));
        }
        self.request(|reply| Command::SetNumBusyThreads(count, reply))?;
        self.config.num_busy_threads = count;
        Ok(())
    }

    pub fn set_busy_thread_period(&mut self, period: Duration) -> Result<()> {
        validate_busy_params(period, self.config.busy_thread_cpu_usage)?;
        self.request(|reply| Command::SetBusyThreadPeriod(period, reply))?;
        self.config.busy_thread_period = period;
        Ok(())
    }

    pub fn set_busy_thread_cpu_usage(&mut self, cpu_usage: f64) -> Result<()> {
        validate_busy_params(self.config.busy_thread_period, cpu_usage)?;
        self.request(|reply| Command::SetBusyThreadCpuUsage(cpu_usage, reply))?;
        self.config.busy_thread_cpu_usage = cpu_usage;
        Ok(())
    }

    pub fn set_num_worker_threads(&mut self, count: usize) -> Result<()> {
        if count > MAX_NUM_WORKER_THREADS {
            return Err(PerfLabError::InvalidConfig(format!(
                "num_worker_threads {} exceeds {}",
                count, MAX_NUM_WORKER_THREADS
            )));
        }
        self.request(|reply| Command::SetNumWorkerThreads(count, reply))?;
        self.config.num_worker_threads = count;
        Ok(())
    }

    pub fn set_num_sines(&mut self, num_sines: usize) -> Result<()> {
        validate_num_sines(num_sines)?;
        self.request(|reply| Command::SetNumSines(num_sines, reply))?;
        self.config.num_sines = num_sines;
        Ok(())
    }

    /// Send a command and wait for the render thread to apply it
    fn request<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(Reply) -> Command,
    {
        if !self.is_running() {
            return Err(PerfLabError::NotRunning);
        }
        let (reply, response) = bounded(1);
        self.commands
            .send(make(reply))
            .map_err(|_| PerfLabError::NotRunning)?;
        response.recv().map_err(|_| PerfLabError::NotRunning)?
    }

    /// Cycle measurements recorded since the last drain, oldest first
    pub fn drain_cycles(&self) -> Vec<CycleMeasurement> {
        self.shared.cycles.drain()
    }

    /// Per-thread measurements recorded since the last drain, oldest first
    pub fn drain_drives(&self) -> Vec<DriveMeasurement> {
        self.shared.drives.drain()
    }

    /// Measurements discarded because nobody drained them in time
    pub fn dropped_measurements(&self) -> u64 {
        self.shared.cycles.dropped() + self.shared.drives.dropped()
    }

    pub fn cycles_rendered(&self) -> u64 {
        self.shared.cycles_rendered.load(Ordering::Relaxed)
    }

    /// Peak absolute sample value of the last rendered buffer
    pub fn output_peak(&self) -> f32 {
        f32::from_bits(self.shared.peak_bits.load(Ordering::Relaxed))
    }

    /// Stop the render thread and everything it owns; safe to call more than once
    pub fn stop(&mut self) {
        let Some(handle) = self.render_thread.take() else {
            return;
        };
        tracing::info!("Stopping engine");

        let _ = self.commands.send(Command::Stop);
        match handle.join() {
            Ok(Ok(())) => tracing::debug!("Render thread completed successfully"),
            Ok(Err(e)) => tracing::error!("Render thread failed: {}", e),
            Err(e) => tracing::error!("Failed to join render thread: {:?}", e),
        }
        self.shared.running.store(false, Ordering::Release);

        tracing::info!("Engine stopped after {} cycles", self.cycles_rendered());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_render_loop(
    mut renderer: Renderer,
    mut busy: BusyThreads,
    constraint: RealtimeConstraint,
    commands: &Receiver<Command>,
    shared: &EngineShared,
) -> Result<()> {
    if let Err(e) = promote_to_realtime(&constraint) {
        tracing::warn!("Render thread stays at normal priority: {}", e);
    }
    tracing::info!("Render thread started");

    let buffer_duration = constraint.period();
    let mut pacer = Pacer::starting_at(Instant::now(), buffer_duration);

    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Stop) | Err(TryRecvError::Disconnected) => {
                    tracing::info!("Render thread shutting down");
                    busy.stop();
                    return Ok(());
                }
                Ok(command) => apply_command(command, &mut renderer, &mut busy),
                Err(TryRecvError::Empty) => break,
            }
        }

        let start = Instant::now();
        let outcome = renderer.render_cycle();
        let duration = start.elapsed();

        let measurement = CycleMeasurement {
            start: stats::since_epoch(start),
            duration,
            buffer_duration,
            num_workers: renderer.num_workers(),
            num_busy_threads: busy.count(),
        };
        if outcome.dispatch.failed_items > 0 {
            tracing::warn!("{} render items panicked", outcome.dispatch.failed_items);
        }
        if measurement.is_overrun() {
            tracing::trace!("Cycle overran: {:?} > {:?}", duration, buffer_duration);
        }
        shared.cycles.push(measurement);
        shared.cycles_rendered.fetch_add(1, Ordering::Relaxed);
        shared.peak_bits.store(outcome.peak.to_bits(), Ordering::Relaxed);

        pacer.wait();
    }
}

fn apply_command(command: Command, renderer: &mut Renderer, busy: &mut BusyThreads) {
    tracing::debug!("Applying {:?}", command);
    let (result, reply) = match command {
        Command::SetNumBusyThreads(n, reply) => (busy.set_count(n), reply),
        Command::SetBusyThreadPeriod(d, reply) => (busy.set_period(d), reply),
        Command::SetBusyThreadCpuUsage(u, reply) => (busy.set_cpu_usage(u), reply),
        Command::SetNumWorkerThreads(n, reply) => (renderer.set_num_workers(n), reply),
        Command::SetNumSines(n, reply) => (renderer.set_num_sines(n), reply),
        Command::Stop => return,
    };
    if let Err(e) = &result {
        tracing::warn!("Control change failed: {}", e);
    }
    let _ = reply.send(result);
}
