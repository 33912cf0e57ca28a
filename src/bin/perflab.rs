//! Run the render engine and report scheduling behaviour
//!
//! Configuration comes from `PERFLAB_*` environment variables (see
//! `EngineConfig::from_env`), log filtering from `RUST_LOG`. Runs until
//! SIGINT/SIGTERM, or for `PERFLAB_RUN_SECS` seconds when set.

use audio_perf_lab::signal::ShutdownSignal;
use audio_perf_lab::*;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);
const TIMELINE_WIDTH: usize = 200;
const TIMELINE_SECONDS: f64 = 5.0;

/// Per-thread accumulation between reports
struct ThreadActivity {
    timeline: ActivityTimeline<usize>,
    busy: Duration,
    items: usize,
    cpu: Option<usize>,
}

impl ThreadActivity {
    fn new() -> Self {
        Self {
            timeline: ActivityTimeline::new(TIMELINE_WIDTH, TIMELINE_SECONDS, 1.0),
            busy: Duration::ZERO,
            items: 0,
            cpu: None,
        }
    }

    fn record(&mut self, drive: &DriveMeasurement) {
        self.timeline.add_sample(
            drive.start.as_secs_f64(),
            drive.duration.as_secs_f64(),
            1.0,
            drive.cpu.unwrap_or(usize::MAX),
        );
        self.busy += drive.duration;
        self.items += drive.num_items;
        self.cpu = drive.cpu;
    }

    /// Mean of the visible timeline: share of the window this thread was active
    fn utilization(&mut self) -> f64 {
        let end = self.timeline.end_time().unwrap_or(0.0);
        self.timeline.set_start_time((end - TIMELINE_SECONDS).max(0.0));
        let visible = self.timeline.visible();
        if visible.is_empty() {
            return 0.0;
        }
        visible.iter().map(|p| p.value).sum::<f64>() / visible.len() as f64
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env()?;
    let run_for = match std::env::var("PERFLAB_RUN_SECS") {
        Ok(secs) => Some(Duration::from_secs(secs.trim().parse()?)),
        Err(_) => None,
    };

    tracing::info!("Available logical CPUs: {}", thread::available_cpus());
    let shutdown = ShutdownSignal::new().install()?;
    let mut engine = Engine::start(config)?;

    let started = Instant::now();
    let mut threads: BTreeMap<usize, ThreadActivity> = BTreeMap::new();

    while !shutdown.load(Ordering::SeqCst) {
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        std::thread::sleep(REPORT_INTERVAL);

        let cycles = engine.drain_cycles();
        for drive in engine.drain_drives() {
            threads
                .entry(drive.thread_index)
                .or_insert_with(ThreadActivity::new)
                .record(&drive);
        }
        report(&cycles, &mut threads, engine.dropped_measurements());
    }

    engine.stop();
    Ok(())
}

fn report(
    cycles: &[CycleMeasurement],
    threads: &mut BTreeMap<usize, ThreadActivity>,
    dropped: u64,
) {
    if cycles.is_empty() {
        tracing::warn!("No cycles rendered in the last {:?}", REPORT_INTERVAL);
        return;
    }

    let loads: Vec<f64> = cycles.iter().map(CycleMeasurement::load).collect();
    let average = loads.iter().sum::<f64>() / loads.len() as f64;
    let max = loads.iter().cloned().fold(0.0, f64::max);
    let overruns = cycles.iter().filter(|c| c.is_overrun()).count();

    tracing::info!(
        "{} cycles, load avg {:.1}% max {:.1}%, {} overruns, {} busy threads, {} dropped",
        cycles.len(),
        average * 100.0,
        max * 100.0,
        overruns,
        cycles[cycles.len() - 1].num_busy_threads,
        dropped
    );

    for (index, activity) in threads.iter_mut() {
        let utilization = activity.utilization();
        tracing::info!(
            "  thread {:>2} cpu {:>4} busy {:>5.1}% items {:>6} window {:>5.1}%",
            index,
            activity
                .cpu
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string()),
            activity.busy.as_secs_f64() / REPORT_INTERVAL.as_secs_f64() * 100.0,
            activity.items,
            utilization * 100.0
        );
        activity.busy = Duration::ZERO;
        activity.items = 0;
    }
}
