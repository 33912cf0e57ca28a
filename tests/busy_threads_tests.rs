//! Integration tests for busy threads

mod common;

use audio_perf_lab::config::{DEFAULT_BUSY_THREAD_CPU_USAGE, DEFAULT_BUSY_THREAD_PERIOD};
use audio_perf_lab::BusyThreads;
use std::time::{Duration, Instant};

#[test]
fn test_busy_thread_lifecycle() {
    common::setup_tracing();
    let mut busy =
        BusyThreads::new(DEFAULT_BUSY_THREAD_PERIOD, DEFAULT_BUSY_THREAD_CPU_USAGE).unwrap();
    busy.set_count(2).unwrap();
    assert_eq!(busy.count(), 2);
    busy.stop();
    assert_eq!(busy.count(), 0);
}

#[test]
#[cfg(target_os = "linux")]
fn test_duty_cycle_bounds_cpu_time() {
    common::setup_tracing();

    fn process_cpu_time() -> Duration {
        let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_PROCESS_CPUTIME_ID).unwrap();
        Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32)
    }

    let mut busy = BusyThreads::new(Duration::from_millis(10), 0.25).unwrap();
    let cpu_before = process_cpu_time();
    let wall = Instant::now();

    busy.set_count(1).unwrap();
    std::thread::sleep(Duration::from_millis(400));
    busy.stop();

    let cpu = process_cpu_time() - cpu_before;
    let elapsed = wall.elapsed();
    // One thread at 25%: comfortably below a fully spinning thread
    assert!(
        cpu < elapsed.mul_f64(0.8),
        "busy thread used {:?} CPU over {:?}",
        cpu,
        elapsed
    );
    assert!(cpu > Duration::from_millis(20), "busy thread barely ran: {:?}", cpu);
}

#[test]
fn test_zero_usage_threads_only_sleep() {
    let mut busy = BusyThreads::new(Duration::from_millis(5), 0.0).unwrap();
    busy.set_count(4).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    busy.set_count(0).unwrap();
    assert_eq!(busy.count(), 0);
}
