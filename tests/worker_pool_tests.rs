//! Integration tests for the worker pool

mod common;

use audio_perf_lab::stats::MeasurementQueue;
use audio_perf_lab::{RealtimeConstraint, WorkerPool};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_worker_threads_are_named() {
    common::setup_tracing();
    let pool = WorkerPool::new(2, None, false, Arc::new(MeasurementQueue::new(64))).unwrap();
    let names = Arc::new(Mutex::new(HashSet::new()));

    let seen = names.clone();
    pool.dispatch(
        Arc::new(move |_: usize, thread: usize| {
            std::thread::sleep(Duration::from_millis(2));
            if thread > 0 {
                let name = std::thread::current().name().unwrap_or("").to_string();
                seen.lock().unwrap().insert(name);
            }
        }),
        32,
    );

    for name in names.lock().unwrap().iter() {
        assert!(name.starts_with("perflab-worker-"), "unexpected thread {}", name);
    }
}

#[test]
fn test_realtime_and_pinned_workers_still_run() {
    common::setup_tracing();
    // Promotion may fail without privileges; the pool must work either way
    let constraint = RealtimeConstraint::for_period(Duration::from_millis(3));
    let drives = Arc::new(MeasurementQueue::new(64));
    let pool = WorkerPool::new(2, Some(constraint), true, drives.clone()).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let job_count = count.clone();
    let report = pool.dispatch(
        Arc::new(move |_: usize, _: usize| {
            job_count.fetch_add(1, Ordering::Relaxed);
        }),
        64,
    );

    assert_eq!(count.load(Ordering::Relaxed), 64);
    assert_eq!(report.num_items, 64);
    assert!(report.workers_woken <= 2);

    // The dispatching thread always reports its share
    assert!(drives.drain().iter().any(|d| d.thread_index == 0));
}

#[test]
fn test_drive_measurements_account_for_all_items() {
    let drives = Arc::new(MeasurementQueue::new(1024));
    let mut pool = WorkerPool::new(3, None, false, drives.clone()).unwrap();

    for _ in 0..50 {
        pool.dispatch(Arc::new(|_: usize, _: usize| std::hint::spin_loop()), 12);
    }
    // Joining the workers flushes any late drive measurements
    pool.shutdown();

    let total: usize = drives.drain().iter().map(|d| d.num_items).sum();
    assert_eq!(total, 50 * 12);
    assert_eq!(drives.dropped(), 0);
}
