#![cfg(feature = "signal")]

use audio_perf_lab::signal::ShutdownSignal;
use signal_hook::consts::SIGTERM;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn signal_handling_sigterm_graceful() {
    let callback_ran = Arc::new(AtomicBool::new(false));
    let callback_flag = callback_ran.clone();

    let mut signal = ShutdownSignal::new();
    signal.register_callback(SIGTERM, move |_| {
        callback_flag.store(true, Ordering::SeqCst);
    });
    let shutdown = signal.install().expect("install signal handler");

    // Send SIGTERM to current process
    unsafe {
        libc::kill(libc::getpid(), libc::SIGTERM);
    }

    // Wait briefly to allow signal to be handled
    let start = Instant::now();
    while !callback_ran.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(shutdown.load(Ordering::SeqCst));
    assert!(callback_ran.load(Ordering::SeqCst));
}
