//! Measurements handed from real-time threads to the consumer
//!
//! Producers run on the render and worker threads, so pushing must never
//! block or allocate: measurements go through a bounded lock-free queue and
//! are dropped (and counted) when the consumer falls behind.

use crossbeam_queue::ArrayQueue;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Common time base for every measurement in the process
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Offset of `instant` from the process-wide measurement epoch
pub fn since_epoch(instant: Instant) -> Duration {
    instant.saturating_duration_since(*EPOCH)
}

/// Current offset from the measurement epoch
pub fn now() -> Duration {
    since_epoch(Instant::now())
}

/// One thread's share of one render cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveMeasurement {
    /// 0 is the render thread, workers count from 1
    pub thread_index: usize,
    pub cpu: Option<usize>,
    pub start: Duration,
    pub duration: Duration,
    pub num_items: usize,
}

impl DriveMeasurement {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// One complete render cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleMeasurement {
    pub start: Duration,
    pub duration: Duration,
    pub buffer_duration: Duration,
    pub num_workers: usize,
    pub num_busy_threads: usize,
}

impl CycleMeasurement {
    /// Rendering time relative to the real-time budget; above 1.0 is an overrun
    pub fn load(&self) -> f64 {
        if self.buffer_duration.is_zero() {
            return 0.0;
        }
        self.duration.as_secs_f64() / self.buffer_duration.as_secs_f64()
    }

    pub fn is_overrun(&self) -> bool {
        self.duration > self.buffer_duration
    }
}

/// Bounded, non-blocking queue for measurements
#[derive(Debug)]
pub struct MeasurementQueue<T> {
    queue: ArrayQueue<T>,
    dropped: AtomicU64,
}

impl<T> MeasurementQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking; returns `false` if the value was dropped
    pub fn push(&self, value: T) -> bool {
        match self.queue.push(value) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Take everything currently queued, oldest first
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(value) = self.queue.pop() {
            out.push(value);
        }
        out
    }

    /// Number of measurements discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn cycle(duration_us: u64, buffer_us: u64) -> CycleMeasurement {
        CycleMeasurement {
            start: Duration::ZERO,
            duration: Duration::from_micros(duration_us),
            buffer_duration: Duration::from_micros(buffer_us),
            num_workers: 1,
            num_busy_threads: 0,
        }
    }

    #[test]
    fn test_cycle_load() {
        assert!((cycle(1000, 4000).load() - 0.25).abs() < 1e-9);
        assert!(!cycle(1000, 4000).is_overrun());
        assert!(cycle(5000, 4000).is_overrun());
        assert_eq!(cycle(1000, 0).load(), 0.0);
    }

    #[test]
    fn test_epoch_is_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn test_queue_drops_when_full() {
        let queue = MeasurementQueue::new(2);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = MeasurementQueue::<u8>::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(MeasurementQueue::new(10_000));
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        queue.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut values = queue.drain();
        values.sort_unstable();
        assert_eq!(values, (0..4000).collect::<Vec<_>>());
        assert_eq!(queue.dropped(), 0);
    }

    proptest! {
        #[test]
        fn prop_pushed_equals_kept_plus_dropped(capacity in 1usize..64, pushes in 0usize..200) {
            let queue = MeasurementQueue::new(capacity);
            for i in 0..pushes {
                queue.push(i);
            }
            let kept = queue.drain();
            prop_assert_eq!(kept.len() as u64 + queue.dropped(), pushes as u64);
            prop_assert_eq!(kept.len(), pushes.min(capacity));
            // Oldest values are the ones kept
            prop_assert_eq!(kept, (0..pushes.min(capacity)).collect::<Vec<_>>());
        }
    }
}
