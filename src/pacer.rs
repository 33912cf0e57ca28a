//! Periodic deadline pacing for the render and busy threads

use std::time::{Duration, Instant};

/// Produces absolute deadlines spaced by `period`
///
/// Deadlines advance by exactly one period so jitter does not accumulate. When
/// the caller falls more than one period behind, the pacer re-anchors on the
/// current time instead of bursting through the missed deadlines.
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    next_tick: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now() + period, period)
    }

    /// Pacer whose first deadline is `first_tick`
    pub fn starting_at(first_tick: Instant, period: Duration) -> Self {
        Pacer {
            period,
            next_tick: first_tick,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Change the period; applies from the deadline after the next one
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_tick
    }

    /// Sleep until the next deadline, then advance it
    ///
    /// Returns `true` if the deadline had already passed when called.
    pub fn wait(&mut self) -> bool {
        let now = Instant::now();
        let late = now >= self.next_tick;
        if !late {
            std::thread::sleep(self.next_tick - now);
        }
        self.advance(Instant::now());
        late
    }

    /// Move to the deadline after the current one, as seen at `now`
    pub fn advance(&mut self, now: Instant) {
        self.next_tick += self.period;
        if now > self.next_tick + self.period {
            tracing::trace!("Pacer fell behind by {:?}, re-anchoring", now - self.next_tick);
            self.next_tick = now + self.period;
        }
    }
}

/// Busy-wait until `deadline`
pub fn spin_until(deadline: Instant) {
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_exact() {
        let start = Instant::now();
        let period = Duration::from_millis(10);
        let mut pacer = Pacer::starting_at(start, period);

        pacer.advance(start);
        assert_eq!(pacer.next_deadline(), start + period);
        pacer.advance(start + Duration::from_millis(12));
        assert_eq!(pacer.next_deadline(), start + 2 * period);
    }

    #[test]
    fn test_reanchors_when_far_behind() {
        let start = Instant::now();
        let period = Duration::from_millis(10);
        let mut pacer = Pacer::starting_at(start, period);

        let now = start + Duration::from_millis(100);
        pacer.advance(now);
        assert_eq!(pacer.next_deadline(), now + period);
    }

    #[test]
    fn test_wait_sleeps_until_deadline() {
        let period = Duration::from_millis(5);
        let mut pacer = Pacer::new(period);
        let start = Instant::now();

        for _ in 0..4 {
            pacer.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wait_reports_late() {
        let mut pacer = Pacer::starting_at(Instant::now(), Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(1));
        assert!(pacer.wait());
    }

    #[test]
    fn test_spin_until() {
        let deadline = Instant::now() + Duration::from_millis(2);
        spin_until(deadline);
        assert!(Instant::now() >= deadline);
    }
}
