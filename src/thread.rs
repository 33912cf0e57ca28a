//! Thread scheduling helpers
//!
//! Real-time promotion, CPU pinning and CPU identification for the render,
//! worker and busy threads. Everything here degrades to a logged no-op on
//! platforms without the corresponding facility.

use std::time::Duration;

use crate::config::REALTIME_THREAD_QUANTUM;
#[cfg(target_os = "linux")]
use crate::error::PerfLabError;
use crate::error::Result;

/// Scheduling constraint requested for a real-time thread
///
/// `period` is how often the thread has work (one render cycle) and
/// `quantum` is the slice of that period it needs without preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeConstraint {
    period: Duration,
    quantum: Duration,
}

impl RealtimeConstraint {
    /// Constraint for a thread woken once per `period`; the quantum is clamped
    /// to the period
    pub fn new(period: Duration, quantum: Duration) -> Self {
        Self {
            period,
            quantum: quantum.min(period),
        }
    }

    /// Constraint using [`REALTIME_THREAD_QUANTUM`]
    pub fn for_period(period: Duration) -> Self {
        Self::new(period, REALTIME_THREAD_QUANTUM)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Share of each period the quantum represents (0.0..=1.0)
    pub fn duty_cycle(&self) -> f64 {
        if self.period.is_zero() {
            return 0.0;
        }
        self.quantum.as_secs_f64() / self.period.as_secs_f64()
    }
}

/// Request real-time scheduling for the calling thread (Linux)
///
/// `SCHED_FIFO` one step below the maximum priority. Usually fails without
/// `CAP_SYS_NICE` or an `rtprio` limit; callers should log and carry on.
#[cfg(target_os = "linux")]
pub fn promote_to_realtime(constraint: &RealtimeConstraint) -> Result<()> {
    if constraint.period().is_zero() {
        return Err(PerfLabError::Realtime("zero period".to_string()));
    }

    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        if max < 0 || min < 0 {
            return Err(PerfLabError::Realtime(
                std::io::Error::last_os_error().to_string(),
            ));
        }

        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = (max - 1).max(min);

        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if rc != 0 {
            return Err(PerfLabError::Realtime(
                std::io::Error::from_raw_os_error(rc).to_string(),
            ));
        }
    }

    tracing::debug!(
        "Thread promoted to SCHED_FIFO (period {:?}, quantum {:?})",
        constraint.period(),
        constraint.quantum()
    );
    Ok(())
}

/// Fallback for non-Linux systems
#[cfg(not(target_os = "linux"))]
pub fn promote_to_realtime(constraint: &RealtimeConstraint) -> Result<()> {
    tracing::debug!(
        "Real-time promotion not supported on this platform (period {:?})",
        constraint.period()
    );
    Ok(())
}

/// Bind the calling thread to one CPU (Linux)
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<()> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    cpu_set
        .set(cpu)
        .map_err(|e| PerfLabError::Affinity(format!("CPU {}: {}", cpu, e)))?;

    sched_setaffinity(Pid::from_raw(0), &cpu_set)
        .map_err(|e| PerfLabError::Affinity(format!("CPU {}: {}", cpu, e)))?;

    tracing::debug!("Thread bound to CPU {}", cpu);
    Ok(())
}

/// Fallback for non-Linux systems
#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(cpu: usize) -> Result<()> {
    tracing::debug!("CPU binding not supported on this platform (CPU {})", cpu);
    Ok(())
}

/// CPU the calling thread is currently running on, if the platform reports it
#[cfg(target_os = "linux")]
pub fn current_cpu() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    (cpu >= 0).then_some(cpu as usize)
}

#[cfg(not(target_os = "linux"))]
pub fn current_cpu() -> Option<usize> {
    None
}

/// Number of logical CPUs
pub fn available_cpus() -> usize {
    num_cpus::get().max(1)
}
