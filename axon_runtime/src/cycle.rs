//! Deterministic RT cycle pacing.
//!
//! The runner paces a caller-supplied cycle body at a fixed frequency
//! with absolute-time sleeps on `CLOCK_MONOTONIC`
//! (`clock_nanosleep(TIMER_ABSTIME)`) so timing error never
//! accumulates. Without the `rt` feature the loop paces with
//! `std::thread::sleep` and all RT system calls are no-ops, which is
//! the mode integration tests run in.
//!
//! ## RT setup
//! [`rt_setup`] locks current and future pages, prefaults the stack,
//! pins the thread to the configured core and switches it to
//! `SCHED_FIFO` at the configured priority, in that order. A page
//! fault or a migration after the loop starts would blow the cycle
//! budget.

use thiserror::Error;
use tracing::warn;

use axon_common::config::RtConfig;
use axon_common::error::StatusError;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics, updated with no allocation.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Cycles completed so far.
    pub cycle_count: u64,
    /// Duration of the most recent cycle [ns].
    pub last_cycle_ns: i64,
    /// Shortest cycle observed [ns].
    pub min_cycle_ns: i64,
    /// Longest cycle observed [ns].
    pub max_cycle_ns: i64,
    /// Running sum, feeds [`CycleStats::avg_cycle_ns`].
    pub sum_cycle_ns: i64,
    /// Cycles that exceeded the budget.
    pub overruns: u64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
        }
    }

    /// Fold one cycle duration into the statistics. O(1).
    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        if duration_ns < self.min_cycle_ns {
            self.min_cycle_ns = duration_ns;
        }
        if duration_ns > self.max_cycle_ns {
            self.max_cycle_ns = duration_ns;
        }
        self.sum_cycle_ns += duration_ns;
    }

    /// Mean cycle time [ns]; zero before the first cycle.
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed during setup or pacing.
    #[error("RT setup error: {0}")]
    RtSetup(String),
    /// A cycle exceeded its budget (hard deadline, `rt` builds only).
    #[error("cycle overrun: {actual_ns}ns > {budget_ns}ns budget")]
    Overrun { actual_ns: i64, budget_ns: i64 },
    /// The cycle body failed; the owning session has already ended.
    #[error(transparent)]
    Action(#[from] StatusError),
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch a large stack allocation so the pages exist before the loop.
fn prefault_stack() {
    let mut buf = [0u8; 1024 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: in-bounds write; volatile so it is not elided.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain syscall with a valid param struct.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup for the calling thread. Call once before entering the
/// cycle loop. All steps are no-ops without the `rt` feature.
pub fn rt_setup(config: &RtConfig) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(config.cpu_core)?;
    rt_set_scheduler(config.priority)?;
    Ok(())
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// What the cycle body wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleControl {
    Continue,
    Stop,
}

/// Fixed-frequency loop driver around a caller-supplied cycle body.
pub struct CycleRunner {
    cycle_time_ns: i64,
    stats: CycleStats,
}

impl CycleRunner {
    /// # Errors
    /// `RtSetup` if the frequency is not a positive finite value.
    pub fn new(frequency_hz: f64) -> Result<Self, CycleError> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(CycleError::RtSetup(format!(
                "invalid control frequency {frequency_hz}"
            )));
        }
        Ok(Self {
            cycle_time_ns: (1_000_000_000.0 / frequency_hz) as i64,
            stats: CycleStats::new(),
        })
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn cycle_time_ns(&self) -> i64 {
        self.cycle_time_ns
    }

    /// Run the paced loop until `body` returns [`CycleControl::Stop`]
    /// or fails.
    ///
    /// With the `rt` feature a single overrun is a hard error; in
    /// simulation it is only counted.
    pub fn run(
        &mut self,
        body: impl FnMut(u64) -> Result<CycleControl, StatusError>,
    ) -> Result<(), CycleError> {
        #[cfg(feature = "rt")]
        {
            self.run_rt_loop(body)
        }
        #[cfg(not(feature = "rt"))]
        {
            self.run_sim_loop(body)
        }
    }

    #[cfg(feature = "rt")]
    fn run_rt_loop(
        &mut self,
        mut body: impl FnMut(u64) -> Result<CycleControl, StatusError>,
    ) -> Result<(), CycleError> {
        use nix::sys::time::TimeSpec;
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        fn now(clock: ClockId) -> Result<TimeSpec, CycleError> {
            clock_gettime(clock).map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))
        }

        let clock = ClockId::CLOCK_MONOTONIC;
        let mut next_wake = now(clock)?;

        loop {
            next_wake = timespec_add_ns(next_wake, self.cycle_time_ns);

            let cycle_start = now(clock)?;
            let control = body(self.stats.cycle_count)?;
            let cycle_end = now(clock)?;

            let duration_ns = timespec_diff_ns(&cycle_end, &cycle_start);
            self.stats.record(duration_ns);

            if duration_ns > self.cycle_time_ns {
                self.stats.overruns += 1;
                return Err(CycleError::Overrun {
                    actual_ns: duration_ns,
                    budget_ns: self.cycle_time_ns,
                });
            }
            if control == CycleControl::Stop {
                return Ok(());
            }

            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
    }

    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(
        &mut self,
        mut body: impl FnMut(u64) -> Result<CycleControl, StatusError>,
    ) -> Result<(), CycleError> {
        use std::time::{Duration, Instant};

        let cycle_duration = Duration::from_nanos(self.cycle_time_ns as u64);

        loop {
            let cycle_start = Instant::now();
            let control = body(self.stats.cycle_count)?;
            let elapsed = cycle_start.elapsed();
            let duration_ns = elapsed.as_nanos() as i64;
            self.stats.record(duration_ns);

            if duration_ns > self.cycle_time_ns {
                // Simulation keeps going; only the count records it.
                self.stats.overruns += 1;
                warn!(duration_ns, budget_ns = self.cycle_time_ns, "cycle overrun");
            }
            if control == CycleControl::Stop {
                return Ok(());
            }

            if let Some(remaining) = cycle_duration.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_basic() {
        let mut stats = CycleStats::new();
        assert_eq!(stats.avg_cycle_ns(), 0);

        stats.record(500_000);
        assert_eq!(stats.cycle_count, 1);
        assert_eq!(stats.min_cycle_ns, 500_000);
        assert_eq!(stats.max_cycle_ns, 500_000);

        stats.record(700_000);
        assert_eq!(stats.min_cycle_ns, 500_000);
        assert_eq!(stats.max_cycle_ns, 700_000);
        assert_eq!(stats.avg_cycle_ns(), 600_000);
    }

    #[test]
    fn runner_rejects_bad_frequency() {
        assert!(CycleRunner::new(0.0).is_err());
        assert!(CycleRunner::new(-10.0).is_err());
        assert!(CycleRunner::new(f64::NAN).is_err());
        assert_eq!(CycleRunner::new(1000.0).unwrap().cycle_time_ns(), 1_000_000);
    }

    #[test]
    fn runner_counts_cycles_until_stop() {
        let mut runner = CycleRunner::new(10_000.0).unwrap();
        runner
            .run(|cycle| {
                Ok(if cycle >= 9 {
                    CycleControl::Stop
                } else {
                    CycleControl::Continue
                })
            })
            .unwrap();
        assert_eq!(runner.stats().cycle_count, 10);
    }

    #[test]
    fn body_error_stops_the_loop() {
        let mut runner = CycleRunner::new(10_000.0).unwrap();
        let err = runner
            .run(|cycle| {
                if cycle == 2 {
                    Err(StatusError::Internal("boom".to_string()))
                } else {
                    Ok(CycleControl::Continue)
                }
            })
            .unwrap_err();
        assert!(matches!(err, CycleError::Action(_)));
        assert_eq!(runner.stats().cycle_count, 2);
    }

    #[test]
    fn rt_setup_without_feature_is_noop() {
        #[cfg(not(feature = "rt"))]
        {
            assert!(rt_setup(&RtConfig::default()).is_ok());
        }
    }
}
