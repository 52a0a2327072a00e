//! Update timer
//!
//! Measures the wall time and the thread CPU time spent in one block update.

use cpu_time::ThreadTime;
use std::time::Instant;

/// Running measurement started by [`Timer::start`]
pub struct Timer {
    wall: Instant,
    cpu: Option<ThreadTime>,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            wall: Instant::now(),
            cpu: ThreadTime::try_now().ok(),
        }
    }

    /// `(cpu_seconds, wall_seconds)` since start
    ///
    /// A CPU clock that is unavailable or too coarse to register the update
    /// reports the wall time instead.
    pub fn stop(&self) -> (f64, f64) {
        let wall = self.wall.elapsed().as_secs_f64();
        let cpu = self
            .cpu
            .as_ref()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        if cpu > 0.0 {
            (cpu, wall)
        } else {
            (wall, wall)
        }
    }
}
