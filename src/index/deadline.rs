//! Cooperative search deadline
//!
//! Long scans call [`PaceLimiter::tick`] on every iteration; the clock is only
//! read once every `check_interval` ticks, so the per-item cost is a counter
//! increment and a mask test.

use crate::index::error::{SearchError, SearchResult};
use std::time::{Duration, Instant};

/// Default number of iterations between deadline checks
pub const DEFAULT_CHECK_INTERVAL: u32 = 1024;

/// Deadline for one search, supplied by the caller
#[derive(Debug, Clone, Copy)]
pub struct SearchDeadline {
    deadline: Instant,
    timeout: Duration,
}

impl SearchDeadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Deadline at a fixed instant; `timeout` is only used for error reporting
    pub fn at(deadline: Instant, timeout: Duration) -> Self {
        Self { deadline, timeout }
    }

    /// Whether the deadline has passed
    pub fn exceeded(&self) -> bool {
        Instant::now() > self.deadline
    }

    /// Fail with `DeadlineExceeded` once the deadline has passed
    pub fn check(&self) -> SearchResult<()> {
        if self.exceeded() {
            return Err(SearchError::DeadlineExceeded {
                timeout: self.timeout,
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline (zero once passed)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Iteration counter that consults a [`SearchDeadline`] periodically
#[derive(Debug)]
pub struct PaceLimiter<'a> {
    deadline: &'a SearchDeadline,
    mask: u32,
    loops: u32,
}

impl<'a> PaceLimiter<'a> {
    /// `check_interval` is rounded up to a power of two
    pub fn new(deadline: &'a SearchDeadline, check_interval: u32) -> Self {
        let interval = check_interval.clamp(1, 1 << 30).next_power_of_two();
        Self {
            deadline,
            mask: interval - 1,
            loops: 0,
        }
    }

    /// Count one iteration. The first iteration and every
    /// `check_interval`-th one after it read the clock.
    pub fn tick(&mut self) -> SearchResult<()> {
        let due = (self.loops & self.mask) == 0;
        self.loops = self.loops.wrapping_add(1);
        if due {
            self.deadline.check()?;
        }
        Ok(())
    }
}
