//! Cooperative, single-threaded fiber scheduling.
//!
//! There is exactly one mutator: the scheduler interleaves fibers by
//! stepping them serially, never in parallel. There is no second thread
//! here to race with, so a lock-free atomic slot registry collapses to
//! plain counters updated directly by the single thread that ever
//! touches them; the registry/stats shape (a bounded tracking structure
//! plus lifetime counters for diagnostics) is kept.

use crate::fiber::{Fiber, FiberState};

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub total_spawned: u64,
    pub total_completed: u64,
    pub total_crashed: u64,
    pub peak_fibers: usize,
}

/// Owns the live fiber list and the bookkeeping the diagnostics dump
/// reports. Does not itself know how to execute bytecode -- `Engine`
/// drives each `Running` fiber through the interpreter and calls back into
/// this module only to manage membership and suspension state.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// New fibers are prepended (`push_front`), matching creation-order
    /// semantics: the most recently spawned fiber is visited first.
    fibers: std::collections::VecDeque<Fiber>,
    next_id: u64,
    interrupted: bool,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.fibers.push_front(Fiber::new(id));
        self.stats.total_spawned += 1;
        self.stats.peak_fibers = self.stats.peak_fibers.max(self.fibers.len());
        id
    }

    pub fn fibers(&self) -> impl Iterator<Item = &Fiber> {
        self.fibers.iter()
    }

    pub fn fibers_mut(&mut self) -> impl Iterator<Item = &mut Fiber> {
        self.fibers.iter_mut()
    }

    pub fn find_mut(&mut self, id: u64) -> Option<&mut Fiber> {
        self.fibers.iter_mut().find(|f| f.id == id)
    }

    /// Wake every fiber whose sleep deadline has passed.
    pub fn wake_sleepers(&mut self, now: u64) {
        for fiber in self.fibers.iter_mut() {
            if let FiberState::Sleeping(until) = fiber.state {
                if until <= now {
                    fiber.reactivate();
                }
            }
        }
    }

    /// Drop every fiber that reached a terminal state, updating lifetime
    /// stats as they're reaped.
    pub fn reap_terminated(&mut self) {
        let before = self.fibers.len();
        let mut completed = 0u64;
        let mut crashed = 0u64;
        self.fibers.retain(|f| match f.state {
            FiberState::Stopped => {
                completed += 1;
                false
            }
            FiberState::Crashed => {
                crashed += 1;
                false
            }
            _ => true,
        });
        debug_assert!(self.fibers.len() <= before);
        self.stats.total_completed += completed;
        self.stats.total_crashed += crashed;
    }

    /// True iff no fiber is presently `Running` -- the caller's event loop
    /// may then block briefly on network I/O instead of busy-ticking.
    pub fn is_sleeping(&self) -> bool {
        !self.fibers.iter().any(|f| f.state == FiberState::Running)
    }

    pub fn is_idle(&self) -> bool {
        self.fibers.is_empty()
    }

    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            peak_fibers: self.stats.peak_fibers.max(self.fibers.len()),
            ..self.stats
        }
    }
}
