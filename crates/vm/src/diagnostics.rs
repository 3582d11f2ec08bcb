//! Runtime diagnostics for production debugging.
//!
//! A SIGQUIT (`kill -3`) handler dumps scheduler/GC/heap counters to
//! stderr without stopping the process. There is only ever one mutator
//! thread here, so a cross-thread, one-atomic-slot-per-worker registry
//! aggregated under a signal handler that can't block collapses to a
//! single snapshot struct read directly off the `Engine` -- no registry,
//! no atomics, nothing for the signal handler to race.

use std::sync::Once;

use raven_core::HeapStats;

use crate::engine::Engine;
use crate::scheduler::SchedulerStats;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// A point-in-time snapshot of the counters `dump` reports, separated from
/// `Engine` itself so tests can assert on it without stderr plumbing.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub scheduler: SchedulerStats,
    pub heap: HeapStats,
    pub heartbeat_objects: usize,
}

pub fn snapshot(engine: &Engine) -> DiagnosticsSnapshot {
    DiagnosticsSnapshot {
        scheduler: engine.scheduler.stats(),
        heap: engine.heap.stats(),
        heartbeat_objects: engine.vars.heartbeat_objects().len(),
    }
}

/// Write a snapshot to stderr in an `=== ... ===` banner.
pub fn dump(engine: &Engine) {
    use std::io::Write;

    let s = snapshot(engine);
    let mut out = std::io::stderr().lock();

    let _ = writeln!(out, "\n=== Raven Runtime Diagnostics ===");
    let _ = writeln!(out, "\n[Scheduler]");
    let _ = writeln!(out, "  Active fibers: {}", engine.scheduler.fibers().count());
    let _ = writeln!(out, "  Spawned (lifetime): {}", s.scheduler.total_spawned);
    let _ = writeln!(out, "  Completed: {}", s.scheduler.total_completed);
    let _ = writeln!(out, "  Crashed: {}", s.scheduler.total_crashed);
    let _ = writeln!(out, "  Peak concurrent: {}", s.scheduler.peak_fibers);
    let _ = writeln!(out, "  Heartbeat-enabled objects: {}", s.heartbeat_objects);

    let _ = writeln!(out, "\n[Heap]");
    let _ = writeln!(out, "  Live objects: {}", s.heap.live_objects);
    let _ = writeln!(out, "  Total slots: {}", s.heap.total_slots);
    let _ = writeln!(out, "  Free slots: {}", s.heap.free_slots);
    let _ = writeln!(out, "  GC cycles: {}", s.heap.collections);
    let _ = writeln!(out, "  Last cycle freed: {}", s.heap.last_collected);

    let _ = writeln!(out, "\n=== End Diagnostics ===\n");
}

/// Install the SIGQUIT handler, idempotently. A no-op on non-Unix targets
/// or when the `diagnostics` feature is disabled.
#[cfg(all(unix, feature = "diagnostics"))]
pub fn install_signal_handler(engine: &'static std::sync::Mutex<Engine>) {
    SIGNAL_HANDLER_INIT.call_once(|| {
        unsafe {
            let _ = signal_hook::low_level::register(signal_hook::consts::SIGQUIT, move || {
                if let Ok(guard) = engine.try_lock() {
                    dump(&guard);
                }
            });
        }
    });
}

#[cfg(not(all(unix, feature = "diagnostics")))]
pub fn install_signal_handler(_engine: &'static std::sync::Mutex<Engine>) {
    SIGNAL_HANDLER_INIT.call_once(|| {});
}
