//! Instrumentation events and the per-thread sinks that fold them into
//! the per-trial observation.
//!
//! Only [`TraceEvent::Branch`] affects coverage. Call/return events
//! drive an explicit call-stack tracker and alloc/read events are
//! profiled for the event log; both exist for engines that index
//! executions rather than raw branches.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::coverage::{CoverageMap, branch_slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A conditional site `id` took the given arm.
    Branch { id: u32, arm: bool },
    Call { iid: u32 },
    Return { iid: u32 },
    Alloc { iid: u32, size: usize },
    Read { iid: u32, object: u64, field: u32 },
}

/// Everything one trial's instrumentation reported, shared by all sinks
/// of that trial.
#[derive(Debug, Default)]
pub struct TrialTrace {
    pub map: CoverageMap,
    pub max_call_depth: usize,
    pub alloc_bytes: u64,
    pub reads: u64,
}

impl TrialTrace {
    pub fn reset(&mut self) {
        self.map.clear();
        self.max_call_depth = 0;
        self.alloc_bytes = 0;
        self.reads = 0;
    }
}

/// Explicit call-stack state machine driven by call/return events.
///
/// Returns may arrive without a matching call (the frame unwound, or the
/// callee was not instrumented); the tracker scans down to the matching
/// frame instead of assuming strict nesting.
#[derive(Debug, Default)]
pub struct CallTracker {
    frames: Vec<u32>,
    max_depth: usize,
}

impl CallTracker {
    pub fn enter(&mut self, iid: u32) {
        self.frames.push(iid);
        self.max_depth = self.max_depth.max(self.frames.len());
    }

    pub fn exit(&mut self, iid: u32) {
        if let Some(position) = self.frames.iter().rposition(|&frame| frame == iid) {
            self.frames.truncate(position);
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Innermost instrumented frame, if any.
    pub fn current_frame(&self) -> Option<u32> {
        self.frames.last().copied()
    }
}

/// Per-thread trace consumer. Branch events serialize on the shared
/// trial observation; call tracking and profiling counters stay local
/// and are folded in when the sink is dropped.
#[derive(Debug)]
pub struct TraceSink {
    shared: Arc<Mutex<TrialTrace>>,
    tracker: CallTracker,
    alloc_bytes: u64,
    reads: u64,
}

impl TraceSink {
    pub fn new(shared: Arc<Mutex<TrialTrace>>) -> Self {
        Self {
            shared,
            tracker: CallTracker::default(),
            alloc_bytes: 0,
            reads: 0,
        }
    }

    /// A sink for a thread the target spawned. Shares the trial
    /// observation but starts with a fresh call stack.
    pub fn for_new_thread(&self) -> Self {
        Self::new(Arc::clone(&self.shared))
    }

    pub fn emit(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Branch { id, arm } => {
                self.lock_shared().map.increment(branch_slot(id, arm));
            }
            TraceEvent::Call { iid } => self.tracker.enter(iid),
            TraceEvent::Return { iid } => self.tracker.exit(iid),
            TraceEvent::Alloc { size, .. } => self.alloc_bytes += size as u64,
            TraceEvent::Read { .. } => self.reads += 1,
        }
    }

    /// Shorthand for the one event the guidance feeds on.
    pub fn branch(&mut self, id: u32, arm: bool) {
        self.emit(TraceEvent::Branch { id, arm });
    }

    pub fn current_frame(&self) -> Option<u32> {
        self.tracker.current_frame()
    }

    fn lock_shared(&self) -> MutexGuard<'_, TrialTrace> {
        // A panicking target thread may poison the lock; the observation
        // itself is still consistent byte-wise.
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TraceSink {
    fn drop(&mut self) {
        let mut shared = self.lock_shared();
        shared.max_call_depth = shared.max_call_depth.max(self.tracker.max_depth());
        shared.alloc_bytes += self.alloc_bytes;
        shared.reads += self.reads;
    }
}
