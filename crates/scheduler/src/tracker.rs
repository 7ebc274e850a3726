//! Ready queue and per-segment dependency tracking.
//!
//! State machine per segment:
//! `Pending -> Ready -> Dispatched -> Finished(Success|Failed|Canceled)`.
//! A segment id enters the ready queue exactly once, when its remaining
//! dependency count reaches zero. All mutation happens under the scheduler's
//! tracker lock; removing a finished segment's dependent set and enqueueing
//! newly-ready dependents are one atomic step.

use std::collections::{HashMap, HashSet, VecDeque};

use sgq_common::SegmentId;

use crate::topology::Topology;

/// Terminal outcome recorded for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Success,
    Failed,
    /// Treated the same as failure for propagation, recorded distinctly
    /// for reporting.
    Canceled,
}

/// Lifecycle state of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Ready,
    Dispatched,
    Finished(SegmentOutcome),
}

#[derive(Debug)]
pub struct DependencyTracker {
    dependents: HashMap<SegmentId, HashSet<SegmentId>>,
    remaining_deps: HashMap<SegmentId, usize>,
    states: HashMap<SegmentId, SegmentState>,
    ready: VecDeque<SegmentId>,
}

impl DependencyTracker {
    /// Build tracker state from a derived topology; segments with no
    /// upstream dependency start `Ready`.
    pub fn new(topology: Topology) -> Self {
        let mut states: HashMap<SegmentId, SegmentState> = topology
            .dependency_count
            .keys()
            .map(|id| (*id, SegmentState::Pending))
            .collect();
        let mut ready = VecDeque::with_capacity(topology.sources.len());
        for id in &topology.sources {
            states.insert(*id, SegmentState::Ready);
            ready.push_back(*id);
        }
        Self {
            dependents: topology.dependents,
            remaining_deps: topology.dependency_count,
            states,
            ready,
        }
    }

    /// Take every currently-ready segment, in enqueue order.
    pub fn drain_ready(&mut self) -> Vec<SegmentId> {
        self.ready.drain(..).collect()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn mark_dispatched(&mut self, id: SegmentId) {
        if let Some(state) = self.states.get_mut(&id) {
            if *state == SegmentState::Ready {
                *state = SegmentState::Dispatched;
            }
        }
    }

    /// Record a segment's terminal state and unblock its dependents.
    ///
    /// Returns the segments that became ready. On failure or cancellation
    /// no dependent is enqueued; the caller fails/cancels the query.
    /// Duplicate or post-cancellation invocations are no-ops.
    pub fn on_segment_finished(
        &mut self,
        id: SegmentId,
        succeeded: bool,
        canceled: bool,
    ) -> Vec<SegmentId> {
        match self.states.get(&id) {
            None | Some(SegmentState::Finished(_)) => return Vec::new(),
            _ => {}
        }
        let outcome = if succeeded {
            SegmentOutcome::Success
        } else if canceled {
            SegmentOutcome::Canceled
        } else {
            SegmentOutcome::Failed
        };
        self.states.insert(id, SegmentState::Finished(outcome));

        // Removal bookkeeping: a second finish for `id` finds no dependents.
        let Some(dependents) = self.dependents.remove(&id) else {
            return Vec::new();
        };
        if !succeeded {
            return Vec::new();
        }

        let mut newly_ready = Vec::new();
        for dependent in dependents {
            let Some(count) = self.remaining_deps.get_mut(&dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && self.states.get(&dependent) == Some(&SegmentState::Pending) {
                self.states.insert(dependent, SegmentState::Ready);
                self.ready.push_back(dependent);
                newly_ready.push(dependent);
            }
        }
        newly_ready
    }

    /// Transition every non-terminal segment to `Finished(Canceled)` so
    /// cancellation leaves nothing stuck in `Pending`/`Ready`/`Dispatched`.
    pub fn cancel_unfinished(&mut self) -> usize {
        let mut canceled = 0;
        for state in self.states.values_mut() {
            if !matches!(state, SegmentState::Finished(_)) {
                *state = SegmentState::Finished(SegmentOutcome::Canceled);
                canceled += 1;
            }
        }
        self.ready.clear();
        canceled
    }

    pub fn state(&self, id: SegmentId) -> Option<SegmentState> {
        self.states.get(&id).copied()
    }

    pub fn all_finished(&self) -> bool {
        self.states
            .values()
            .all(|s| matches!(s, SegmentState::Finished(_)))
    }

    /// Whether every segment except `id` has finished.
    pub fn all_finished_except(&self, id: SegmentId) -> bool {
        self.states
            .iter()
            .all(|(sid, s)| *sid == id || matches!(s, SegmentState::Finished(_)))
    }

    pub fn finished_success_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, SegmentState::Finished(SegmentOutcome::Success)))
            .count()
    }
}
