//! Events driving the schedule loop.
//!
//! Completion forwarders and the stop handle push events into one channel;
//! the loop is the single consumer, which serializes every dependency-state
//! mutation.

use crate::dispatch::SegmentTaskInstance;
use crate::rpc::TaskOutcome;

#[derive(Debug)]
pub(crate) enum ScheduleEvent {
    /// A task instance reached a terminal RPC outcome.
    TaskFinished {
        instance: SegmentTaskInstance,
        outcome: TaskOutcome,
    },
    /// A `Wait` backoff elapsed; re-dispatch the instance.
    RetryInstance { instance: SegmentTaskInstance },
    /// External stop request.
    Stop { reason: String },
}
