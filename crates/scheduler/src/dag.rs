//! Read-only plan-segment DAG consumed by the scheduler.
//!
//! The DAG is built by the planner and handed to the scheduler fully formed;
//! the scheduler only reads segment properties and edges. Edges are expressed
//! as each segment's `inputs` (its upstream producers).

use serde::{Deserialize, Serialize};
use sgq_common::SegmentId;

/// One sub-plan of a distributed query, the unit of dependency tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSegment {
    /// Stable segment identifier within the query DAG.
    pub id: SegmentId,
    /// Degree of intra-segment parallelism (task instance count).
    pub parallelism: usize,
    /// Whether the segment contains a table-scan or constant-value source.
    ///
    /// Affects placement: source segments are spread across workers, other
    /// segments share one worker for all their instances.
    pub has_scan_or_value_source: bool,
    /// Upstream producer segments this segment consumes.
    pub inputs: Vec<SegmentId>,
    /// Serialized sub-plan fragment shipped to workers. Opaque to the scheduler.
    pub payload: Vec<u8>,
}

/// The caller-built DAG of plan segments for one query.
///
/// The designated final segment is the terminal segment whose output is
/// consumed locally rather than by another remote segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSegmentDag {
    segments: Vec<PlanSegment>,
    final_segment_id: SegmentId,
}

impl PlanSegmentDag {
    pub fn new(segments: Vec<PlanSegment>, final_segment_id: SegmentId) -> Self {
        Self {
            segments,
            final_segment_id,
        }
    }

    pub fn segments(&self) -> &[PlanSegment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&PlanSegment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn final_segment_id(&self) -> SegmentId {
        self.final_segment_id
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
