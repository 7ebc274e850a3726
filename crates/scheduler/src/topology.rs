//! Topology derivation for a plan-segment DAG.
//!
//! For every edge `producer -> consumer` the builder records `consumer` in
//! `producer`'s dependent set and counts `consumer`'s remaining dependencies.
//! Runs once per query; a malformed DAG is fatal before any dispatch.

use std::collections::{HashMap, HashSet};

use sgq_common::{Result, SegmentId, SgqError};

use crate::dag::PlanSegmentDag;

/// Dependency relation among plan segments derived from the query's DAG.
#[derive(Debug, Clone)]
pub struct Topology {
    /// segment -> segments that consume its output.
    pub dependents: HashMap<SegmentId, HashSet<SegmentId>>,
    /// segment -> number of distinct upstream segments it waits for.
    pub dependency_count: HashMap<SegmentId, usize>,
    /// Segments with no upstream dependency, in DAG order.
    pub sources: Vec<SegmentId>,
}

pub fn build_topology(dag: &PlanSegmentDag) -> Result<Topology> {
    let mut known = HashSet::with_capacity(dag.len());
    for segment in dag.segments() {
        if !known.insert(segment.id) {
            return Err(SgqError::Topology(format!(
                "duplicate segment id {}",
                segment.id
            )));
        }
    }
    if !known.contains(&dag.final_segment_id()) {
        return Err(SgqError::Topology(format!(
            "final segment {} not present in dag",
            dag.final_segment_id()
        )));
    }

    let mut dependents: HashMap<SegmentId, HashSet<SegmentId>> =
        HashMap::with_capacity(dag.len());
    let mut dependency_count: HashMap<SegmentId, usize> = HashMap::with_capacity(dag.len());
    for segment in dag.segments() {
        dependents.entry(segment.id).or_default();
        let mut distinct_inputs = HashSet::new();
        for input in &segment.inputs {
            if !known.contains(input) {
                return Err(SgqError::Topology(format!(
                    "segment {} references unknown input segment {input}",
                    segment.id
                )));
            }
            if *input == segment.id {
                return Err(SgqError::Topology(format!(
                    "segment {} depends on itself",
                    segment.id
                )));
            }
            if distinct_inputs.insert(*input) {
                dependents.entry(*input).or_default().insert(segment.id);
            }
        }
        dependency_count.insert(segment.id, distinct_inputs.len());
    }

    let sources = dag
        .segments()
        .iter()
        .filter(|s| dependency_count.get(&s.id).copied().unwrap_or(0) == 0)
        .map(|s| s.id)
        .collect();

    Ok(Topology {
        dependents,
        dependency_count,
        sources,
    })
}
