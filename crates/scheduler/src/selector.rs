//! Node selection: mapping a segment to the worker address(es) that will run
//! its instances.
//!
//! Policy internals are pluggable; the scheduler only relies on two contract
//! points: the result covers the segment's instance count, and re-resolution
//! for an already-selected segment returns the cached result unchanged so
//! sibling instances and retries agree on placement.

use std::collections::HashMap;

use tokio::sync::Mutex;

use sgq_common::{Result, SegmentId, SgqError};

use crate::cluster::{ClusterNodes, WorkerAddress};
use crate::dag::PlanSegment;

/// Resolved placement for one segment: one address per parallel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorResult {
    pub addresses: Vec<WorkerAddress>,
}

/// Placement policy contract.
///
/// Must be deterministic for a given cluster snapshot and segment; the
/// scheduler caches the first result per segment and never recomputes.
pub trait NodeSelectorPolicy: Send + Sync {
    fn select(&self, segment: &PlanSegment, cluster: &ClusterNodes) -> Result<SelectorResult>;
}

/// Default placement policy.
///
/// Source segments (table-scan/constant-value) spread instances across the
/// remote workers round-robin, offset by segment id so distinct segments
/// start at distinct workers. Non-source segments place every instance on
/// one shared worker picked by segment id, so co-located instances agree on
/// topology-sensitive state.
#[derive(Debug, Default, Clone)]
pub struct DefaultNodeSelector;

impl NodeSelectorPolicy for DefaultNodeSelector {
    fn select(&self, segment: &PlanSegment, cluster: &ClusterNodes) -> Result<SelectorResult> {
        if segment.parallelism == 0 {
            return Ok(SelectorResult {
                addresses: Vec::new(),
            });
        }
        let workers = cluster.remote_workers();
        if workers.is_empty() {
            return Err(SgqError::Selection(format!(
                "no remote workers available for segment {}",
                segment.id
            )));
        }
        let offset = segment.id.0 as usize % workers.len();
        let addresses = if segment.has_scan_or_value_source {
            (0..segment.parallelism)
                .map(|i| workers[(offset + i) % workers.len()].clone())
                .collect()
        } else {
            vec![workers[offset].clone(); segment.parallelism]
        };
        Ok(SelectorResult { addresses })
    }
}

/// Per-segment compute-once placement cache.
///
/// The mutex is the synchronization point: concurrent resolution for the
/// same segment serializes and observes one shared result; resolution for
/// different segments contends only for the map insert.
#[derive(Debug, Default)]
pub struct SelectorCache {
    results: Mutex<HashMap<SegmentId, SelectorResult>>,
}

impl SelectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve placement for `segment`, computing at most once.
    ///
    /// A result shorter than the segment's instance count is a fatal
    /// configuration error; nothing for the segment has been issued yet.
    pub async fn resolve(
        &self,
        policy: &dyn NodeSelectorPolicy,
        segment: &PlanSegment,
        cluster: &ClusterNodes,
    ) -> Result<SelectorResult> {
        let mut results = self.results.lock().await;
        if let Some(cached) = results.get(&segment.id) {
            return Ok(cached.clone());
        }
        let result = policy.select(segment, cluster)?;
        if result.addresses.len() < segment.parallelism {
            return Err(SgqError::Selection(format!(
                "selector returned {} address(es) for segment {} requiring {} instance(s)",
                result.addresses.len(),
                segment.id,
                segment.parallelism
            )));
        }
        results.insert(segment.id, result.clone());
        Ok(result)
    }

    /// Pin an explicit placement, bypassing the policy.
    ///
    /// Used for the final segment, which is bound to the local address
    /// rather than a remote worker.
    pub async fn pin(&self, segment_id: SegmentId, result: SelectorResult) {
        self.results.lock().await.insert(segment_id, result);
    }

    pub async fn get(&self, segment_id: SegmentId) -> Option<SelectorResult> {
        self.results.lock().await.get(&segment_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{DefaultNodeSelector, NodeSelectorPolicy, SelectorCache, SelectorResult};
    use crate::cluster::{ClusterNodes, WorkerAddress};
    use crate::dag::PlanSegment;
    use sgq_common::{SegmentId, SgqError};

    fn cluster(n: u16) -> ClusterNodes {
        let remote = (0..n)
            .map(|i| WorkerAddress::new(format!("10.0.0.{}", i + 1), 9010))
            .collect();
        ClusterNodes::new(remote, WorkerAddress::new("127.0.0.1", 9010))
    }

    fn segment(id: u64, parallelism: usize, source: bool) -> PlanSegment {
        PlanSegment {
            id: SegmentId(id),
            parallelism,
            has_scan_or_value_source: source,
            inputs: Vec::new(),
            payload: Vec::new(),
        }
    }

    #[test]
    fn source_segments_spread_across_workers() {
        let cluster = cluster(3);
        let result = DefaultNodeSelector
            .select(&segment(0, 3, true), &cluster)
            .expect("select");
        let hosts: Vec<_> = result.addresses.iter().map(|a| a.host.clone()).collect();
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn non_source_segments_share_one_worker() {
        let cluster = cluster(3);
        let result = DefaultNodeSelector
            .select(&segment(4, 3, false), &cluster)
            .expect("select");
        assert!(result.addresses.iter().all(|a| a.host == "10.0.0.2"));
        assert_eq!(result.addresses.len(), 3);
    }

    #[test]
    fn selection_is_deterministic() {
        let cluster = cluster(5);
        let seg = segment(7, 4, true);
        let a = DefaultNodeSelector.select(&seg, &cluster).expect("first");
        let b = DefaultNodeSelector.select(&seg, &cluster).expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_cluster_is_a_selection_error() {
        let cluster = cluster(0);
        let err = DefaultNodeSelector
            .select(&segment(0, 1, true), &cluster)
            .expect_err("no workers");
        assert!(matches!(err, SgqError::Selection(_)));
    }

    #[tokio::test]
    async fn cache_returns_identical_results_across_calls() {
        let cache = SelectorCache::new();
        let cluster = cluster(3);
        let seg = segment(2, 2, true);
        let first = cache
            .resolve(&DefaultNodeSelector, &seg, &cluster)
            .await
            .expect("first");
        let second = cache
            .resolve(&DefaultNodeSelector, &seg, &cluster)
            .await
            .expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cache_rejects_short_results() {
        struct ShortSelector;
        impl NodeSelectorPolicy for ShortSelector {
            fn select(
                &self,
                _segment: &PlanSegment,
                cluster: &ClusterNodes,
            ) -> sgq_common::Result<SelectorResult> {
                Ok(SelectorResult {
                    addresses: vec![cluster.local.clone()],
                })
            }
        }
        let cache = SelectorCache::new();
        let cluster = cluster(2);
        let err = cache
            .resolve(&ShortSelector, &segment(0, 3, true), &cluster)
            .await
            .expect_err("short result");
        assert!(matches!(err, SgqError::Selection(_)));
    }

    #[tokio::test]
    async fn pinned_placement_wins_over_policy() {
        let cache = SelectorCache::new();
        let cluster = cluster(3);
        let seg = segment(1, 1, false);
        let local = SelectorResult {
            addresses: vec![cluster.local.clone()],
        };
        cache.pin(seg.id, local.clone()).await;
        let resolved = cache
            .resolve(&DefaultNodeSelector, &seg, &cluster)
            .await
            .expect("resolve");
        assert_eq!(resolved, local);
    }
}
