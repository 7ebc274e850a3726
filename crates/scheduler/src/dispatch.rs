//! Task dispatch: turning ready segments into issued task instances.
//!
//! Responsibilities:
//! - bind each parallel index of a segment to its resolved address;
//! - deliver resource bundles to target nodes before their tasks, once per
//!   `(segment, node)` pair;
//! - issue task RPCs non-blocking, registering a completion forwarder that
//!   pushes the terminal outcome into the schedule-event channel;
//! - batch mode: one resource pass over a whole round, then all submits.
//!
//! No lock is held here; the dispatcher is only driven by the schedule loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use sgq_common::metrics::global_metrics;
use sgq_common::{Result, RpcHandle, SegmentId, SgqError};

use crate::cluster::WorkerAddress;
use crate::dag::PlanSegment;
use crate::event::ScheduleEvent;
use crate::rpc::{ResourceBundleProducer, SegmentPayload, TaskOutcome, WorkerRpcClient};
use crate::selector::SelectorResult;

/// One parallel execution slice of a plan segment bound to one node.
///
/// No two live instances share the same pair within a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentTaskInstance {
    pub segment_id: SegmentId,
    pub parallel_index: u32,
}

/// A ready segment queued for dispatch in a scheduling round.
#[derive(Debug, Clone)]
pub struct SegmentTask {
    pub segment_id: SegmentId,
    pub parallelism: usize,
    pub has_scan_or_value_source: bool,
}

impl SegmentTask {
    pub fn from_segment(segment: &PlanSegment) -> Self {
        Self {
            segment_id: segment.id,
            parallelism: segment.parallelism,
            has_scan_or_value_source: segment.has_scan_or_value_source,
        }
    }
}

/// Tasks scheduled together in the same round.
pub type BatchTask = Vec<SegmentTask>;

pub(crate) struct TaskDispatcher {
    query_id: String,
    rpc: Arc<dyn WorkerRpcClient>,
    resources: Arc<dyn ResourceBundleProducer>,
    events_tx: mpsc::Sender<ScheduleEvent>,
    deadline: Instant,
    sent_resources: HashSet<(SegmentId, WorkerAddress)>,
    outstanding: HashMap<SegmentTaskInstance, RpcHandle>,
    attempts: HashMap<SegmentTaskInstance, u32>,
}

impl TaskDispatcher {
    pub(crate) fn new(
        query_id: String,
        rpc: Arc<dyn WorkerRpcClient>,
        resources: Arc<dyn ResourceBundleProducer>,
        events_tx: mpsc::Sender<ScheduleEvent>,
        deadline: Instant,
    ) -> Self {
        Self {
            query_id,
            rpc,
            resources,
            events_tx,
            deadline,
            sent_resources: HashSet::new(),
            outstanding: HashMap::new(),
            attempts: HashMap::new(),
        }
    }

    pub(crate) fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub(crate) fn is_outstanding(&self, instance: &SegmentTaskInstance) -> bool {
        self.outstanding.contains_key(instance)
    }

    pub(crate) fn attempts(&self, instance: &SegmentTaskInstance) -> u32 {
        self.attempts.get(instance).copied().unwrap_or(0)
    }

    /// Forget an instance once its terminal outcome has been recorded.
    pub(crate) fn on_instance_resolved(&mut self, instance: &SegmentTaskInstance) {
        self.outstanding.remove(instance);
        global_metrics().set_inflight_tasks(&self.query_id, self.outstanding.len() as u64);
    }

    /// Dispatch one ready segment: resource delivery first, then every
    /// parallel instance.
    pub(crate) async fn dispatch_segment(
        &mut self,
        segment: &PlanSegment,
        placement: &SelectorResult,
    ) -> Result<()> {
        self.send_segment_resources(segment, placement).await?;
        self.submit_instances(segment, placement).await
    }

    /// Batched round: one resource-preparation pass covering every
    /// `(segment, node)` pair of the round, then all task submits.
    pub(crate) async fn dispatch_batch(
        &mut self,
        round: &[(&PlanSegment, SelectorResult)],
    ) -> Result<()> {
        for (segment, placement) in round {
            self.send_segment_resources(segment, placement).await?;
        }
        for (segment, placement) in round {
            self.submit_instances(segment, placement).await?;
        }
        Ok(())
    }

    async fn send_segment_resources(
        &mut self,
        segment: &PlanSegment,
        placement: &SelectorResult,
    ) -> Result<()> {
        let mut targets: Vec<WorkerAddress> = Vec::new();
        for node in placement.addresses.iter().take(segment.parallelism) {
            if !targets.contains(node) && !self.sent_resources.contains(&(segment.id, node.clone()))
            {
                targets.push(node.clone());
            }
        }
        for node in targets {
            let bundle = self.resources.bundle_for(segment, &node)?;
            self.rpc.send_resources(&node, bundle).await?;
            global_metrics().inc_resource_sends(&self.query_id, &node.to_string());
            debug!(
                query_id = %self.query_id,
                segment_id = %segment.id,
                worker = %node,
                operator = "SchedulerSendResources",
                "resource bundle delivered"
            );
            self.sent_resources.insert((segment.id, node));
        }
        Ok(())
    }

    async fn submit_instances(
        &mut self,
        segment: &PlanSegment,
        placement: &SelectorResult,
    ) -> Result<()> {
        for parallel_index in 0..segment.parallelism as u32 {
            let instance = SegmentTaskInstance {
                segment_id: segment.id,
                parallel_index,
            };
            if self.outstanding.contains_key(&instance) {
                warn!(
                    query_id = %self.query_id,
                    segment_id = %segment.id,
                    parallel_index,
                    operator = "SchedulerDispatch",
                    "instance already outstanding; skipping duplicate dispatch"
                );
                continue;
            }
            self.submit_instance(segment, placement, parallel_index)
                .await?;
        }
        Ok(())
    }

    /// Issue one task instance. Also used for `Wait` re-dispatch, which
    /// reuses the segment's cached placement.
    pub(crate) async fn submit_instance(
        &mut self,
        segment: &PlanSegment,
        placement: &SelectorResult,
        parallel_index: u32,
    ) -> Result<()> {
        let node = placement
            .addresses
            .get(parallel_index as usize)
            .ok_or_else(|| {
                SgqError::Selection(format!(
                    "no address for segment {} instance {parallel_index}",
                    segment.id
                ))
            })?;
        let submitted = self
            .rpc
            .submit_task(
                node,
                SegmentPayload(segment.payload.clone()),
                parallel_index,
                self.deadline,
            )
            .await?;
        let instance = SegmentTaskInstance {
            segment_id: segment.id,
            parallel_index,
        };
        *self.attempts.entry(instance).or_insert(0) += 1;
        self.outstanding.insert(instance, submitted.handle);
        global_metrics().inc_dispatched_tasks(&self.query_id, segment.id.0, 1);
        global_metrics().set_inflight_tasks(&self.query_id, self.outstanding.len() as u64);
        debug!(
            query_id = %self.query_id,
            segment_id = %segment.id,
            parallel_index,
            worker = %node,
            handle = %submitted.handle,
            operator = "SchedulerDispatch",
            "task instance issued"
        );

        let events_tx = self.events_tx.clone();
        let completion = submitted.completion;
        tokio::spawn(async move {
            let outcome = match completion.await {
                Ok(outcome) => outcome,
                Err(_) => TaskOutcome::fail("completion channel closed by transport"),
            };
            // The receiver may be gone after cancellation; late outcomes
            // are dropped here instead of touching scheduler state.
            let _ = events_tx
                .send(ScheduleEvent::TaskFinished { instance, outcome })
                .await;
        });
        Ok(())
    }

    /// Best-effort cancellation of every outstanding task RPC.
    ///
    /// Fire-and-forget: cancellation is cooperative and must not block the
    /// schedule loop on already-issued calls.
    pub(crate) fn cancel_outstanding(&self) -> usize {
        let mut issued = 0;
        for handle in self.outstanding.values().copied() {
            let rpc = Arc::clone(&self.rpc);
            global_metrics().inc_cancels_issued(&self.query_id);
            tokio::spawn(async move {
                let _ = rpc.cancel_task(handle).await;
            });
            issued += 1;
        }
        issued
    }
}
