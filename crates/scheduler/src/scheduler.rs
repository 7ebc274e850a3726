//! Scheduler orchestrator: the per-query schedule loop.
//!
//! Responsibilities:
//! - build the topology once and seed the ready queue with source segments;
//! - loop: dispatch every currently-ready segment (batch or immediate),
//!   wait for at least one completion event bounded by the expiration
//!   deadline, advance dependency state;
//! - prepare the final segment against the local address and await it;
//! - fail fast on the first observed error, cancel promptly on stop or
//!   deadline expiry, and ignore late completions afterwards.
//!
//! Completion callbacks never mutate scheduling state directly: transport
//! continuations push events into one channel and this loop is the single
//! consumer, so topology mutation and enqueue-on-zero-count are serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use sgq_common::metrics::global_metrics;
use sgq_common::{Result, SchedulerConfig, SegmentId, SgqError, WaitPolicy};

use crate::cluster::{ClusterNodes, WorkerAddress};
use crate::dag::PlanSegmentDag;
use crate::dispatch::{BatchTask, SegmentTask, SegmentTaskInstance, TaskDispatcher};
use crate::event::ScheduleEvent;
use crate::rpc::{ResourceBundleProducer, TaskOutcome, TaskStatus, WorkerRpcClient};
use crate::selector::{NodeSelectorPolicy, SelectorCache, SelectorResult};
use crate::topology::build_topology;
use crate::tracker::{DependencyTracker, SegmentOutcome, SegmentState};

/// Terminal query outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Success,
    Failed,
    Canceled,
}

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Initialized,
    TopologyBuilt,
    Scheduling,
    FinalSegmentPrepared,
    Completed(QueryOutcome),
}

impl SchedulerState {
    fn as_u8(self) -> u8 {
        match self {
            SchedulerState::Initialized => 0,
            SchedulerState::TopologyBuilt => 1,
            SchedulerState::Scheduling => 2,
            SchedulerState::FinalSegmentPrepared => 3,
            SchedulerState::Completed(QueryOutcome::Success) => 4,
            SchedulerState::Completed(QueryOutcome::Failed) => 5,
            SchedulerState::Completed(QueryOutcome::Canceled) => 6,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::TopologyBuilt,
            2 => SchedulerState::Scheduling,
            3 => SchedulerState::FinalSegmentPrepared,
            4 => SchedulerState::Completed(QueryOutcome::Success),
            5 => SchedulerState::Completed(QueryOutcome::Failed),
            6 => SchedulerState::Completed(QueryOutcome::Canceled),
            _ => SchedulerState::Initialized,
        }
    }
}

#[derive(Debug)]
struct SchedulerShared {
    stopped: AtomicBool,
    state: AtomicU8,
}

impl SchedulerShared {
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Cloneable control handle for an in-flight schedule loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
    events_tx: mpsc::Sender<ScheduleEvent>,
}

impl SchedulerHandle {
    /// Request cancellation from any non-terminal state.
    ///
    /// The loop observes the stop flag before its next dispatch and unwinds
    /// without waiting on already-issued RPCs.
    pub fn stop(&self, reason: impl Into<String>) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.events_tx.try_send(ScheduleEvent::Stop {
            reason: reason.into(),
        });
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }
}

/// Execution handle for the final segment, returned by [`Scheduler::schedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentExecutionInfo {
    pub segment_id: SegmentId,
    /// The local address consuming the final segment's output.
    pub address: WorkerAddress,
    pub parallel_index: u32,
}

/// Per-query scheduler over an already-built plan-segment DAG.
pub struct Scheduler {
    query_id: String,
    config: SchedulerConfig,
    dag: Arc<PlanSegmentDag>,
    cluster: ClusterNodes,
    policy: Arc<dyn NodeSelectorPolicy>,
    selector_cache: SelectorCache,
    tracker: DependencyTracker,
    dispatcher: TaskDispatcher,
    events_tx: mpsc::Sender<ScheduleEvent>,
    events_rx: mpsc::Receiver<ScheduleEvent>,
    deadline: Instant,
    shared: Arc<SchedulerShared>,
    inflight_per_segment: HashMap<SegmentId, usize>,
    stop_reason: Option<String>,
}

impl Scheduler {
    /// Build a scheduler for one query.
    ///
    /// Derives the topology (fatal on a malformed DAG, before any dispatch),
    /// seeds the ready queue with source segments, appends the local address
    /// to the cluster as the final segment's pseudo-worker, and computes the
    /// expiration deadline from the configured execution-time budget.
    pub fn new(
        query_id: impl Into<String>,
        config: SchedulerConfig,
        dag: Arc<PlanSegmentDag>,
        mut cluster: ClusterNodes,
        policy: Arc<dyn NodeSelectorPolicy>,
        rpc: Arc<dyn WorkerRpcClient>,
        resources: Arc<dyn ResourceBundleProducer>,
    ) -> Result<(Self, SchedulerHandle)> {
        let query_id = query_id.into();
        if config.max_execution_time_ms == 0 {
            return Err(SgqError::InvalidConfig(
                "max_execution_time_ms must be positive".to_string(),
            ));
        }
        if dag.is_empty() {
            return Err(SgqError::Topology("plan has no segments".to_string()));
        }
        let shared = Arc::new(SchedulerShared {
            stopped: AtomicBool::new(false),
            state: AtomicU8::new(SchedulerState::Initialized.as_u8()),
        });

        let topology = build_topology(&dag)?;
        let final_segment = dag
            .segment(dag.final_segment_id())
            .ok_or_else(|| SgqError::Topology("final segment missing from dag".to_string()))?;
        if final_segment.parallelism == 0 {
            return Err(SgqError::Topology(
                "final segment must have at least one instance".to_string(),
            ));
        }
        let tracker = DependencyTracker::new(topology);
        shared.set_state(SchedulerState::TopologyBuilt);

        cluster.push_local_pseudo_worker();
        let deadline = Instant::now() + Duration::from_millis(config.max_execution_time_ms);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let dispatcher = TaskDispatcher::new(
            query_id.clone(),
            rpc,
            resources,
            events_tx.clone(),
            deadline,
        );
        let handle = SchedulerHandle {
            shared: Arc::clone(&shared),
            events_tx: events_tx.clone(),
        };
        info!(
            query_id = %query_id,
            segments = dag.len(),
            batch_schedule = config.batch_schedule,
            operator = "SchedulerInit",
            "topology built"
        );
        Ok((
            Self {
                query_id,
                config,
                dag,
                cluster,
                policy,
                selector_cache: SelectorCache::new(),
                tracker,
                dispatcher,
                events_tx,
                events_rx,
                deadline,
                shared,
                inflight_per_segment: HashMap::new(),
                stop_reason: None,
            },
            handle,
        ))
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Run the schedule loop to completion and return the final segment's
    /// execution handle.
    ///
    /// Source segments first, then compute segments as their dependencies
    /// resolve, the final segment last. The first observed failure wins;
    /// stop/deadline cancel the query promptly.
    pub async fn schedule(mut self) -> Result<SegmentExecutionInfo> {
        self.shared.set_state(SchedulerState::Scheduling);
        let final_id = self.dag.final_segment_id();

        loop {
            if self.shared.stopped.load(Ordering::SeqCst) {
                let reason = self.take_stop_reason();
                return self.cancel_query(false, reason).await;
            }
            if let Err(err) = self.dispatch_ready(final_id).await {
                return self.fail_query(err).await;
            }
            if self.tracker.all_finished_except(final_id)
                && self.tracker.state(final_id) == Some(SegmentState::Ready)
            {
                break;
            }
            match timeout_at(self.deadline, self.events_rx.recv()).await {
                Err(_) => {
                    return self
                        .cancel_query(true, "query expiration deadline reached".to_string())
                        .await;
                }
                Ok(None) => {
                    return self
                        .cancel_query(false, "event channel closed".to_string())
                        .await;
                }
                Ok(Some(event)) => {
                    if let Err(err) = self.handle_event(event).await {
                        return self.fail_query(err).await;
                    }
                }
            }
        }

        self.run_final_segment(final_id).await
    }

    /// Dispatch every currently-ready segment except the final one, which
    /// is held back until it is the only segment left.
    async fn dispatch_ready(&mut self, final_id: SegmentId) -> Result<()> {
        loop {
            let round_started = std::time::Instant::now();
            let ready = self.tracker.drain_ready();
            let runnable: Vec<SegmentId> =
                ready.into_iter().filter(|id| *id != final_id).collect();
            if runnable.is_empty() {
                global_metrics()
                    .set_ready_segments(&self.query_id, self.tracker.ready_len() as u64);
                return Ok(());
            }

            let mut to_dispatch = Vec::new();
            for id in runnable {
                let segment = self.dag.segment(id).ok_or_else(|| {
                    SgqError::Topology(format!("segment {id} missing from dag"))
                })?;
                if segment.parallelism == 0 {
                    // Nothing to run; the segment finishes immediately and
                    // unblocks its dependents on the next drain.
                    self.tracker.mark_dispatched(id);
                    self.finish_segment(id, true, false);
                    continue;
                }
                to_dispatch.push(id);
            }

            if self.config.batch_schedule {
                let mut round = Vec::with_capacity(to_dispatch.len());
                for id in &to_dispatch {
                    let segment = self.dag.segment(*id).ok_or_else(|| {
                        SgqError::Topology(format!("segment {id} missing from dag"))
                    })?;
                    let placement = self
                        .selector_cache
                        .resolve(self.policy.as_ref(), segment, &self.cluster)
                        .await?;
                    round.push((segment, placement));
                }
                let batch: BatchTask = round
                    .iter()
                    .map(|(segment, _)| SegmentTask::from_segment(segment))
                    .collect();
                for task in &batch {
                    self.tracker.mark_dispatched(task.segment_id);
                    self.inflight_per_segment
                        .insert(task.segment_id, task.parallelism);
                }
                if !round.is_empty() {
                    debug!(
                        query_id = %self.query_id,
                        round_size = batch.len(),
                        operator = "SchedulerDispatch",
                        "batch round assembled"
                    );
                    self.dispatcher.dispatch_batch(&round).await?;
                }
            } else {
                for id in to_dispatch {
                    let segment = self.dag.segment(id).ok_or_else(|| {
                        SgqError::Topology(format!("segment {id} missing from dag"))
                    })?;
                    let placement = self
                        .selector_cache
                        .resolve(self.policy.as_ref(), segment, &self.cluster)
                        .await?;
                    self.tracker.mark_dispatched(id);
                    self.inflight_per_segment.insert(id, segment.parallelism);
                    self.dispatcher.dispatch_segment(segment, &placement).await?;
                }
            }
            global_metrics().observe_round(&self.query_id, round_started.elapsed().as_secs_f64());
        }
    }

    async fn handle_event(&mut self, event: ScheduleEvent) -> Result<()> {
        match event {
            ScheduleEvent::Stop { reason } => {
                self.shared.stopped.store(true, Ordering::SeqCst);
                self.stop_reason = Some(reason);
                Ok(())
            }
            ScheduleEvent::RetryInstance { instance } => self.redispatch_instance(instance).await,
            ScheduleEvent::TaskFinished { instance, outcome } => {
                self.on_task_finished(instance, outcome).await
            }
        }
    }

    /// Completion handler for one task instance's terminal outcome.
    async fn on_task_finished(
        &mut self,
        instance: SegmentTaskInstance,
        outcome: TaskOutcome,
    ) -> Result<()> {
        self.dispatcher.on_instance_resolved(&instance);
        let segment_id = instance.segment_id;
        match self.tracker.state(segment_id) {
            None | Some(SegmentState::Finished(_)) => {
                // Completion arrived after the segment was finalized
                // (cancellation or duplicate report): no-op.
                debug!(
                    query_id = %self.query_id,
                    segment_id = %segment_id,
                    parallel_index = instance.parallel_index,
                    operator = "SchedulerEvent",
                    "ignoring late completion for finalized segment"
                );
                return Ok(());
            }
            _ => {}
        }
        match outcome.status {
            TaskStatus::Success => {
                let remaining = match self.inflight_per_segment.get_mut(&segment_id) {
                    Some(count) => {
                        *count = count.saturating_sub(1);
                        *count
                    }
                    None => 0,
                };
                debug!(
                    query_id = %self.query_id,
                    segment_id = %segment_id,
                    parallel_index = instance.parallel_index,
                    remaining,
                    operator = "SchedulerEvent",
                    "task instance succeeded"
                );
                if remaining == 0 {
                    self.finish_segment(segment_id, true, false);
                }
                Ok(())
            }
            TaskStatus::Wait => self.handle_wait(instance).await,
            TaskStatus::Fail | TaskStatus::Unknown => {
                let detail = outcome
                    .error
                    .unwrap_or_else(|| "unspecified remote failure".to_string());
                self.finish_segment(segment_id, false, false);
                Err(SgqError::Execution(format!(
                    "segment {segment_id} instance {} failed: {detail}",
                    instance.parallel_index
                )))
            }
        }
    }

    /// `Wait` handling per the configured policy; retries reuse the
    /// segment's cached placement.
    async fn handle_wait(&mut self, instance: SegmentTaskInstance) -> Result<()> {
        let segment_id = instance.segment_id;
        match self.config.wait_policy {
            WaitPolicy::EscalateImmediately => {
                self.finish_segment(segment_id, false, false);
                Err(SgqError::Execution(format!(
                    "segment {segment_id} instance {} reported wait; policy escalates immediately",
                    instance.parallel_index
                )))
            }
            WaitPolicy::Retry {
                max_attempts,
                backoff_ms,
            } => {
                let attempts = self.dispatcher.attempts(&instance);
                if attempts >= max_attempts {
                    self.finish_segment(segment_id, false, false);
                    return Err(SgqError::Execution(format!(
                        "segment {segment_id} instance {} still waiting after {attempts} attempt(s)",
                        instance.parallel_index
                    )));
                }
                global_metrics().inc_retries(&self.query_id, segment_id.0);
                warn!(
                    query_id = %self.query_id,
                    segment_id = %segment_id,
                    parallel_index = instance.parallel_index,
                    attempts,
                    operator = "SchedulerRetry",
                    "task instance waiting; retry scheduled"
                );
                let events_tx = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    let _ = events_tx
                        .send(ScheduleEvent::RetryInstance { instance })
                        .await;
                });
                Ok(())
            }
        }
    }

    async fn redispatch_instance(&mut self, instance: SegmentTaskInstance) -> Result<()> {
        // The segment may have failed or been canceled while the backoff ran.
        if self.tracker.state(instance.segment_id) != Some(SegmentState::Dispatched) {
            return Ok(());
        }
        if self.dispatcher.is_outstanding(&instance) {
            return Ok(());
        }
        let placement = self
            .selector_cache
            .get(instance.segment_id)
            .await
            .ok_or_else(|| {
                SgqError::Selection(format!(
                    "no cached placement for segment {}",
                    instance.segment_id
                ))
            })?;
        let segment = self.dag.segment(instance.segment_id).ok_or_else(|| {
            SgqError::Topology(format!("segment {} missing from dag", instance.segment_id))
        })?;
        self.dispatcher
            .submit_instance(segment, &placement, instance.parallel_index)
            .await
    }

    fn finish_segment(&mut self, id: SegmentId, succeeded: bool, canceled: bool) {
        let outcome = if succeeded {
            "success"
        } else if canceled {
            "canceled"
        } else {
            "failed"
        };
        let newly_ready = self.tracker.on_segment_finished(id, succeeded, canceled);
        global_metrics().inc_segments_finished(&self.query_id, outcome);
        debug!(
            query_id = %self.query_id,
            segment_id = %id,
            outcome,
            unblocked = newly_ready.len(),
            operator = "SchedulerAdvance",
            "segment finished"
        );
    }

    /// Bind the final segment to the local address and await its result.
    async fn run_final_segment(&mut self, final_id: SegmentId) -> Result<SegmentExecutionInfo> {
        self.shared.set_state(SchedulerState::FinalSegmentPrepared);
        let local = self.cluster.local.clone();
        let segment = match self.dag.segment(final_id) {
            Some(segment) => segment.clone(),
            None => {
                return self
                    .fail_query(SgqError::Topology(format!(
                        "segment {final_id} missing from dag"
                    )))
                    .await;
            }
        };
        let placement = SelectorResult {
            addresses: vec![local.clone(); segment.parallelism],
        };
        self.selector_cache.pin(final_id, placement.clone()).await;
        self.tracker.mark_dispatched(final_id);
        self.inflight_per_segment
            .insert(final_id, segment.parallelism);
        info!(
            query_id = %self.query_id,
            segment_id = %final_id,
            address = %local,
            operator = "SchedulerFinal",
            "final segment bound to local address"
        );
        if let Err(err) = self.dispatcher.dispatch_segment(&segment, &placement).await {
            return self.fail_query(err).await;
        }

        loop {
            if self.shared.stopped.load(Ordering::SeqCst) {
                let reason = self.take_stop_reason();
                return self.cancel_query(false, reason).await;
            }
            if self.tracker.state(final_id)
                == Some(SegmentState::Finished(SegmentOutcome::Success))
            {
                break;
            }
            match timeout_at(self.deadline, self.events_rx.recv()).await {
                Err(_) => {
                    return self
                        .cancel_query(true, "query expiration deadline reached".to_string())
                        .await;
                }
                Ok(None) => {
                    return self
                        .cancel_query(false, "event channel closed".to_string())
                        .await;
                }
                Ok(Some(event)) => {
                    if let Err(err) = self.handle_event(event).await {
                        return self.fail_query(err).await;
                    }
                }
            }
        }

        self.shared
            .set_state(SchedulerState::Completed(QueryOutcome::Success));
        info!(
            query_id = %self.query_id,
            segments = self.dag.len(),
            operator = "SchedulerFinal",
            "query finished"
        );
        Ok(SegmentExecutionInfo {
            segment_id: final_id,
            address: local,
            parallel_index: 0,
        })
    }

    /// First-failure path: cancel outstanding tasks, drain in-flight
    /// completions until they resolve or the deadline passes, finalize every
    /// remaining segment, and surface the first error with a report of how
    /// many segments had finished.
    async fn fail_query(&mut self, err: SgqError) -> Result<SegmentExecutionInfo> {
        let completed = self.tracker.finished_success_count();
        warn!(
            query_id = %self.query_id,
            error = %err,
            completed_segments = completed,
            operator = "SchedulerFail",
            "query failed; canceling outstanding tasks"
        );
        self.dispatcher.cancel_outstanding();
        self.drain_outstanding().await;
        self.tracker.cancel_unfinished();
        self.shared
            .set_state(SchedulerState::Completed(QueryOutcome::Failed));
        Err(match err {
            SgqError::Execution(msg) => SgqError::Execution(format!(
                "{msg} ({completed} segment(s) finished before failure)"
            )),
            other => other,
        })
    }

    /// Cancellation path for stop requests and deadline expiry.
    ///
    /// Unwinds promptly: cancels are fire-and-forget and late completions
    /// are dropped with the event channel instead of touching finalized
    /// state.
    async fn cancel_query(
        &mut self,
        timed_out: bool,
        reason: String,
    ) -> Result<SegmentExecutionInfo> {
        let canceled_segments = self.tracker.cancel_unfinished();
        let cancels_issued = self.dispatcher.cancel_outstanding();
        info!(
            query_id = %self.query_id,
            timed_out,
            canceled_segments,
            cancels_issued,
            reason = %reason,
            operator = "SchedulerCancel",
            "query canceled"
        );
        self.shared
            .set_state(SchedulerState::Completed(QueryOutcome::Canceled));
        Err(SgqError::Canceled { timed_out, reason })
    }

    /// Consume completion events until no instance is outstanding or the
    /// deadline passes, ignoring their statuses.
    async fn drain_outstanding(&mut self) {
        while self.dispatcher.outstanding_len() > 0 {
            match timeout_at(self.deadline, self.events_rx.recv()).await {
                Ok(Some(ScheduleEvent::TaskFinished { instance, .. })) => {
                    self.dispatcher.on_instance_resolved(&instance);
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn take_stop_reason(&mut self) -> String {
        self.stop_reason
            .take()
            .unwrap_or_else(|| "stop requested".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{QueryOutcome, SchedulerState};

    #[test]
    fn state_round_trips_through_atomic_encoding() {
        let states = [
            SchedulerState::Initialized,
            SchedulerState::TopologyBuilt,
            SchedulerState::Scheduling,
            SchedulerState::FinalSegmentPrepared,
            SchedulerState::Completed(QueryOutcome::Success),
            SchedulerState::Completed(QueryOutcome::Failed),
            SchedulerState::Completed(QueryOutcome::Canceled),
        ];
        for state in states {
            assert_eq!(SchedulerState::from_u8(state.as_u8()), state);
        }
    }
}
