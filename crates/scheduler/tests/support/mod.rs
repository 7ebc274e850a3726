//! Shared mock collaborators for scheduler integration tests.
//!
//! The mock RPC client decodes the segment id from the opaque payload (test
//! DAGs store it as little-endian bytes) and keeps an ordered log of
//! resource sends and task submits so tests can assert dispatch ordering.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

use sgq_common::{Result, RpcHandle, SchedulerConfig, SegmentId};
use sgq_scheduler::{
    ClusterNodes, DefaultNodeSelector, EmptyResourceProducer, PlanSegment, PlanSegmentDag,
    ResourceBundle, Scheduler, SchedulerHandle, SegmentPayload, SubmittedTask, TaskOutcome,
    WorkerAddress, WorkerRpcClient,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Resources { node: String },
    Submit { segment: u64, index: u32, node: String },
}

#[derive(Default)]
struct MockInner {
    next_handle: u64,
    log: Vec<LogEntry>,
    scripts: HashMap<(u64, u32), VecDeque<TaskOutcome>>,
    held: HashSet<(u64, u32)>,
    pending: HashMap<(u64, u32), oneshot::Sender<TaskOutcome>>,
    canceled: Vec<RpcHandle>,
}

/// Scriptable in-process stand-in for the worker RPC surface.
#[derive(Default)]
pub struct MockWorkerRpc {
    inner: Mutex<MockInner>,
}

impl MockWorkerRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for successive submits of one instance; unscripted
    /// submits succeed immediately.
    pub fn script(&self, segment: u64, index: u32, outcomes: Vec<TaskOutcome>) {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.scripts.insert((segment, index), outcomes.into());
    }

    /// Keep the instance's completion pending until [`MockWorkerRpc::release`].
    pub fn hold(&self, segment: u64, index: u32) {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.held.insert((segment, index));
    }

    /// Resolve a held instance; returns false if nothing was pending.
    pub fn release(&self, segment: u64, index: u32, outcome: TaskOutcome) -> bool {
        let sender = {
            let mut inner = self.inner.lock().expect("mock lock");
            inner.pending.remove(&(segment, index))
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.inner.lock().expect("mock lock").log.clone()
    }

    pub fn submits(&self) -> Vec<(u64, u32, String)> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Submit {
                    segment,
                    index,
                    node,
                } => Some((segment, index, node)),
                _ => None,
            })
            .collect()
    }

    pub fn canceled(&self) -> Vec<RpcHandle> {
        self.inner.lock().expect("mock lock").canceled.clone()
    }
}

#[async_trait]
impl WorkerRpcClient for MockWorkerRpc {
    async fn submit_task(
        &self,
        node: &WorkerAddress,
        payload: SegmentPayload,
        parallel_index: u32,
        _deadline: Instant,
    ) -> Result<SubmittedTask> {
        let segment = u64::from_le_bytes(payload.0[..8].try_into().expect("payload segment id"));
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("mock lock");
        inner.next_handle += 1;
        let handle = RpcHandle(inner.next_handle);
        inner.log.push(LogEntry::Submit {
            segment,
            index: parallel_index,
            node: node.to_string(),
        });
        if inner.held.contains(&(segment, parallel_index)) {
            inner.pending.insert((segment, parallel_index), tx);
        } else {
            let outcome = inner
                .scripts
                .get_mut(&(segment, parallel_index))
                .and_then(|q| q.pop_front())
                .unwrap_or_else(TaskOutcome::success);
            let _ = tx.send(outcome);
        }
        Ok(SubmittedTask {
            handle,
            completion: rx,
        })
    }

    async fn send_resources(&self, node: &WorkerAddress, _bundle: ResourceBundle) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.log.push(LogEntry::Resources {
            node: node.to_string(),
        });
        Ok(())
    }

    async fn cancel_task(&self, handle: RpcHandle) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.canceled.push(handle);
        Ok(())
    }
}

/// Plan segment whose payload carries its id for the mock to decode.
pub fn seg(id: u64, parallelism: usize, inputs: &[u64]) -> PlanSegment {
    PlanSegment {
        id: SegmentId(id),
        parallelism,
        has_scan_or_value_source: inputs.is_empty(),
        inputs: inputs.iter().copied().map(SegmentId).collect(),
        payload: id.to_le_bytes().to_vec(),
    }
}

pub fn cluster(workers: u16) -> ClusterNodes {
    let remote = (0..workers)
        .map(|i| WorkerAddress::new(format!("10.0.0.{}", i + 1), 9010))
        .collect();
    ClusterNodes::new(remote, WorkerAddress::new("127.0.0.1", 9010))
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        max_execution_time_ms: 5_000,
        ..SchedulerConfig::default()
    }
}

pub fn build_scheduler(
    dag: PlanSegmentDag,
    config: SchedulerConfig,
    rpc: Arc<MockWorkerRpc>,
) -> (Scheduler, SchedulerHandle) {
    Scheduler::new(
        "q-test",
        config,
        Arc::new(dag),
        cluster(3),
        Arc::new(DefaultNodeSelector),
        rpc,
        Arc::new(EmptyResourceProducer),
    )
    .expect("scheduler")
}
