//! Collaborator contracts the scheduling core depends on.
//!
//! Implementations live outside this crate: the scheduler never constructs
//! RPC requests, touches wire encoding, or manages connections. It issues
//! tasks and resource bundles through [`WorkerRpcClient`] and receives each
//! task's terminal outcome through a oneshot continuation resolved exactly
//! once by the transport.

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

use sgq_common::{Result, RpcHandle};

use crate::cluster::WorkerAddress;
use crate::dag::PlanSegment;

/// Terminal status observed for one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not yet observed.
    Unknown,
    Success,
    Fail,
    /// Resource/placement not ready on the remote side; retriable per policy.
    Wait,
}

/// Terminal result delivered once per submitted task instance.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// Error detail for `Fail` outcomes.
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Fail,
            error: Some(error.into()),
        }
    }

    pub fn wait() -> Self {
        Self {
            status: TaskStatus::Wait,
            error: None,
        }
    }
}

/// Serialized sub-plan fragment shipped with a task instance. Opaque bytes.
#[derive(Debug, Clone, Default)]
pub struct SegmentPayload(pub Vec<u8>);

/// Serialized resources a worker needs before executing a query's tasks
/// (data locality info, created-table definitions, assigned parts). Opaque.
#[derive(Debug, Clone, Default)]
pub struct ResourceBundle(pub Vec<u8>);

/// A task RPC that has been issued: an opaque handle usable for cancellation
/// plus the completion continuation. The transport resolves `completion`
/// exactly once with the terminal [`TaskOutcome`]; a dropped sender is
/// treated as a transport failure by the scheduler.
#[derive(Debug)]
pub struct SubmittedTask {
    pub handle: RpcHandle,
    pub completion: oneshot::Receiver<TaskOutcome>,
}

/// Abstract worker RPC surface.
///
/// All calls are bounded by the query's expiration deadline; `submit_task`
/// returns as soon as the task is issued, not when it finishes.
#[async_trait]
pub trait WorkerRpcClient: Send + Sync {
    /// Issue one parallel slice of a segment to `node`.
    async fn submit_task(
        &self,
        node: &WorkerAddress,
        payload: SegmentPayload,
        parallel_index: u32,
        deadline: Instant,
    ) -> Result<SubmittedTask>;

    /// Deliver `bundle` to `node`; resolves once the worker acknowledges
    /// receipt. Tasks for that node must not be issued before the ack.
    async fn send_resources(&self, node: &WorkerAddress, bundle: ResourceBundle) -> Result<()>;

    /// Best-effort cancellation of an issued task. Cooperative: the remote
    /// task may still run to completion; its late outcome is ignored.
    async fn cancel_task(&self, handle: RpcHandle) -> Result<()>;
}

/// Produces the resource bundle a given segment needs on a given node.
pub trait ResourceBundleProducer: Send + Sync {
    fn bundle_for(&self, segment: &PlanSegment, node: &WorkerAddress) -> Result<ResourceBundle>;
}

/// Producer for segments that need nothing beyond their payload.
#[derive(Debug, Default, Clone)]
pub struct EmptyResourceProducer;

impl ResourceBundleProducer for EmptyResourceProducer {
    fn bundle_for(&self, _segment: &PlanSegment, _node: &WorkerAddress) -> Result<ResourceBundle> {
        Ok(ResourceBundle::default())
    }
}
