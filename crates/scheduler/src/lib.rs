//! Distributed plan-segment scheduler core for the segquery engine.
//!
//! Architecture role:
//! - derives the dependency topology from a caller-built plan-segment DAG;
//! - tracks per-segment readiness and dispatches task instances to worker
//!   nodes through an abstract RPC client, resources first;
//! - reacts to asynchronous completion/failure/timeouts until the final
//!   segment resolves, the query fails, or it is canceled.
//!
//! Key modules:
//! - [`dag`] — read-only plan-segment DAG consumed by the scheduler
//! - [`topology`] — dependency-map derivation
//! - [`cluster`] — worker membership and the local pseudo-worker
//! - [`selector`] — placement policy contract and per-segment result cache
//! - [`rpc`] — collaborator contracts (worker RPC client, resource bundles)
//! - [`tracker`] — ready queue / dependency tracker state machine
//! - [`dispatch`] — task-instance dispatch, immediate and batched
//! - [`scheduler`] — the per-query orchestrator loop

pub mod cluster;
pub mod dag;
pub mod dispatch;
mod event;
pub mod rpc;
pub mod scheduler;
pub mod selector;
pub mod topology;
pub mod tracker;

pub use cluster::{ClusterNode, ClusterNodes, NodeKind, WorkerAddress};
pub use dag::{PlanSegment, PlanSegmentDag};
pub use dispatch::{BatchTask, SegmentTask, SegmentTaskInstance};
pub use rpc::{
    EmptyResourceProducer, ResourceBundle, ResourceBundleProducer, SegmentPayload, SubmittedTask,
    TaskOutcome, TaskStatus, WorkerRpcClient,
};
pub use scheduler::{
    QueryOutcome, Scheduler, SchedulerHandle, SchedulerState, SegmentExecutionInfo,
};
pub use selector::{DefaultNodeSelector, NodeSelectorPolicy, SelectorCache, SelectorResult};
pub use topology::{build_topology, Topology};
pub use tracker::{DependencyTracker, SegmentOutcome, SegmentState};
