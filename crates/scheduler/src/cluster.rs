//! Cluster membership types supplied by the caller.
//!
//! The scheduler receives the current worker set once per query and appends a
//! distinguished local address usable as a pseudo-worker for the final
//! segment. Membership is read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of one worker node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular remote worker.
    Remote,
    /// The coordinator-local address acting as a pseudo-worker.
    Local,
}

/// One cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub address: WorkerAddress,
    pub kind: NodeKind,
}

/// Cluster snapshot for one query: remote workers plus the local address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNodes {
    pub all_workers: Vec<ClusterNode>,
    pub local: WorkerAddress,
}

impl ClusterNodes {
    pub fn new(remote_workers: Vec<WorkerAddress>, local: WorkerAddress) -> Self {
        Self {
            all_workers: remote_workers
                .into_iter()
                .map(|address| ClusterNode {
                    address,
                    kind: NodeKind::Remote,
                })
                .collect(),
            local,
        }
    }

    /// Addresses of remote workers, in membership order.
    pub fn remote_workers(&self) -> Vec<&WorkerAddress> {
        self.all_workers
            .iter()
            .filter(|n| n.kind == NodeKind::Remote)
            .map(|n| &n.address)
            .collect()
    }

    /// Appends the local address as a pseudo-worker; done once at scheduler
    /// construction so the final segment has a dispatch target.
    pub(crate) fn push_local_pseudo_worker(&mut self) {
        let local = self.local.clone();
        if !self
            .all_workers
            .iter()
            .any(|n| n.kind == NodeKind::Local && n.address == local)
        {
            self.all_workers.push(ClusterNode {
                address: local,
                kind: NodeKind::Local,
            });
        }
    }
}
