//! Typed identifiers shared across scheduler components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable plan-segment identifier within a query DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle identifying one issued task RPC, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcHandle(
    /// Raw numeric handle value, assigned by the RPC client.
    pub u64,
);

impl fmt::Display for RpcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
