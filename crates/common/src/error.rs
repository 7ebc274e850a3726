use thiserror::Error;

/// Canonical segquery error taxonomy used across crates.
///
/// Classification guidance:
/// - [`SgqError::Topology`]: malformed plan-segment DAG discovered before any dispatch
/// - [`SgqError::Selection`]: node placement could not satisfy a segment's instance count
/// - [`SgqError::InvalidConfig`]: settings/cluster contract violations
/// - [`SgqError::Dispatch`]: transport-layer submit/send failures
/// - [`SgqError::Execution`]: a remote task instance reported failure
/// - [`SgqError::Canceled`]: the query was stopped, either explicitly or by
///   hitting its execution-time budget (`timed_out`)
#[derive(Debug, Error)]
pub enum SgqError {
    /// Malformed plan-segment DAG.
    ///
    /// Examples:
    /// - an edge references an unknown segment id
    /// - duplicate segment ids
    /// - the designated final segment does not exist
    #[error("invalid plan topology: {0}")]
    Topology(String),

    /// Node selection could not cover a segment's parallel instances.
    ///
    /// Examples:
    /// - selector returned fewer addresses than the instance count
    /// - no remote workers available for a source segment
    #[error("node selection failed: {0}")]
    Selection(String),

    /// Invalid or inconsistent configuration state.
    ///
    /// Examples:
    /// - zero execution-time budget
    /// - empty cluster membership
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The RPC client could not issue a submit/resource-send call.
    ///
    /// Surfaced identically to remote execution failure by the scheduler;
    /// retry policy lives with the transport collaborator.
    #[error("task dispatch failed: {0}")]
    Dispatch(String),

    /// A remote task instance reported a terminal failure.
    #[error("remote execution failed: {0}")]
    Execution(String),

    /// The query was canceled before completion.
    ///
    /// `timed_out` distinguishes expiration-deadline cancellation from an
    /// explicit external stop request.
    #[error("query canceled (timed_out={timed_out}): {reason}")]
    Canceled {
        /// Set when cancellation was driven by the expiration deadline.
        timed_out: bool,
        /// Human-readable cancellation reason.
        reason: String,
    },
}

impl SgqError {
    /// Whether this error is a cancellation (explicit or timed out).
    pub fn is_canceled(&self) -> bool {
        matches!(self, SgqError::Canceled { .. })
    }

    /// Whether this error is a deadline-expiration cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SgqError::Canceled { timed_out: true, .. })
    }
}

/// Standard segquery result alias.
pub type Result<T> = std::result::Result<T, SgqError>;
