use serde::{Deserialize, Serialize};

/// Retry behavior for task instances reporting a `Wait` status.
///
/// `Wait` means the remote side is not ready to run the instance yet
/// (resources or placement still settling); whether that implies a retry
/// is an explicit policy decision, not an inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitPolicy {
    /// Re-dispatch the same instance with its cached placement, up to
    /// `max_attempts` total dispatches, `backoff_ms` apart. Exhausted
    /// attempts escalate to failure.
    Retry {
        /// Total dispatch attempts allowed per instance (first included).
        max_attempts: u32,
        /// Delay before each re-dispatch.
        backoff_ms: u64,
    },
    /// Treat `Wait` as an immediate failure.
    EscalateImmediately,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Retry {
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

/// Scheduler behavior/configuration knobs for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatch a whole topological layer of ready segments per round
    /// instead of each segment the instant it becomes ready.
    pub batch_schedule: bool,
    /// Query execution-time budget; the expiration deadline is computed
    /// from this once at scheduler construction.
    pub max_execution_time_ms: u64,
    /// Retry behavior for `Wait` task results.
    pub wait_policy: WaitPolicy,
    /// Completion-event channel capacity.
    pub event_queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_schedule: false,
            max_execution_time_ms: 180_000,
            wait_policy: WaitPolicy::default(),
            event_queue_capacity: 1024,
        }
    }
}
