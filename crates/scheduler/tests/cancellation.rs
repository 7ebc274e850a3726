//! Cancellation paths: expiration deadline, explicit stop, and ignored
//! late completions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sgq_common::{SchedulerConfig, SegmentId, SgqError};
use sgq_scheduler::{PlanSegmentDag, QueryOutcome, SchedulerState, TaskOutcome};

#[path = "support/mod.rs"]
mod support;

use support::{build_scheduler, seg, test_config, MockWorkerRpc};

fn three_source_dag() -> PlanSegmentDag {
    PlanSegmentDag::new(
        vec![
            seg(0, 1, &[]),
            seg(1, 1, &[]),
            seg(2, 1, &[]),
            seg(3, 1, &[0, 1, 2]),
        ],
        SegmentId(3),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_expiry_cancels_outstanding_instances() {
    let rpc = MockWorkerRpc::new();
    // Segment 0 completes; 1 and 2 stay outstanding past the deadline.
    rpc.hold(1, 0);
    rpc.hold(2, 0);
    let config = SchedulerConfig {
        max_execution_time_ms: 300,
        ..test_config()
    };
    let (scheduler, handle) = build_scheduler(three_source_dag(), config, Arc::clone(&rpc));

    let err = scheduler.schedule().await.expect_err("must cancel");
    match err {
        SgqError::Canceled { timed_out, .. } => assert!(timed_out),
        other => panic!("expected cancellation, got: {other}"),
    }
    assert_eq!(
        handle.state(),
        SchedulerState::Completed(QueryOutcome::Canceled)
    );
    // Both outstanding instances received a best-effort cancel signal.
    assert_eq!(rpc.canceled().len(), 2);

    // Late completions for canceled instances are ignored.
    assert!(rpc.release(1, 0, TaskOutcome::success()));
    assert!(rpc.release(2, 0, TaskOutcome::fail("too late")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        handle.state(),
        SchedulerState::Completed(QueryOutcome::Canceled)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn explicit_stop_unwinds_promptly_without_waiting_on_rpcs() {
    let rpc = MockWorkerRpc::new();
    rpc.hold(0, 0);
    rpc.hold(1, 0);
    let dag = PlanSegmentDag::new(
        vec![seg(0, 1, &[]), seg(1, 1, &[]), seg(2, 1, &[0, 1])],
        SegmentId(2),
    );
    // Deadline far away; the stop request must not wait for it.
    let config = SchedulerConfig {
        max_execution_time_ms: 60_000,
        ..test_config()
    };
    let (scheduler, handle) = build_scheduler(dag, config, Arc::clone(&rpc));

    let started = Instant::now();
    let join = tokio::spawn(scheduler.schedule());
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop("user canceled");

    let err = join
        .await
        .expect("join")
        .expect_err("must cancel");
    match err {
        SgqError::Canceled { timed_out, reason } => {
            assert!(!timed_out);
            assert!(reason.contains("user canceled"), "got: {reason}");
        }
        other => panic!("expected cancellation, got: {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        handle.state(),
        SchedulerState::Completed(QueryOutcome::Canceled)
    );
    assert_eq!(rpc.canceled().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_during_final_segment_cancels() {
    let rpc = MockWorkerRpc::new();
    // Source finishes; the final segment stays outstanding until stopped.
    rpc.hold(1, 0);
    let dag = PlanSegmentDag::new(vec![seg(0, 1, &[]), seg(1, 1, &[0])], SegmentId(1));
    let config = SchedulerConfig {
        max_execution_time_ms: 60_000,
        ..test_config()
    };
    let (scheduler, handle) = build_scheduler(dag, config, Arc::clone(&rpc));

    let join = tokio::spawn(scheduler.schedule());
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop("shutdown");

    let err = join.await.expect("join").expect_err("must cancel");
    assert!(matches!(err, SgqError::Canceled { timed_out: false, .. }));
    assert_eq!(
        handle.state(),
        SchedulerState::Completed(QueryOutcome::Canceled)
    );
}
