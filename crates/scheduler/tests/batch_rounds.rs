//! Batched dispatch: a topological layer shares one resource-preparation
//! pass before any of its task RPCs is issued.

use std::sync::Arc;

use sgq_common::{SchedulerConfig, SegmentId};
use sgq_scheduler::{PlanSegmentDag, QueryOutcome, SchedulerState};

#[path = "support/mod.rs"]
mod support;

use support::{build_scheduler, seg, test_config, LogEntry, MockWorkerRpc};

fn five_source_dag() -> PlanSegmentDag {
    // Five single-instance sources all feeding the final segment.
    PlanSegmentDag::new(
        vec![
            seg(0, 1, &[]),
            seg(1, 1, &[]),
            seg(2, 1, &[]),
            seg(3, 1, &[]),
            seg(4, 1, &[]),
            seg(5, 1, &[0, 1, 2, 3, 4]),
        ],
        SegmentId(5),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_mode_prepares_whole_round_before_any_submit() {
    let rpc = MockWorkerRpc::new();
    let config = SchedulerConfig {
        batch_schedule: true,
        ..test_config()
    };
    let (scheduler, handle) = build_scheduler(five_source_dag(), config, Arc::clone(&rpc));
    scheduler.schedule().await.expect("schedule");
    assert_eq!(
        handle.state(),
        SchedulerState::Completed(QueryOutcome::Success)
    );

    let log = rpc.log();
    // One resource round covering all five sources precedes all five submits.
    assert!(
        log[..5]
            .iter()
            .all(|e| matches!(e, LogEntry::Resources { .. })),
        "expected five resource sends first, got: {log:?}"
    );
    let round_submits: Vec<u64> = log[5..10]
        .iter()
        .map(|e| match e {
            LogEntry::Submit { segment, .. } => *segment,
            other => panic!("expected submit, got: {other:?}"),
        })
        .collect();
    let mut sorted = round_submits.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_mode_dispatches_each_segment_as_it_becomes_ready() {
    let rpc = MockWorkerRpc::new();
    let (scheduler, _handle) =
        build_scheduler(five_source_dag(), test_config(), Arc::clone(&rpc));
    scheduler.schedule().await.expect("schedule");

    // Each source's submit directly follows its own resource delivery.
    let log = rpc.log();
    for pair in log[..10].chunks(2) {
        assert!(matches!(pair[0], LogEntry::Resources { .. }), "got: {log:?}");
        assert!(matches!(pair[1], LogEntry::Submit { .. }), "got: {log:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_mode_still_schedules_downstream_layers() {
    // Two sources feed two joins feeding the final segment; three rounds.
    let dag = PlanSegmentDag::new(
        vec![
            seg(0, 1, &[]),
            seg(1, 1, &[]),
            seg(2, 1, &[0, 1]),
            seg(3, 1, &[0, 1]),
            seg(4, 1, &[2, 3]),
        ],
        SegmentId(4),
    );
    let rpc = MockWorkerRpc::new();
    let config = SchedulerConfig {
        batch_schedule: true,
        ..test_config()
    };
    let (scheduler, _handle) = build_scheduler(dag, config, Arc::clone(&rpc));
    let info = scheduler.schedule().await.expect("schedule");
    assert_eq!(info.segment_id, SegmentId(4));

    let submits = rpc.submits();
    let pos = |segment: u64| {
        submits
            .iter()
            .position(|(s, _, _)| *s == segment)
            .unwrap_or_else(|| panic!("segment {segment} never submitted"))
    };
    assert!(pos(0) < pos(2) && pos(1) < pos(2));
    assert!(pos(0) < pos(3) && pos(1) < pos(3));
    assert!(pos(2) < pos(4) && pos(3) < pos(4));
}
