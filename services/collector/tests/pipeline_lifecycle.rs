//! Bootstrap, steady-state and shutdown behaviour of a full pipeline

mod common;

use bmp_collector::{CollectorError, ShutdownOutcome, ShutdownReason};
use codec::{encode_initiation, RouterIdentity};
use common::*;
use message_sink::test_utils::{FlakySink, RecordingSink};
use state_store::{FileStateStore, MemoryStateStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use types::session::{CHECKPOINT_KEY, FLAG_CLEAR, FLAG_SET, READY_KEY, STARTED_KEY};
use types::{Envelope, MessageKind, Sequence};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_fresh_store_marks_started_then_ready() {
    let store = Arc::new(JournalStore::default());
    let broker = Arc::new(RecordingSink::new());
    let harness = start(
        store.clone(),
        broker.clone(),
        Arc::new(RecordingSink::new()),
        config(),
    )
    .await
    .unwrap();

    let lifecycle: Vec<_> = store
        .writes()
        .into_iter()
        .filter(|(key, _)| key.as_slice() != CHECKPOINT_KEY)
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            (STARTED_KEY.to_vec(), FLAG_SET.to_vec()),
            (READY_KEY.to_vec(), FLAG_CLEAR.to_vec()),
            (READY_KEY.to_vec(), FLAG_SET.to_vec()),
        ]
    );
    assert!(harness.pipeline.metrics().is_ready());
    assert_eq!(harness.pipeline.metrics().active_workers(), 4);

    // Exactly one control envelope went through, carrying the Initiation
    assert!(broker.wait_for_published(1, WAIT).await);
    let initiation = encode_initiation(&RouterIdentity::from_host(IDENTITY_HOST));
    assert_eq!(broker.published_count(), 1);
    assert_eq!(broker.published()[0].0, "bmp.raw");
    let control = &published_records(&broker)[0];
    assert_eq!(control.sequence, Sequence::CONTROL_SENTINEL);
    assert_eq!(control.record.kind, MessageKind::Initiation);
    assert_eq!(control.record.message, initiation);
    assert_eq!(harness.pipeline.queue().admitted(), 1);

    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    harness.pipeline.run_until_shutdown().await;
}

#[tokio::test]
async fn test_corrupted_state_aborts_before_any_work() {
    let store = Arc::new(JournalStore::seeded(&[
        (STARTED_KEY, FLAG_SET),
        (READY_KEY, FLAG_CLEAR),
    ]));
    let broker = Arc::new(RecordingSink::new());

    let result = start(
        store.clone(),
        broker.clone(),
        Arc::new(RecordingSink::new()),
        config(),
    )
    .await;

    match result {
        Err(err @ CollectorError::CorruptedState { .. }) => assert!(err.needs_operator()),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("corrupted state must abort startup"),
    }
    assert!(store.writes().is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.published_count(), 0);
}

#[tokio::test]
async fn test_sentinel_is_first_at_every_sink() {
    let (harness, broker, secondary) = start_recording().await;
    for index in 0..10 {
        harness
            .pipeline
            .queue()
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }

    assert!(broker.wait_for_published(11, WAIT).await);
    assert!(secondary.wait_for_sent(11, WAIT).await);

    let initiation = encode_initiation(&RouterIdentity::from_host(IDENTITY_HOST));
    let records = published_records(&broker);
    assert_eq!(records[0].record.message, initiation);
    assert_eq!(secondary.sent()[0], initiation);
    let sequences: Vec<_> = records[1..].iter().map(|published| published.sequence).collect();
    assert_eq!(sequences, (0..10).collect::<Vec<_>>());
    let forwarded: Vec<_> = secondary.sent()[1..].to_vec();
    let expected: Vec<_> = (0..10).map(route_monitoring).collect();
    assert_eq!(forwarded, expected);

    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    harness.pipeline.run_until_shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_envelopes() {
    let broker = Arc::new(RecordingSink::with_delay(Duration::from_millis(1)));
    let secondary = Arc::new(RecordingSink::new());
    let harness = start(
        Arc::new(MemoryStateStore::new()),
        broker.clone(),
        secondary.clone(),
        config(),
    )
    .await
    .unwrap();

    let queue = Arc::clone(harness.pipeline.queue());
    let metrics = Arc::clone(harness.pipeline.metrics());
    for index in 0..100 {
        queue
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }
    harness.coordinator.request_shutdown(ShutdownReason::Signal("SIGTERM"));

    let outcome = harness.pipeline.run_until_shutdown().await;

    assert_eq!(
        outcome,
        ShutdownOutcome::Drained {
            checkpoint: Sequence::Assigned(99)
        }
    );
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(harness.session.last_checkpoint(), Sequence::Assigned(99));
    assert_eq!(metrics.envelopes_retired(), 101);
    assert_eq!(metrics.rows_processed(), 100);
    assert_eq!(metrics.active_workers(), 0);
    assert_eq!(queue.depth(), 0);
    assert_eq!(secondary.sent_count(), 101);

    // Admission stays closed after shutdown
    assert!(queue
        .enqueue(Envelope::inbound(route_monitoring(100)))
        .await
        .is_err());
}

#[tokio::test]
async fn test_load_beyond_capacity_keeps_flowing() {
    const MESSAGES: u32 = 200;
    let broker = Arc::new(RecordingSink::new());
    let secondary = Arc::new(RecordingSink::new());
    let harness = start(
        Arc::new(MemoryStateStore::new()),
        broker.clone(),
        secondary.clone(),
        bmp_collector::PipelineConfig {
            queue_capacity: 4,
            ..config()
        },
    )
    .await
    .unwrap();
    assert_eq!(harness.pipeline.queue().lane_capacity(), 1);

    let queue = Arc::clone(harness.pipeline.queue());
    let producer = tokio::spawn(async move {
        for index in 0..MESSAGES {
            queue
                .enqueue(Envelope::inbound(route_monitoring(index)))
                .await
                .unwrap();
        }
    });

    assert!(broker.wait_for_published(MESSAGES as usize + 1, WAIT).await);
    tokio::time::timeout(WAIT, producer).await.unwrap().unwrap();
    assert!(secondary.wait_for_sent(MESSAGES as usize + 1, WAIT).await);

    let metrics = Arc::clone(harness.pipeline.metrics());
    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    let outcome = harness.pipeline.run_until_shutdown().await;

    assert_eq!(
        outcome,
        ShutdownOutcome::Drained {
            checkpoint: Sequence::Assigned(MESSAGES as u64 - 1)
        }
    );
    assert_eq!(metrics.envelopes_retired(), MESSAGES as u64 + 1);
}

#[tokio::test]
async fn test_end_of_rib_checkpoints_while_running() {
    let (harness, broker, _secondary) = start_recording().await;
    let queue = harness.pipeline.queue();
    queue
        .enqueue(Envelope::inbound(route_monitoring(0)))
        .await
        .unwrap();
    queue.enqueue(Envelope::inbound(end_of_rib())).await.unwrap();

    assert!(broker.wait_for_published(3, WAIT).await);
    let session = harness.session.clone();
    assert!(eventually(WAIT, || session.last_checkpoint() == Sequence::Assigned(1)).await);

    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    harness.pipeline.run_until_shutdown().await;
}

#[tokio::test]
async fn test_transient_sink_failures_are_retried() {
    let broker = Arc::new(FlakySink::failing(3));
    let secondary = Arc::new(FlakySink::failing(2));
    let harness = start(
        Arc::new(MemoryStateStore::new()),
        broker.clone(),
        secondary.clone(),
        config(),
    )
    .await
    .unwrap();

    for index in 0..5 {
        harness
            .pipeline
            .queue()
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }
    assert!(secondary.inner().wait_for_sent(6, WAIT).await);
    assert_eq!(broker.inner().published_count(), 6);
    assert_eq!(harness.pipeline.metrics().sink_retries(), 5);

    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    let outcome = harness.pipeline.run_until_shutdown().await;
    assert!(matches!(outcome, ShutdownOutcome::Drained { .. }));
}

#[tokio::test]
async fn test_permanent_sink_failure_escalates_to_shutdown() {
    let harness = start(
        Arc::new(MemoryStateStore::new()),
        Arc::new(FlakySink::fatal()),
        Arc::new(RecordingSink::new()),
        config(),
    )
    .await
    .unwrap();
    let coordinator = harness.coordinator.clone();
    let metrics = Arc::clone(harness.pipeline.metrics());

    // The sentinel alone is enough to hit the failing broker
    let outcome = tokio::time::timeout(WAIT, harness.pipeline.run_until_shutdown())
        .await
        .unwrap();

    assert!(matches!(outcome, ShutdownOutcome::Drained { .. }));
    assert!(matches!(
        coordinator.shutdown_reason(),
        Some(ShutdownReason::Fatal(_))
    ));
    assert_eq!(metrics.active_workers(), 0);
    assert_eq!(metrics.envelopes_retired(), 0);
}

#[tokio::test]
async fn test_stuck_sink_forces_cancel_after_drain_timeout() {
    let broker = Arc::new(RecordingSink::with_delay(Duration::from_secs(60)));
    let harness = start(
        Arc::new(MemoryStateStore::new()),
        broker,
        Arc::new(RecordingSink::new()),
        bmp_collector::PipelineConfig {
            drain_timeout: Duration::from_millis(100),
            ..config()
        },
    )
    .await
    .unwrap();
    for index in 0..3 {
        harness
            .pipeline
            .queue()
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }
    let metrics = Arc::clone(harness.pipeline.metrics());
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.coordinator.request_shutdown(ShutdownReason::Requested);

    let outcome = harness.pipeline.run_until_shutdown().await;

    assert_eq!(outcome, ShutdownOutcome::Forced { remaining: 3 });
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(metrics.active_workers(), 0);
}

#[tokio::test]
async fn test_clean_restart_resumes_after_checkpoint() {
    let dir = TempDir::new().unwrap();
    let open = || -> Arc<dyn StateStore> { Arc::new(FileStateStore::open(dir.path()).unwrap()) };

    {
        let broker = Arc::new(RecordingSink::new());
        let harness = start(open(), broker.clone(), Arc::new(RecordingSink::new()), config())
            .await
            .unwrap();
        for index in 0..4 {
            harness
                .pipeline
                .queue()
                .enqueue(Envelope::inbound(route_monitoring(index)))
                .await
                .unwrap();
        }
        assert!(broker.wait_for_published(5, WAIT).await);
        harness.coordinator.request_shutdown(ShutdownReason::Requested);
        let outcome = harness.pipeline.run_until_shutdown().await;
        assert_eq!(
            outcome,
            ShutdownOutcome::Drained {
                checkpoint: Sequence::Assigned(3)
            }
        );
    }

    let harness = start(
        open(),
        Arc::new(RecordingSink::new()),
        Arc::new(RecordingSink::new()),
        config(),
    )
    .await
    .unwrap();
    harness
        .pipeline
        .queue()
        .enqueue(Envelope::inbound(end_of_rib()))
        .await
        .unwrap();
    let session = harness.session.clone();
    assert!(eventually(WAIT, || session.last_checkpoint() == Sequence::Assigned(4)).await);

    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    harness.pipeline.run_until_shutdown().await;
}
