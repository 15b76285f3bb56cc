//! Sequencing, per-lane FIFO order and counter behaviour under concurrency

mod common;

use bmp_collector::stages::{RibApplyStage, StageContext, StageWorker};
use bmp_collector::{Coordinator, EnvelopeQueue, PeerTable, RuntimeMetrics, ShutdownReason};
use bytes::Bytes;
use codec::BmpCodec;
use common::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use types::{Envelope, Sequence, Stage};

#[tokio::test]
async fn test_sequences_increase_from_resume_point() {
    let ctx = StageContext {
        queue: Arc::new(EnvelopeQueue::new(256)),
        metrics: Arc::new(RuntimeMetrics::new()),
        coordinator: Coordinator::new(),
    };
    let (report, started) = oneshot::channel();
    let worker = StageWorker::new(
        RibApplyStage::new(Arc::new(BmpCodec), Box::new(PeerTable::new()), 42),
        ctx.clone(),
        report,
    );
    let handle = tokio::spawn(worker.run());
    started.await.unwrap().unwrap();

    ctx.queue
        .enqueue(Envelope::control(Bytes::from_static(b"initiation")))
        .await
        .unwrap();
    for index in 0..10 {
        ctx.queue
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }
    // Undecodable input is dropped without consuming a sequence
    ctx.queue
        .enqueue(Envelope::inbound(Bytes::from_static(&[3, 0, 0, 0, 6, 0xff])))
        .await
        .unwrap();
    for index in 10..20 {
        ctx.queue
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }
    ctx.queue.close(Stage::RibApply);
    handle.await.unwrap().unwrap();

    let mut sequences = Vec::new();
    while let Some(envelope) = ctx.queue.dequeue(Stage::BrokerPublish).await {
        assert_eq!(envelope.stage, Stage::BrokerPublish);
        sequences.push(envelope.sequence);
    }

    assert_eq!(sequences[0], Sequence::Control);
    let assigned: Vec<_> = sequences[1..].iter().map(|s| s.assigned().unwrap()).collect();
    assert_eq!(assigned, (42..62).collect::<Vec<_>>());
    assert_eq!(ctx.metrics.decode_errors(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_lane_is_fifo_under_interleaving() {
    const PER_LANE: u32 = 500;
    let queue = Arc::new(EnvelopeQueue::new(64));

    let producers: Vec<_> = [Stage::RibApply, Stage::SecondarySend]
        .into_iter()
        .map(|stage| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for index in 0..PER_LANE {
                    let envelope = Envelope::inbound(Bytes::copy_from_slice(&index.to_be_bytes()))
                        .advance_to(stage);
                    queue.enqueue(envelope).await.unwrap();
                }
                queue.close(stage);
            })
        })
        .collect();

    let consumers: Vec<_> = [Stage::RibApply, Stage::SecondarySend]
        .into_iter()
        .map(|stage| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(envelope) = queue.dequeue(stage).await {
                    let raw = <[u8; 4]>::try_from(&envelope.payload.bytes()[..]).unwrap();
                    seen.push(u32::from_be_bytes(raw));
                }
                seen
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }
    for consumer in consumers {
        assert_eq!(consumer.await.unwrap(), (0..PER_LANE).collect::<Vec<_>>());
    }
    assert_eq!(queue.depth(), 0);
    // Only stage-0 admissions count as admitted
    assert_eq!(queue.admitted(), PER_LANE as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_updates_are_not_lost() {
    const TASKS: u64 = 8;
    const UPDATES: u64 = 1_000;
    let metrics = Arc::new(RuntimeMetrics::new());

    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            let metrics = Arc::clone(&metrics);
            tokio::spawn(async move {
                for _ in 0..UPDATES {
                    metrics.add_bytes_sent(3);
                    metrics.add_rows_processed(1);
                    metrics.record_retired();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(metrics.bytes_sent(), TASKS * UPDATES * 3);
    assert_eq!(metrics.rows_processed(), TASKS * UPDATES);
    assert_eq!(metrics.envelopes_retired(), TASKS * UPDATES);
}

#[tokio::test]
async fn test_replay_request_republishes_rib() {
    let (harness, broker, _secondary) = start_recording().await;
    let queue = harness.pipeline.queue();
    for index in 0..3 {
        queue
            .enqueue(Envelope::inbound(route_monitoring(index)))
            .await
            .unwrap();
    }
    assert!(broker.wait_for_published(4, Duration::from_secs(5)).await);

    harness.coordinator.trigger_replay();
    assert!(broker.wait_for_published(7, Duration::from_secs(5)).await);
    let records = published_records(&broker);
    let messages: Vec<_> = records
        .iter()
        .map(|published| published.record.message.clone())
        .collect();
    assert_eq!(messages[4..], messages[1..4]);
    // Replayed records get fresh sequences after the live ones
    let sequences: Vec<_> = records[1..].iter().map(|published| published.sequence).collect();
    assert_eq!(sequences, (0..6).collect::<Vec<_>>());
    assert!(records[6].record.end_of_unit);
    assert_eq!(harness.pipeline.metrics().replays(), 1);

    harness.coordinator.request_shutdown(ShutdownReason::Requested);
    harness.pipeline.run_until_shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_every_admitted_envelope_is_retired_once(count in 0u32..40) {
        let (retired, rows, forwarded) = tokio_test::block_on(async move {
            let (harness, _broker, secondary) = start_recording().await;
            for index in 0..count {
                harness
                    .pipeline
                    .queue()
                    .enqueue(Envelope::inbound(route_monitoring(index)))
                    .await
                    .unwrap();
            }
            let metrics = Arc::clone(harness.pipeline.metrics());
            harness.coordinator.request_shutdown(ShutdownReason::Requested);
            harness.pipeline.run_until_shutdown().await;
            (metrics.envelopes_retired(), metrics.rows_processed(), secondary.sent())
        });

        prop_assert_eq!(retired, count as u64 + 1);
        prop_assert_eq!(rows, count as u64);
        let expected: Vec<_> = (0..count).map(route_monitoring).collect();
        prop_assert_eq!(&forwarded[1..], &expected[..]);
    }
}
