//! End-to-end tests: publisher and subscriber roles wired through the mock
//! transport, verifying the delivery-error counters the subscriber reports.

#![cfg(feature = "transport-mock")]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use mq_verify::metrics::stats::Stats;
use mq_verify::payload::generate_payload;
use mq_verify::roles::publisher::{run_publisher, PublisherConfig, SequenceErrorSimulation};
use mq_verify::roles::subscriber::{run_subscriber, SubscriberConfig};
use mq_verify::time_sync::now_unix_ns_estimate;
use mq_verify::transport::{ConnectOptions, Engine, TransportBuilder};
use mq_verify::wire::MessageProperties;

fn subscriber_config(
    expr: &str,
    stats: Arc<Stats>,
    duration_secs: Option<u64>,
    stop_at_target: bool,
) -> SubscriberConfig {
    SubscriberConfig {
        engine: Engine::Mock,
        connect: ConnectOptions::default(),
        key_expr: expr.to_string(),
        duration_secs,
        stop_at_target,
        output_file: None,
        snapshot_interval_secs: 1,
        shared_stats: Some(stats),
        disable_internal_snapshot: true,
    }
}

fn publisher_config(
    topic: &str,
    stats: Arc<Stats>,
    message_count: u64,
    simulation: SequenceErrorSimulation,
) -> PublisherConfig {
    PublisherConfig {
        engine: Engine::Mock,
        connect: ConnectOptions::default(),
        key_expr: topic.to_string(),
        payload_size: 64,
        rate: None,
        message_count: Some(message_count),
        duration_secs: None,
        output_file: None,
        snapshot_interval_secs: 1,
        shared_stats: Some(stats),
        disable_internal_snapshot: true,
        simulation,
    }
}

#[tokio::test]
async fn clean_stream_end_to_end() {
    let sub_stats = Arc::new(Stats::new());
    let sub = tokio::spawn(run_subscriber(subscriber_config(
        "e2e-clean/**",
        sub_stats.clone(),
        Some(10),
        true,
    )));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pub_stats = Arc::new(Stats::new());
    run_publisher(publisher_config(
        "e2e-clean/topic/0",
        pub_stats.clone(),
        200,
        SequenceErrorSimulation::default(),
    ))
    .await
    .expect("publisher");

    sub.await.expect("join").expect("subscriber");

    let snap = sub_stats.snapshot().await;
    assert_eq!(snap.received_count, 200);
    assert_eq!(snap.out_of_seq_count, 0);
    assert_eq!(snap.duplicate_count, 0);
    assert_eq!(snap.loss_count, 0);
    assert_eq!(pub_stats.snapshot().await.sent_count, 200);
}

#[tokio::test]
async fn simulated_loss_is_counted() {
    let sub_stats = Arc::new(Stats::new());
    let sub = tokio::spawn(run_subscriber(subscriber_config(
        "e2e-loss/**",
        sub_stats.clone(),
        Some(2),
        false,
    )));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let simulation = SequenceErrorSimulation {
        loss: true,
        out_of_order: false,
        duplicate: false,
        ratio: 0.3,
        seed: Some(42),
    };
    let pub_stats = Arc::new(Stats::new());
    run_publisher(publisher_config(
        "e2e-loss/topic/0",
        pub_stats.clone(),
        300,
        simulation,
    ))
    .await
    .expect("publisher");

    sub.await.expect("join").expect("subscriber");

    // Seed 42 at ratio 0.3 drops 89 of 300 messages, sequence 0 among them.
    // The first delivered message becomes the baseline, so the slot below it
    // goes unreported and the remaining 88 gaps are counted against the
    // advisory target at close.
    let snap = sub_stats.snapshot().await;
    assert_eq!(snap.received_count, 211);
    assert_eq!(snap.loss_count, 88);
    assert_eq!(snap.duplicate_count, 0);
    assert_eq!(snap.out_of_seq_count, 0);
}

async fn publish_stamped(topic: &str, stamps: &[(i64, i64)]) {
    let transport = TransportBuilder::connect(Engine::Mock, ConnectOptions::default())
        .await
        .expect("connect");
    let publisher = transport.create_publisher(topic).await.expect("publisher");
    for &(sequence, target) in stamps {
        let mut properties = MessageProperties::new();
        properties.set_sequence_number(sequence);
        properties.set_sequence_target_max(target);
        let payload = generate_payload(sequence as u64, now_unix_ns_estimate(), 64);
        publisher
            .publish(&properties, Bytes::from(payload))
            .await
            .expect("publish");
    }
}

#[tokio::test]
async fn hand_stamped_gap_and_duplicate_are_counted() {
    let sub_stats = Arc::new(Stats::new());
    let sub = tokio::spawn(run_subscriber(subscriber_config(
        "e2e-stamped/**",
        sub_stats.clone(),
        Some(1),
        false,
    )));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Sequence 3 is lost, 1 is duplicated, and 5..=6 never arrive.
    let stamps: Vec<(i64, i64)> = [0, 1, 1, 2, 4].iter().map(|&n| (n, 6)).collect();
    publish_stamped("e2e-stamped/topic/0", &stamps).await;

    sub.await.expect("join").expect("subscriber");

    let snap = sub_stats.snapshot().await;
    assert_eq!(snap.received_count, 5);
    assert_eq!(snap.duplicate_count, 1);
    assert_eq!(snap.loss_count, 3);
    assert_eq!(snap.out_of_seq_count, 0);
}

#[tokio::test]
async fn window_resolved_swap_stays_clean_and_stops_at_target() {
    let sub_stats = Arc::new(Stats::new());
    let sub = tokio::spawn(run_subscriber(subscriber_config(
        "e2e-swap/**",
        sub_stats.clone(),
        Some(10),
        true,
    )));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stamps: Vec<(i64, i64)> = [0, 2, 1, 3].iter().map(|&n| (n, 3)).collect();
    publish_stamped("e2e-swap/topic/0", &stamps).await;

    sub.await.expect("join").expect("subscriber");

    let snap = sub_stats.snapshot().await;
    assert_eq!(snap.received_count, 4);
    assert_eq!(snap.out_of_seq_count, 0);
    assert_eq!(snap.duplicate_count, 0);
    assert_eq!(snap.loss_count, 0);
}

#[tokio::test]
async fn topics_fan_out_to_independent_trackers() {
    let sub_stats = Arc::new(Stats::new());
    let sub = tokio::spawn(run_subscriber(subscriber_config(
        "e2e-fanout/**",
        sub_stats.clone(),
        Some(1),
        false,
    )));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Each topic restarts at 0; per-topic trackers must not see the other's
    // stream as duplication.
    publish_stamped("e2e-fanout/topic/0", &[(0, 2), (1, 2), (2, 2)]).await;
    publish_stamped("e2e-fanout/topic/1", &[(0, 2), (1, 2), (2, 2)]).await;

    sub.await.expect("join").expect("subscriber");

    let snap = sub_stats.snapshot().await;
    assert_eq!(snap.received_count, 6);
    assert_eq!(snap.out_of_seq_count, 0);
    assert_eq!(snap.duplicate_count, 0);
    assert_eq!(snap.loss_count, 0);
}
