//! Subscriber role: receives stamped messages and feeds the per-topic
//! sequence trackers.
//!
//! Broker callbacks do no work beyond timestamping and enqueueing; a single
//! worker task drains the channel and owns all tracker mutation, so trackers
//! never need internal locking against the transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::metrics::registry::TrackerRegistry;
use crate::metrics::stats::Stats;
use crate::output::OutputWriter;
use crate::payload::parse_header;
use crate::time_sync::now_unix_ns_estimate;
use crate::transport::{
    ConnectOptions, Engine, Transport, TransportBuilder, TransportMessage,
};

pub struct SubscriberConfig {
    pub engine: Engine,
    pub connect: ConnectOptions,
    pub key_expr: String,
    pub duration_secs: Option<u64>,
    /// Stop as soon as every topic's tracker confirms its advisory target.
    pub stop_at_target: bool,
    pub output_file: Option<String>,
    pub snapshot_interval_secs: u64,
    // Aggregation/external snapshot support
    pub shared_stats: Option<Arc<Stats>>,
    pub disable_internal_snapshot: bool,
}

pub async fn run_subscriber(config: SubscriberConfig) -> Result<()> {
    info!(
        engine = ?config.engine,
        key = %config.key_expr,
        stop_at_target = config.stop_at_target,
        "Starting subscriber"
    );

    let stats = if let Some(s) = &config.shared_stats {
        s.clone()
    } else {
        Arc::new(Stats::new())
    };

    // All topics of this subscriber aggregate into the stats' error counters.
    let registry = Arc::new(TrackerRegistry::new(stats.seq_errors().clone()));

    // Setup output writer (only when not aggregated/external)
    let mut output = if let Some(ref path) = config.output_file {
        Some(OutputWriter::new_csv(path.clone()).await?)
    } else if config.shared_stats.is_none() {
        Some(OutputWriter::new_stdout())
    } else {
        None
    };

    let snapshot_handle = if !config.disable_internal_snapshot {
        let stats_clone = Arc::clone(&stats);
        let interval_secs = config.snapshot_interval_secs;
        let mut out = output.take();
        Some(tokio::spawn(async move {
            let mut interval_timer = interval(Duration::from_secs(interval_secs));
            loop {
                interval_timer.tick().await;
                let snapshot = stats_clone.snapshot().await;
                if let Some(ref mut o) = out {
                    let _ = o.write_snapshot(&snapshot).await;
                } else {
                    debug!(
                        received = snapshot.received_count,
                        out_of_seq = snapshot.out_of_seq_count,
                        duplicate = snapshot.duplicate_count,
                        loss = snapshot.loss_count,
                        rate = format!("{:.2}", snapshot.interval_throughput()),
                        "Subscriber stats"
                    );
                }
            }
        }))
    } else {
        None
    };

    // Channel + worker so the broker callback only timestamps and enqueues.
    let (tx, rx) = flume::unbounded::<(u64, TransportMessage)>();
    let (done_tx, done_rx) = flume::bounded::<()>(1);
    let stats_worker = stats.clone();
    let registry_worker = registry.clone();
    let stop_at_target = config.stop_at_target;
    let worker = tokio::spawn(async move {
        let mut buf = Vec::with_capacity(1024);
        loop {
            let first = match rx.recv_async().await {
                Ok(v) => v,
                Err(_) => break,
            };
            buf.clear();
            buf.push(first);
            // Drain a small batch without awaiting to amortize locking
            while let Ok(v) = rx.try_recv() {
                buf.push(v);
                if buf.len() >= 1024 {
                    break;
                }
            }
            let mut lats = Vec::with_capacity(buf.len());
            for (recv_ns, msg) in buf.drain(..) {
                if let Some(h) = parse_header(&msg.payload) {
                    lats.push(recv_ns.saturating_sub(h.timestamp_ns));
                }
                dispatch_sequence(&registry_worker, &msg);
            }
            stats_worker.record_received_batch(&lats).await;
            if stop_at_target && registry_worker.all_reached_target() {
                let _ = done_tx.try_send(());
            }
        }
    });

    // Connect and subscribe
    let transport: Box<dyn Transport> =
        match TransportBuilder::connect_with_retry(config.engine.clone(), config.connect.clone())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Transport connect error");
                stats.record_error().await;
                return Ok(());
            }
        };
    info!(engine = ?config.engine, "Connected via transport");

    let handler_tx = tx.clone();
    let subscription = match transport
        .subscribe(
            &config.key_expr,
            Box::new(move |msg: TransportMessage| {
                let _ = handler_tx.try_send((now_unix_ns_estimate(), msg));
            }),
        )
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Subscribe error");
            stats.record_error().await;
            return Ok(());
        }
    };
    info!(key = %config.key_expr, "Subscribed to key expression");

    // Wait for duration, target confirmation, or ctrl+c
    let duration = config
        .duration_secs
        .map(Duration::from_secs)
        .unwrap_or(Duration::MAX);
    tokio::select! {
        _ = tokio::time::sleep(duration) => {
            info!("Duration limit reached, stopping subscriber");
        }
        _ = done_rx.recv_async() => {
            info!("All topics confirmed their target sequence, stopping subscriber");
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, stopping subscriber");
        }
    }

    // Stop delivery, let the worker drain, then flush the trackers.
    let _ = subscription.shutdown().await;
    let _ = transport.shutdown().await;
    drop(tx);
    if tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .is_err()
    {
        warn!("Receive worker did not drain in time");
    }
    registry.close_all();

    let final_stats = stats.snapshot().await;
    info!(
        received = final_stats.received_count,
        topics = registry.topic_count(),
        out_of_seq = final_stats.out_of_seq_count,
        duplicate = final_stats.duplicate_count,
        loss = final_stats.loss_count,
        avg_rate = format!("{:.2}", final_stats.total_throughput()),
        p50_ms = format!("{:.2}", final_stats.latency_ns_p50 as f64 / 1_000_000.0),
        p99_ms = format!("{:.2}", final_stats.latency_ns_p99 as f64 / 1_000_000.0),
        duration = format!("{:.2}s", final_stats.total_duration.as_secs_f64()),
        "Final Subscriber Statistics"
    );

    if let Some(ref mut out) = output {
        out.write_snapshot(&final_stats).await?;
    }

    if let Some(h) = snapshot_handle {
        h.abort();
    }

    Ok(())
}

/// The consumer side of the stamp convention: a parseable `sequence_number`
/// property routes the message to its topic's tracker, anything else leaves
/// the message untracked.
fn dispatch_sequence(registry: &TrackerRegistry, msg: &TransportMessage) {
    let Some(sequence) = msg.properties.sequence_number() else {
        return;
    };
    let tracker = registry.tracker_for(&msg.topic);
    let mut tracker = tracker.lock().unwrap();
    if let Some(target) = msg.properties.sequence_target_max() {
        tracker.target_sequence_number(target);
    }
    tracker.sequence_number_received(sequence);
}
