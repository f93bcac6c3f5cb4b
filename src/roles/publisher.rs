//! Publisher role: stamps every message with a monotonic sequence number and
//! optionally corrupts its own stream to exercise the subscriber's delivery
//! verification.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::signal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::metrics::stats::Stats;
use crate::output::OutputWriter;
use crate::payload::generate_payload;
use crate::rate::RateController;
use crate::time_sync::now_unix_ns_estimate;
use crate::transport::{ConnectOptions, Engine, Transport, TransportBuilder};
use crate::wire::MessageProperties;

/// Which delivery faults the publisher fakes, and how often.
#[derive(Clone, Debug, Default)]
pub struct SequenceErrorSimulation {
    pub loss: bool,
    pub out_of_order: bool,
    pub duplicate: bool,
    /// Fraction of messages corrupted, 0.0..=1.0.
    pub ratio: f64,
    /// RNG seed for reproducible fault patterns.
    pub seed: Option<u64>,
}

impl SequenceErrorSimulation {
    pub fn is_enabled(&self) -> bool {
        self.ratio > 0.0 && (self.loss || self.out_of_order || self.duplicate)
    }
}

pub struct PublisherConfig {
    pub engine: Engine,
    pub connect: ConnectOptions,
    pub key_expr: String,
    pub payload_size: usize,
    pub rate: Option<f64>,
    /// Total messages to publish. When known, every message carries the
    /// advisory maximum so subscribers can detect tail loss and stop early.
    pub message_count: Option<u64>,
    pub duration_secs: Option<u64>,
    pub output_file: Option<String>,
    pub snapshot_interval_secs: u64,
    // Aggregation support
    pub shared_stats: Option<Arc<Stats>>,
    pub disable_internal_snapshot: bool,
    pub simulation: SequenceErrorSimulation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimulatedFault {
    None,
    Loss,
    OutOfOrder,
    Duplicate,
}

/// Decides per message whether to fake a fault, with the precedence
/// loss > out-of-order > duplication. The final message is never corrupted:
/// faking its loss would stall a subscriber waiting on the advisory target.
struct SeqErrorSimulator {
    sim: SequenceErrorSimulation,
    rng_state: u64,
}

impl SeqErrorSimulator {
    fn new(sim: SequenceErrorSimulation) -> Self {
        let seed = sim.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(12345)
        });
        Self {
            sim,
            rng_state: seed.max(1),
        }
    }

    /// Simple xorshift64 PRNG - returns value in [0, 1)
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    fn next_fault(&mut self, last_message: bool) -> SimulatedFault {
        if !self.sim.is_enabled() || last_message {
            return SimulatedFault::None;
        }
        if self.next_random() >= self.sim.ratio {
            return SimulatedFault::None;
        }
        if self.sim.loss {
            SimulatedFault::Loss
        } else if self.sim.out_of_order {
            SimulatedFault::OutOfOrder
        } else {
            SimulatedFault::Duplicate
        }
    }

    /// The sequence number actually stamped on the message for this fault.
    fn stamped_sequence(fault: SimulatedFault, sequence: u64) -> u64 {
        match fault {
            SimulatedFault::OutOfOrder => {
                if sequence > 2 {
                    sequence - 2
                } else {
                    sequence
                }
            }
            SimulatedFault::Duplicate => sequence.saturating_sub(1),
            _ => sequence,
        }
    }
}

pub async fn run_publisher(config: PublisherConfig) -> Result<()> {
    info!(
        engine = ?config.engine,
        key = %config.key_expr,
        payload_size = config.payload_size,
        rate = ?config.rate,
        messages = ?config.message_count,
        duration_secs = ?config.duration_secs,
        simulation = config.simulation.is_enabled(),
        "Starting publisher"
    );

    let stats = if let Some(s) = &config.shared_stats {
        s.clone()
    } else {
        Arc::new(Stats::new())
    };

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

    let publisher = match transport.create_publisher(&config.key_expr).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "Create publisher error");
            stats.record_error().await;
            return Ok(());
        }
    };

    let mut rate_controller = config.rate.map(RateController::new);

    // Setup output writer (only when not aggregated)
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
                        sent = snapshot.sent_count,
                        errors = snapshot.error_count,
                        rate = format!("{:.2}", snapshot.interval_throughput()),
                        "Publisher stats"
                    );
                }
            }
        }))
    } else {
        None
    };

    let mut simulator = SeqErrorSimulator::new(config.simulation.clone());
    let mut simulated_losses = 0u64;
    let mut simulated_out_of_order = 0u64;
    let mut simulated_duplicates = 0u64;

    let mut sequence = 0u64;
    let start_time = std::time::Instant::now();

    let publishing_task = async {
        loop {
            if let Some(count) = config.message_count {
                if sequence >= count {
                    info!("Message count reached, stopping publisher");
                    break;
                }
            }
            if let Some(duration) = config.duration_secs {
                if start_time.elapsed().as_secs() >= duration {
                    info!("Duration limit reached, stopping publisher");
                    break;
                }
            }

            // Wait for next scheduled send (if paced)
            if let Some(rc) = &mut rate_controller {
                rc.wait_for_next().await;
            }

            let last_message = config.message_count == Some(sequence + 1);
            let fault = simulator.next_fault(last_message);

            if fault == SimulatedFault::Loss {
                simulated_losses += 1;
                sequence += 1;
                continue;
            }

            let stamped = SeqErrorSimulator::stamped_sequence(fault, sequence);
            match fault {
                SimulatedFault::OutOfOrder => simulated_out_of_order += 1,
                SimulatedFault::Duplicate => simulated_duplicates += 1,
                _ => {}
            }

            let mut properties = MessageProperties::new();
            properties.set_sequence_number(stamped as i64);
            if let Some(count) = config.message_count {
                properties.set_sequence_target_max(count as i64 - 1);
            }
            let payload = generate_payload(stamped, now_unix_ns_estimate(), config.payload_size);

            match publisher.publish(&properties, Bytes::from(payload)).await {
                Ok(_) => {
                    stats.record_sent().await;
                    sequence += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Send error");
                    stats.record_error().await;
                }
            }
        }
    };

    tokio::select! {
        _ = publishing_task => {
            info!("Publishing completed");
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, stopping publisher");
        }
    }

    let final_stats = stats.snapshot().await;
    let total_elapsed = final_stats.total_duration.as_secs_f64();
    let avg_send_rate = if total_elapsed > 0.0 {
        final_stats.sent_count as f64 / total_elapsed
    } else {
        0.0
    };
    info!(
        sent = final_stats.sent_count,
        errors = final_stats.error_count,
        simulated_losses,
        simulated_out_of_order,
        simulated_duplicates,
        avg_rate = format!("{:.2}", avg_send_rate),
        duration = format!("{:.2}s", total_elapsed),
        "Final Publisher Statistics"
    );

    if let Some(ref mut out) = output {
        out.write_snapshot(&final_stats).await?;
    }

    if let Some(h) = snapshot_handle {
        h.abort();
    }
    publisher
        .shutdown()
        .await
        .map_err(|e| anyhow::Error::msg(format!("publisher shutdown error: {}", e)))?;
    transport
        .shutdown()
        .await
        .map_err(|e| anyhow::Error::msg(format!("transport shutdown error: {}", e)))?;

    Ok(())
}
