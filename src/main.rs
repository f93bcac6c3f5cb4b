use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use mq_verify::metrics::stats::Stats;
use mq_verify::output::OutputWriter;
use mq_verify::roles::publisher::{run_publisher, PublisherConfig, SequenceErrorSimulation};
use mq_verify::roles::subscriber::{run_subscriber, SubscriberConfig};
use mq_verify::transport::config::{parse_connect_kv, parse_engine};
use mq_verify::transport::Engine;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mq-verify")]
#[command(about = "Message delivery verification harness")]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Snapshot interval in seconds for periodic stats output
    #[arg(long, default_value = "1")]
    snapshot_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publisher role: stamp and send sequence-numbered messages
    Pub {
        /// Messaging engine (nats|mqtt|mock)
        #[arg(long, default_value = "nats")]
        engine: String,

        /// Engine connect options as KEY=VALUE (repeatable)
        #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
        connect: Vec<String>,

        /// Topic prefix
        #[arg(long, default_value = "verify/topic")]
        topic_prefix: String,

        /// Number of topics; one publisher per topic so each topic sees a
        /// single monotonic stream
        #[arg(long, default_value = "1")]
        topics: u32,

        /// Payload size in bytes
        #[arg(long, default_value = "1024")]
        payload: u32,

        /// Rate per publisher (msg/s). If omitted or <= 0, runs at max speed
        #[arg(long, alias = "qps", allow_hyphen_values = true)]
        rate: Option<i32>,

        /// Messages per topic. When set, messages carry the advisory maximum
        /// sequence number and publishing stops after the count
        #[arg(long)]
        messages: Option<u64>,

        /// Duration in seconds (0 = no limit)
        #[arg(long, default_value = "60")]
        duration: u32,

        /// Delivery faults to simulate, comma separated
        /// (loss,out-of-order,duplicate)
        #[arg(long)]
        simulate: Option<String>,

        /// Fraction of messages corrupted when --simulate is set
        #[arg(long, default_value = "0.1")]
        simulate_ratio: f64,

        /// RNG seed for reproducible fault patterns
        #[arg(long)]
        seed: Option<u64>,

        /// Optional CSV output file path (stdout if omitted)
        #[arg(long)]
        csv: Option<String>,

        /// Enable connection retry with exponential backoff
        #[arg(long, default_value = "false")]
        enable_retry: bool,

        /// Maximum number of connection retry attempts
        #[arg(long, default_value = "3")]
        retry_count: u32,

        /// Initial delay between retries in milliseconds
        #[arg(long, default_value = "1000")]
        retry_delay: u64,
    },
    /// Subscriber role: receive, verify sequencing, report error counters
    Sub {
        /// Messaging engine (nats|mqtt|mock)
        #[arg(long, default_value = "nats")]
        engine: String,

        /// Engine connect options as KEY=VALUE (repeatable)
        #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
        connect: Vec<String>,

        /// Key expression to subscribe to
        #[arg(long, default_value = "verify/**")]
        expr: String,

        /// Number of subscribers
        #[arg(long, default_value = "1")]
        subscribers: u32,

        /// Duration in seconds (0 = run until ctrl+c or target)
        #[arg(long, default_value = "0")]
        duration: u32,

        /// Stop once every topic confirms its advisory maximum sequence
        #[arg(long, default_value = "false")]
        stop_at_target: bool,

        /// Optional CSV output file path (stdout if omitted)
        #[arg(long)]
        csv: Option<String>,

        /// Enable connection retry with exponential backoff
        #[arg(long, default_value = "false")]
        enable_retry: bool,

        /// Maximum number of connection retry attempts
        #[arg(long, default_value = "3")]
        retry_count: u32,

        /// Initial delay between retries in milliseconds
        #[arg(long, default_value = "1000")]
        retry_delay: u64,
    },
}

/// Shared stats plus a background task writing aggregate snapshots.
struct Aggregate {
    stats: Arc<Stats>,
    stop_tx: flume::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl Aggregate {
    async fn start(csv: Option<String>, interval_secs: u64) -> Result<Self> {
        let stats = Arc::new(Stats::new());
        let mut out = match csv {
            Some(path) => OutputWriter::new_csv(path).await?,
            None => OutputWriter::new_stdout(),
        };
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let stats_clone = stats.clone();
        let handle = tokio::spawn(async move {
            let mut t = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = t.tick() => {
                        let snap = stats_clone.snapshot().await;
                        let _ = out.write_snapshot(&snap).await;
                    }
                    _ = stop_rx.recv_async() => {
                        // One last row so the sink carries the final totals.
                        let snap = stats_clone.snapshot().await;
                        let _ = out.write_snapshot(&snap).await;
                        break;
                    }
                }
            }
        });
        Ok(Self {
            stats,
            stop_tx,
            handle,
        })
    }

    async fn finish(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}

fn parse_simulation(
    simulate: Option<String>,
    ratio: f64,
    seed: Option<u64>,
) -> SequenceErrorSimulation {
    let mut sim = SequenceErrorSimulation {
        ratio,
        seed,
        ..Default::default()
    };
    if let Some(list) = simulate {
        for kind in list.split(',') {
            match kind.trim().to_ascii_lowercase().as_str() {
                "loss" => sim.loss = true,
                "out-of-order" | "out_of_order" => sim.out_of_order = true,
                "duplicate" | "dup" => sim.duplicate = true,
                "" => {}
                other => {
                    eprintln!("ignoring unknown simulation kind: {other}");
                }
            }
        }
    }
    sim
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    mq_verify::logging::init(&cli.log_level)?;

    let snapshot_interval_secs = cli.snapshot_interval;

    match cli.command {
        Commands::Pub {
            engine,
            connect,
            topic_prefix,
            topics,
            payload,
            rate,
            messages,
            duration,
            simulate,
            simulate_ratio,
            seed,
            csv,
            enable_retry,
            retry_count,
            retry_delay,
        } => {
            let engine = parse_engine(&engine).unwrap_or(Engine::Nats);
            let mut conn = parse_connect_kv(&connect);
            conn.retry_enabled = enable_retry;
            conn.retry_count = retry_count;
            conn.retry_delay_ms = retry_delay;
            conn.retry_max_delay_ms = 30000;

            let simulation = parse_simulation(simulate, simulate_ratio, seed);
            let aggregate = Aggregate::start(csv, snapshot_interval_secs).await?;

            let mut handles = Vec::new();
            for i in 0..topics.max(1) {
                let key_expr = if topics > 1 {
                    format!("{}/{}", topic_prefix, i)
                } else {
                    topic_prefix.clone()
                };
                let cfg = PublisherConfig {
                    engine: engine.clone(),
                    connect: conn.clone(),
                    key_expr,
                    payload_size: payload as usize,
                    rate: match rate {
                        Some(v) if v > 0 => Some(v as f64),
                        _ => None,
                    },
                    message_count: messages,
                    duration_secs: if duration > 0 {
                        Some(duration as u64)
                    } else {
                        None
                    },
                    output_file: None,
                    snapshot_interval_secs,
                    shared_stats: Some(aggregate.stats.clone()),
                    disable_internal_snapshot: true,
                    simulation: simulation.clone(),
                };
                handles.push(tokio::spawn(async move {
                    let _ = run_publisher(cfg).await;
                }));
            }
            let _ = join_all(handles).await;
            aggregate.finish().await;
            Ok(())
        }
        Commands::Sub {
            engine,
            connect,
            expr,
            subscribers,
            duration,
            stop_at_target,
            csv,
            enable_retry,
            retry_count,
            retry_delay,
        } => {
            let engine = parse_engine(&engine).unwrap_or(Engine::Nats);
            let mut conn = parse_connect_kv(&connect);
            conn.retry_enabled = enable_retry;
            conn.retry_count = retry_count;
            conn.retry_delay_ms = retry_delay;
            conn.retry_max_delay_ms = 30000;

            let aggregate = Aggregate::start(csv, snapshot_interval_secs).await?;

            let mut handles = Vec::new();
            for _ in 0..subscribers.max(1) {
                let cfg = SubscriberConfig {
                    engine: engine.clone(),
                    connect: conn.clone(),
                    key_expr: expr.clone(),
                    duration_secs: if duration > 0 {
                        Some(duration as u64)
                    } else {
                        None
                    },
                    stop_at_target,
                    output_file: None,
                    snapshot_interval_secs,
                    shared_stats: Some(aggregate.stats.clone()),
                    disable_internal_snapshot: true,
                };
                handles.push(tokio::spawn(async move {
                    let _ = run_subscriber(cfg).await;
                }));
            }
            let _ = join_all(handles).await;
            aggregate.finish().await;
            Ok(())
        }
    }
}
