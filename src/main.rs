//! hwmon: stream live host metrics to WebSocket clients
//!
//! Examples:
//!   hwmon                                  # binds to 0.0.0.0:8080, endpoint /ws
//!   hwmon --bind 127.0.0.1:9000            # custom address
//!   hwmon --interval-ms 500 --drop-when-full
//!
//! Connect with any WebSocket client:
//!   websocat ws://localhost:8080/ws

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use hwmon_rs::sampler::{HostMetrics, Sampler, SamplerConfig};
use hwmon_rs::{BroadcastServer, OverflowPolicy, RegistryConfig, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "hwmon", version, about = "Stream live host metrics to WebSocket clients")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// WebSocket endpoint path
    #[arg(long, default_value = "/ws")]
    path: String,

    /// Milliseconds between samples
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Pending payloads buffered per client
    #[arg(long, default_value_t = 10)]
    mailbox_capacity: usize,

    /// Milliseconds a single write may take before the client is dropped
    #[arg(long, default_value_t = 1000)]
    write_timeout_ms: u64,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,

    /// Drop updates for a client whose buffer is full instead of waiting
    #[arg(long)]
    drop_when_full: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hwmon_rs=info".parse()?)
                .add_directive("hwmon=info".parse()?),
        )
        .init();

    let config = ServerConfig::default()
        .bind(args.bind)
        .path(args.path)
        .max_connections(args.max_connections)
        .write_deadline(Duration::from_millis(args.write_timeout_ms));

    let overflow = if args.drop_when_full {
        OverflowPolicy::DropNewest
    } else {
        OverflowPolicy::Block
    };
    let registry_config = RegistryConfig::default()
        .mailbox_capacity(args.mailbox_capacity)
        .overflow(overflow);

    let server = Arc::new(BroadcastServer::with_registry_config(config, registry_config));

    let sampler_config = SamplerConfig::default().interval(Duration::from_millis(args.interval_ms));
    let sampler = Sampler::new(HostMetrics::new(), sampler_config).spawn(&server);

    tracing::info!("Starting system monitor");

    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    sampler.abort();

    let stats = server.stats();
    tracing::info!(
        connections = stats.total_connections,
        broadcasts = stats.broadcasts,
        payloads_sent = stats.payloads_sent,
        payloads_dropped = stats.payloads_dropped,
        uptime_secs = stats.uptime.as_secs(),
        "Stopped"
    );

    result?;
    Ok(())
}
