//! Zero network engine server binary.
//!
//! Runs the engine with the demo lobby: clients log in with `{"u": name}`
//! and get every later message echoed back.

use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};
use zero_engine::ZeroEngine;
use zero_session::AssociationProcessor;
use zero_wire::Lz4Compressor;

mod config;
mod lobby;
mod logging;

use config::ServerConfig;
use lobby::Lobby;
use logging::ZeroLogFormatter;

/// Real-time multiplayer network server
#[derive(Parser, Debug)]
#[command(name = "zero-server", version, about = "Zero real-time network engine")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "zero.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Bind address, e.g. 0.0.0.0
    #[arg(long)]
    bind: Option<IpAddr>,

    /// TCP port to listen on (repeatable)
    #[arg(long = "tcp-port")]
    tcp_port: Vec<u16>,

    /// UDP port to listen on (repeatable)
    #[arg(long = "udp-port")]
    udp_port: Vec<u16>,

    /// Stats logging interval, e.g. 30s
    #[arg(long)]
    stats_interval: Option<humantime::Duration>,
}

impl Args {
    /// Command line values win over the file and the environment
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(bind) = self.bind {
            config.engine.bind_address = bind;
        }
        if !self.tcp_port.is_empty() {
            config.engine.tcp_ports = self.tcp_port.clone();
        }
        if !self.udp_port.is_empty() {
            config.engine.udp_ports = self.udp_port.clone();
        }
        if let Some(interval) = &self.stats_interval {
            config.stats_interval = interval.to_string();
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // start at the command line level; the config file may change it below
    let initial_level = args.log_level.clone().unwrap_or_else(|| "info".to_string());
    let (filter, filter_handle) = reload::Layer::new(env_filter(&initial_level)?);
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .event_format(ZeroLogFormatter::new("zero")),
        )
        .init();

    let mut config = ServerConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    if config.log_level != initial_level {
        filter_handle.reload(env_filter(&config.log_level)?)?;
    }

    info!("Starting Zero server v{}", env!("CARGO_PKG_VERSION"));

    let stats_interval = config.stats_interval()?;
    let mut builder = ZeroEngine::builder(config.engine.clone());
    if config.compression {
        info!(
            threshold = config.engine.compression_threshold,
            "LZ4 frame compression enabled"
        );
        builder = builder.compressor(Arc::new(Lz4Compressor::new(config.engine.max_frame_size)));
    }
    let mut engine = builder
        .build()
        .context("invalid engine configuration")?;

    let lobby = Arc::new(Lobby::new(engine.writer()));
    let processor = Arc::new(AssociationProcessor::new(engine.manager().clone(), lobby));
    engine.events().subscribe(processor);

    engine.start().context("failed to start engine")?;

    if let Some(interval) = stats_interval {
        let stats = engine.stats().clone();
        let manager = engine.manager().clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = stats.snapshot();
                info!(
                    sessions = manager.count(),
                    read_bytes = snapshot.read_bytes,
                    written_bytes = snapshot.written_bytes,
                    read_packets = snapshot.read_packets,
                    written_packets = snapshot.written_packets,
                    dropped = snapshot.dropped_packets(),
                    refused = snapshot.refused_connections,
                    "Traffic"
                );
            }
        });
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT signal, shutting down"),
    }

    // joins worker threads, so keep it off the async workers
    tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("shutdown task failed")?;

    info!("Zero server stopped");
    Ok(())
}

fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::new("info")
        .add_directive(format!("zero_server={}", level).parse()?)
        .add_directive(format!("zero_engine={}", level).parse()?)
        .add_directive(format!("zero_session={}", level).parse()?)
        .add_directive(format!("zero_wire={}", level).parse()?))
}
