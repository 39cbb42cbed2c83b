//! CLI entry point: loads configuration, wires the packet engine and the
//! IPC event channel together, and runs until Ctrl-C or a UI-driven Stop.

mod config;
mod lifecycle;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use packet_engine::doh::{ReqwestTransport, Transport, UpstreamConfig};
use packet_engine::tun::{Tun, TunConfig, TunError};
use packet_engine::PacketEngine;

use config::{Cli, Config};
use lifecycle::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli)?;

    logging::init(&config.log_filter, config.log_json).context("failed to initialize logging")?;
    tracing::info!(upstream = %config.upstream_url, "starting doh-proxy");

    let http_client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let mut upstream = UpstreamConfig::new(config.upstream_url.clone(), http_client);
    upstream.headers = Arc::new(config.extra_headers.clone());
    upstream.strip_ip_headers = config.strip_ip_headers;
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(upstream));

    let engine = Arc::new(PacketEngine::new());
    let bus = lifecycle::EventBus::new();
    let callbacks = lifecycle::callbacks(bus.clone());

    let ipc_server = ipc_events::Server::new(ipc_events::SocketId::Production)
        .context("failed to bind the IPC event channel")?;
    let (command_tx, mut command_rx) = tokio::sync::mpsc::unbounded_channel();
    let ipc_task = tokio::spawn(lifecycle::run_ipc_server(ipc_server, bus, command_tx));

    start_engine(&engine, &config, transport.clone(), callbacks.clone()).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl-C, shutting down");
                break;
            }
            command = command_rx.recv() => {
                match command {
                    Some(Command::SetEnabled(true)) => {
                        start_engine(&engine, &config, transport.clone(), callbacks.clone()).await?;
                    }
                    Some(Command::SetEnabled(false)) => {
                        engine.stop().await;
                    }
                    Some(Command::Unrecognized(event)) => {
                        tracing::debug!(name = %event.name, "ignoring IPC event with no lifecycle meaning");
                    }
                    None => break, // IPC server task ended; nothing more can drive us
                }
            }
        }
    }

    engine.stop().await;
    ipc_task.abort();
    Ok(())
}

async fn start_engine(
    engine: &Arc<PacketEngine>,
    config: &Config,
    transport: Arc<dyn Transport>,
    callbacks: packet_engine::Callbacks,
) -> Result<()> {
    engine
        .start(&TunConfig::default(), open_tun, transport, config.leak_guard_exe.clone(), callbacks)
        .await
        .context("failed to start packet engine")
}

#[cfg(windows)]
fn open_tun(config: &TunConfig) -> Result<Arc<dyn Tun>, TunError> {
    use packet_engine::tun::WintunDevice;
    let device = WintunDevice::open(config)?;
    Ok(Arc::new(device))
}

/// Non-Windows builds have no real TUN backend (the product is Windows-only
/// per the design notes); a `FakeTun` with nothing pushing packets into it
/// lets the binary still start for local development and `cargo test`.
#[cfg(not(windows))]
fn open_tun(_config: &TunConfig) -> Result<Arc<dyn Tun>, TunError> {
    use packet_engine::tun::fake::FakeTun;
    let (tun, _handle) = FakeTun::new();
    Ok(Arc::new(tun))
}
