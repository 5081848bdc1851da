//! Replica dedicated server
//!
//! Usage: `replica-server [path/to/serveroptions.txt]`

use anyhow::Context;
use replica_config::{ServerOptions, DEFAULT_OPTIONS_PATH};
use replica_network::Network;
use replica_session::BasicSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_OPTIONS_PATH.to_string());
    let loaded = ServerOptions::load_from_file(&path);
    let options = loaded.as_ref().cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(options.verbosity.level_filter().into()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match loaded {
        Ok(_) => info!("Loaded options from {}", path),
        Err(e) => {
            warn!("Failed to load {}: {}", path, e);
            warn!("Using default options");
        }
    }

    options.validate().context("invalid server options")?;
    options.display();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrl_c(running.clone())?;

    let session = Arc::new(BasicSession::new());
    let network = Network::new(options.network_config(), session).context("failed to create network")?;
    let addr = network
        .start_dedicated(options.bind_address(), options.slots)
        .context("failed to start dedicated server")?;
    info!("{} listening on {} with {} slots", options.name, addr, options.slots);

    let tick = options.tick_interval();
    let mut last_stats = Instant::now();
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();

        if let Err(e) = network.update_frame() {
            error!("Frame update failed: {}", e);
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            if let Some(stats) = network.stats() {
                info!(
                    "{}/{} players, {} bytes sent, {} bytes received",
                    stats.connections, stats.slots, stats.total_bytes_sent, stats.total_bytes_received
                );
            }
            last_stats = Instant::now();
        }

        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    info!("Shutting down");
    network.stop();
    Ok(())
}

/// Clear `running` on Ctrl-C
fn install_ctrl_c(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("replica-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
                info!("Ctrl-C received");
                running.store(false, Ordering::SeqCst);
            })
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}
