mod config;
mod menu;

use anyhow::Context;
use blockswap_core::PeerCid;
use blockswap_network::{InboundArrival, Network};
use blockswap_store::LocalBlockStore;
use clap::Parser;
use config::{generate_config_template, Cli, NodeConfig};
use futures::StreamExt;
use menu::Menu;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        print!("{}", generate_config_template()?);
        return Ok(());
    }

    let config = NodeConfig::load(&cli)?;
    init_tracing(&config);
    info!("Blockswap node v{} starting", env!("CARGO_PKG_VERSION"));

    let local = PeerCid::for_peer_name(&config.peer_name)?;
    println!("Peer CID: {}", local);

    let store = LocalBlockStore::open(&config.storage_path)?;
    let network = Network::with_kademlia(config.network_config()?, local)
        .await
        .context("failed to start the network")?;

    // Blocks stored by a previous run are still ours to serve
    let stored = store.list().await?;
    let announced = network.directory().announce_providers(&stored).await;
    if announced < stored.len() {
        warn!(announced, stored = stored.len(), "Some stored blocks were not announced");
    } else {
        info!(announced, "Announced stored blocks");
    }

    let mut inbound = network.inbound_sessions();
    let inbound_task = tokio::spawn(async move {
        while let Some(arrival) = inbound.next().await {
            tokio::spawn(log_session(arrival));
        }
    });

    let result = Menu::new(&network, &store).run().await;

    network.stop().await;
    inbound_task.abort();
    info!("Blockswap node stopped");
    result
}

/// Log frames from one inbound session until the remote ends it
async fn log_session(InboundArrival { peer, session }: InboundArrival) {
    info!(%peer, "Peer opened a session");
    while let Some(frame) = session.recv().await {
        match frame {
            Ok(frame) => debug!(%peer, bytes = frame.len(), "Received frame"),
            Err(e) => {
                warn!(%peer, error = %e, "Session failed");
                break;
            }
        }
    }
    if let Err(e) = session.close().await {
        debug!(%peer, error = %e, "Close failed");
    }
    info!(%peer, "Peer session ended");
}

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("blockswap={}", config.log_level)))
        .unwrap_or_else(|_| EnvFilter::new("blockswap=info"));

    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}
