#![allow(dead_code)]

use blockswap_core::PeerCid;
use blockswap_network::{
    DirectoryConfig, MemoryRecordStore, Network, NetworkConfig, RecordStore,
};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any single step of a test
pub const STEP: Duration = Duration::from_secs(10);

pub fn peer(name: &str) -> PeerCid {
    PeerCid::for_peer_name(name).unwrap()
}

/// Loopback config advertising whatever port gets bound
pub fn local_config() -> NetworkConfig {
    NetworkConfig::new()
        .with_listen_address("127.0.0.1:0".parse().unwrap())
        .with_connect_address("127.0.0.1", 0)
        .with_directory(DirectoryConfig {
            announce_attempts: 3,
            announce_backoff: Duration::from_millis(5),
        })
}

/// Route library logs to the test harness; `RUST_LOG` raises the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("blockswap_network=warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn start_node(records: &MemoryRecordStore, name: &str) -> Network {
    init_tracing();
    let store: Arc<dyn RecordStore> = Arc::new(records.clone());
    Network::start(local_config(), peer(name), store).await.unwrap()
}

pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(STEP, future)
        .await
        .expect("test step timed out")
}
