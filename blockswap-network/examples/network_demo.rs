use blockswap_core::{BlockId, PeerCid};
use blockswap_network::{MemoryRecordStore, Network, NetworkConfig};
use futures::StreamExt;
use std::sync::Arc;

fn local_config() -> NetworkConfig {
    NetworkConfig::new()
        .with_listen_address("127.0.0.1:0".parse().unwrap())
        .with_connect_address("127.0.0.1", 0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Blockswap Network Demo");
    println!("======================");

    // 1. Peer identities
    println!("1. Deriving peer identities...");
    let alice_id = PeerCid::for_peer_name("alice")?;
    let bob_id = PeerCid::for_peer_name("bob")?;
    println!("   alice: {}", alice_id);
    println!("   bob:   {}", bob_id);

    // 2. Two nodes sharing one in-process directory
    println!("2. Starting nodes...");
    let records = MemoryRecordStore::new();
    let alice = Network::start(local_config(), alice_id, Arc::new(records.clone())).await?;
    let bob = Network::start(local_config(), bob_id, Arc::new(records.clone())).await?;
    println!("   alice listening on {}", alice.local_addr());
    println!("   bob listening on {}", bob.local_addr());

    // 3. Provider records
    println!("3. Announcing a block...");
    let block = BlockId::for_data(b"hello from alice")?;
    alice.announce_provider(&block).await?;
    let providers = bob.find_providers(&block).await?;
    println!("   bob sees {} provider(s) of {}", providers.len(), block);

    // 4. Session
    println!("4. Opening a session...");
    let mut inbound = alice.inbound_sessions();
    let session = bob.connect(&alice_id).await?;
    let arrival = inbound.next().await.ok_or("alice stopped accepting")?;
    println!("   alice accepted a session from {}", arrival.peer);

    session.send(b"want".to_vec()).await?;
    if let Some(frame) = arrival.session.recv().await {
        println!("   alice received {} bytes", frame?.len());
    }
    if let Some(rtt) = session.ping().await? {
        println!("   round trip: {:?}", rtt);
    }

    // 5. Shutdown
    println!("5. Shutting down...");
    session.close().await?;
    arrival.session.close().await?;
    alice.stop().await;
    bob.stop().await;
    println!("   done");

    Ok(())
}
