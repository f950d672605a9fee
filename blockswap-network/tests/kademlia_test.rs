mod common;

use blockswap_core::BlockId;
use blockswap_network::{
    DhtConfig, DhtIdentity, Directory, DirectoryConfig, KademliaStore, NetworkError, RecordStore,
};
use common::{init_tracing, peer, within};
use std::sync::Arc;
use std::time::Duration;

fn loopback_dht() -> DhtConfig {
    DhtConfig::new()
        .with_listen_address("/ip4/127.0.0.1/tcp/0".parse().unwrap())
        .with_query_timeout(Duration::from_secs(5))
        .with_bootstrap_timeout(Duration::from_secs(5))
}

async fn spawn_node(config: DhtConfig) -> KademliaStore {
    init_tracing();
    let node = KademliaStore::spawn(DhtIdentity::generate(), config)
        .await
        .unwrap();
    within(node.bootstrap()).await.unwrap();
    node
}

/// Two bootstrapped nodes, the second joined through the first
async fn spawn_pair() -> (KademliaStore, KademliaStore) {
    let first = spawn_node(loopback_dht()).await;
    let seed = first.bootstrap_address().unwrap();
    let second = spawn_node(loopback_dht().with_bootstrap_nodes(vec![seed])).await;
    (first, second)
}

#[tokio::test]
async fn test_single_node_keeps_records_locally() {
    let node = spawn_node(loopback_dht()).await;

    assert_eq!(within(node.get("peer_missing")).await.unwrap(), None);
    assert!(within(node.get_copies("peer_missing")).await.unwrap().is_empty());

    within(node.put("peer_local", b"{\"uri\":\"ws://127.0.0.1:1\"}".to_vec()))
        .await
        .unwrap();
    assert_eq!(
        within(node.get("peer_local")).await.unwrap(),
        Some(b"{\"uri\":\"ws://127.0.0.1:1\"}".to_vec())
    );

    node.shutdown().await;
}

#[tokio::test]
async fn test_records_travel_between_nodes() {
    let (first, second) = spawn_pair().await;

    within(first.put("block_a", b"from first".to_vec()))
        .await
        .unwrap();
    assert_eq!(
        within(second.get("block_a")).await.unwrap(),
        Some(b"from first".to_vec())
    );

    within(second.put("block_b", b"from second".to_vec()))
        .await
        .unwrap();
    assert_eq!(
        within(first.get("block_b")).await.unwrap(),
        Some(b"from second".to_vec())
    );

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_bootstrap_fails_without_reachable_nodes() {
    // Bind and release a port so nothing listens on it
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let config = loopback_dht()
        .with_bootstrap_nodes(vec![format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap()]);
    init_tracing();
    let node = KademliaStore::spawn(DhtIdentity::generate(), config)
        .await
        .unwrap();

    assert!(matches!(
        within(node.bootstrap()).await,
        Err(NetworkError::Bootstrap(_))
    ));
    node.shutdown().await;
}

#[tokio::test]
async fn test_copies_include_remote_holders() {
    let (first, second) = spawn_pair().await;

    within(first.put("block_copies", b"written by first".to_vec()))
        .await
        .unwrap();

    // Replicated onto the second node, which also learns it from the first
    let copies = within(second.get_copies("block_copies")).await.unwrap();
    assert_eq!(copies, vec![b"written by first".to_vec()]);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_providers_accumulate_across_nodes() {
    let (first, second) = spawn_pair().await;
    let first: Arc<dyn RecordStore> = Arc::new(first);
    let second: Arc<dyn RecordStore> = Arc::new(second);
    let config = DirectoryConfig {
        announce_attempts: 3,
        announce_backoff: Duration::from_millis(5),
    };

    let alice = Directory::new(Arc::clone(&first), peer("alice"), config.clone());
    let bob = Directory::new(Arc::clone(&second), peer("bob"), config.clone());
    let carol = Directory::new(Arc::clone(&first), peer("carol"), config);
    let block = BlockId::for_data(b"replicated block").unwrap();

    within(alice.announce_provider(&block)).await.unwrap();
    within(bob.announce_provider(&block)).await.unwrap();

    let providers = within(carol.find_providers(&block)).await.unwrap();
    assert!(providers.contains(&peer("alice")));
    assert!(providers.contains(&peer("bob")));

    let providers = within(bob.find_providers(&block)).await.unwrap();
    assert_eq!(providers.into_iter().collect::<Vec<_>>(), vec![peer("alice")]);

    first.shutdown().await;
    second.shutdown().await;
}
