//! Two-node block exchange over real libp2p transports.
//!
//! A provider node publishes a multi-chunk payload; a seeker node resolves
//! the root id through DHT provider discovery and the block read protocol,
//! filling its temporary store with the root and every child.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use serial_test::serial;

use blockgrid::modules::network::{P2pConfig, P2pNode};
use blockgrid::modules::storage::block::{
    BlockStorage, ContentId, MemoryStore, ObjectStore, StorageError,
};
use blockgrid::utils::ctx::OpContext;

const TEST_CHUNK_SIZE: usize = 1024;

struct TestNode {
    node: Arc<P2pNode>,
    storage: Arc<BlockStorage>,
    local: Arc<MemoryStore>,
    temp: Arc<MemoryStore>,
}

async fn start_node() -> TestNode {
    let node = P2pNode::spawn(P2pConfig::ephemeral())
        .await
        .expect("Failed to spawn node");

    let local = Arc::new(MemoryStore::new());
    let temp = Arc::new(MemoryStore::new());

    let storage = BlockStorage::builder()
        .with_local_store(local.clone())
        .with_temporary_store(temp.clone())
        .with_peer(node.clone(), node.clone())
        .with_chunk_size(TEST_CHUNK_SIZE)
        .build()
        .await
        .expect("Failed to build storage");

    TestNode {
        node,
        storage: Arc::new(storage),
        local,
        temp,
    }
}

/// Introduce two nodes to each other: routing-table entries both ways plus
/// an established connection.
async fn connect(a: &TestNode, b: &TestNode) {
    let a_addr = a.node.listen_addrs()[0].clone();
    let b_addr = b.node.listen_addrs()[0].clone();

    a.node
        .add_address(b.node.local_peer_id(), b_addr)
        .await
        .unwrap();
    b.node
        .add_address(a.node.local_peer_id(), a_addr)
        .await
        .unwrap();

    b.node
        .dial(a.node.external_addr().expect("listen addr"))
        .await
        .expect("Dial failed");

    // Let the routing tables settle.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

async fn shutdown(nodes: Vec<TestNode>) {
    for n in nodes {
        n.node.shutdown().await;
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

#[tokio::test]
#[serial]
async fn test_seeker_fetches_published_payload() {
    let provider = start_node().await;
    let seeker = start_node().await;
    connect(&provider, &seeker).await;

    let ctx = OpContext::background();
    let payload = random_bytes(3 * TEST_CHUNK_SIZE);

    // Provider publishes; every block is announced on the DHT.
    let root_id = provider
        .storage
        .create_block(&ctx, "shared_payload", Cursor::new(payload.clone()))
        .await
        .expect("Publish failed");

    assert!(provider.local.has(&root_id).await);
    assert!(
        !seeker.temp.has(&root_id).await,
        "Seeker must start without the root"
    );
    assert!(!seeker.local.has(&root_id).await);

    // Seeker resolves the root through the network.
    let ctx = ctx.with_timeout(Duration::from_secs(30));
    let root = seeker
        .storage
        .get_block(&ctx, &root_id)
        .await
        .expect("Remote resolution failed");

    assert_eq!(root.name, "shared_payload");
    assert_eq!(root.links.len(), 3);

    // The fetch populated the temporary store with the root and every
    // child.
    assert!(seeker.temp.has(&root_id).await);
    for link in &root.links {
        assert!(
            seeker.temp.has(&link.child_id().unwrap()).await,
            "Child {} missing from temporary store",
            link.hash
        );
    }

    // Reassembly happens out of the temporary store, no further network.
    let mut reassembled = Vec::with_capacity(payload.len());
    for link in &root.links {
        let leaf = seeker
            .storage
            .get_block(&ctx, &link.child_id().unwrap())
            .await
            .unwrap();
        reassembled.extend_from_slice(&leaf.data);
    }
    assert_eq!(reassembled, payload);

    // The decoded root equals the provider's own copy.
    let provider_root = provider.storage.get_block(&ctx, &root_id).await.unwrap();
    assert_eq!(root, provider_root);
    assert_eq!(root.links, provider_root.links);

    shutdown(vec![provider, seeker]).await;
}

#[tokio::test]
#[serial]
async fn test_unprovided_id_reports_provider_not_found() {
    let provider = start_node().await;
    let seeker = start_node().await;
    connect(&provider, &seeker).await;

    let ctx = OpContext::background().with_timeout(Duration::from_secs(30));
    let missing = ContentId::digest(b"nobody ever published this");

    let result = seeker.storage.get_block(&ctx, &missing).await;
    assert!(
        matches!(result, Err(StorageError::ProviderNotFound(_))),
        "got: {:?}",
        result.map(|b| b.name)
    );

    assert!(
        !seeker.temp.has(&missing).await,
        "Temporary store must stay clean for unresolved ids"
    );

    shutdown(vec![provider, seeker]).await;
}

#[tokio::test]
#[serial]
async fn test_second_fetch_served_from_temporary_store() {
    let provider = start_node().await;
    let seeker = start_node().await;
    connect(&provider, &seeker).await;

    let ctx = OpContext::background().with_timeout(Duration::from_secs(30));

    let root_id = provider
        .storage
        .create_block(&ctx, "cache_me", Cursor::new(random_bytes(TEST_CHUNK_SIZE / 2)))
        .await
        .unwrap();

    let first = seeker.storage.get_block(&ctx, &root_id).await.unwrap();

    // Tear the provider down; the cached copy must still resolve.
    provider.node.shutdown().await;

    let second = seeker.storage.get_block(&ctx, &root_id).await.unwrap();
    assert_eq!(first, second);

    seeker.node.shutdown().await;
}
