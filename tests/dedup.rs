use std::{sync::Arc, time::Duration};

use meshlink::{
    AddressGuard, AllowList, ConnectionManager, ConnectionManagerOptions, DeduplicationManager, ErrorKind,
    PeerPrivateKey, PeerPublicKey, ProxyRouter, SecurityLevel,
};
use meshlink_mock_transport::{MockPeerBehavior, MockTransport};
use url::Url;

fn key(byte: u8) -> PeerPublicKey {
    PeerPublicKey::from_bytes([byte; 32])
}

fn manager_for(transport: MockTransport, dedup: Arc<DeduplicationManager>) -> Arc<ConnectionManager> {
    ConnectionManager::new(
        ConnectionManagerOptions {
            private_key: Some(PeerPrivateKey::from_bytes([0u8; 32])),
            proxy_router: ProxyRouter::direct(),
            dedup: Some(dedup),
            allow_list: AllowList::allow_all(),
            transports: vec![Arc::new(transport)],
        },
        AddressGuard::disabled(),
    )
}

// A stronger incoming link preempts a weaker incumbent for the same peer
// key; the incumbent is latched closed rather than silently dropped.
#[tokio::test]
async fn stronger_security_level_preempts_weaker_incumbent() {
    let dedup = DeduplicationManager::new(true, None);
    let peer_key = key(11);

    let weak_transport = MockTransport::new("weak", MockPeerBehavior::happy_path(peer_key, vec![]))
        .with_security_level(SecurityLevel::UNSECURE);
    let weak_manager = manager_for(weak_transport, dedup.clone());
    let incumbent = weak_manager.connect(&Url::parse("weak://host:1").unwrap()).await.unwrap();

    // Let the incumbent's handshake actually land in the registry before
    // the stronger link arrives.
    incumbent.peer_public_key().await.unwrap();

    let strong_transport = MockTransport::new("strong", MockPeerBehavior::happy_path(peer_key, vec![]))
        .with_security_level(SecurityLevel::ENCRYPTED_AND_VERIFIED);
    let strong_manager = manager_for(strong_transport, dedup.clone());
    let newcomer = strong_manager.connect(&Url::parse("strong://host:1").unwrap()).await.unwrap();

    assert_eq!(newcomer.peer_public_key().await.unwrap(), peer_key);

    // Eviction runs on its own spawned task, so poll for it rather than
    // assuming it has already landed. `write()` checks the latched error
    // before touching the stream, so it surfaces the failure as soon as
    // it lands without depending on buffer state.
    let err = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Err(err) = incumbent.write(&[0u8]).await {
                return err;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("incumbent should be latched closed, not hang");
    assert_eq!(err.kind(), ErrorKind::ClosedByDeduplicator);
}

// Without secure mode, a second link to an already-registered peer is
// refused outright regardless of security level.
#[tokio::test]
async fn non_secure_mode_refuses_second_link_to_same_peer() {
    let dedup = DeduplicationManager::new(false, None);
    let peer_key = key(22);

    let first_transport = MockTransport::new("a", MockPeerBehavior::happy_path(peer_key, vec![]));
    let first_manager = manager_for(first_transport, dedup.clone());
    let first = first_manager.connect(&Url::parse("a://host:1").unwrap()).await.unwrap();
    first.peer_public_key().await.unwrap();

    let second_transport = MockTransport::new("a", MockPeerBehavior::happy_path(peer_key, vec![]))
        .with_security_level(SecurityLevel::ENCRYPTED_AND_VERIFIED);
    let second_manager = manager_for(second_transport, dedup.clone());
    let second = second_manager.connect(&Url::parse("a://host:1").unwrap()).await.unwrap();

    let mut buf = [0u8; 1];
    let err = second.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClosedByDeduplicator);

    // The incumbent is unaffected.
    assert_eq!(first.peer_public_key().await.unwrap(), peer_key);
}
