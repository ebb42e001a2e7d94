use std::{sync::Arc, time::Duration};

use meshlink::{
    AddressGuard, AllowList, ConnectionManager, ConnectionManagerOptions, ErrorKind, PeerPrivateKey, PeerPublicKey,
    ProxyRouter,
};
use meshlink_mock_transport::{KeySpy, MockPeerBehavior, MockTransport};
use url::Url;

fn key(byte: u8) -> PeerPublicKey {
    PeerPublicKey::from_bytes([byte; 32])
}

fn manager_with_transport(
    transport: MockTransport,
    private_key: Option<PeerPrivateKey>,
) -> Arc<ConnectionManager> {
    ConnectionManager::new(
        ConnectionManagerOptions {
            private_key,
            proxy_router: ProxyRouter::direct(),
            dedup: None,
            allow_list: AllowList::allow_all(),
            transports: vec![Arc::new(transport)],
        },
        AddressGuard::disabled(),
    )
}

#[tokio::test]
async fn dialing_an_unregistered_scheme_fails_fast() {
    let manager = manager_with_transport(
        MockTransport::new("a", MockPeerBehavior::happy_path(key(1), vec![])),
        None,
    );

    let err = manager
        .connect(&Url::parse("b://host:1").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownScheme);
}

// A configured private key reaches the transport verbatim on every dial;
// an absent one still reaches the transport, just freshly generated per
// call.
#[tokio::test]
async fn configured_private_key_reaches_transport_unchanged() {
    let configured = PeerPrivateKey::from_bytes([42u8; 32]);
    let spy = KeySpy::new();
    let transport =
        MockTransport::new("a", MockPeerBehavior::happy_path(key(1), vec![])).with_key_spy(spy.clone());
    let manager = manager_with_transport(transport, Some(configured));

    manager.connect(&Url::parse("a://host:1").unwrap()).await.unwrap();

    assert_eq!(spy.get().unwrap().as_bytes(), configured.as_bytes());
}

#[tokio::test]
async fn absent_private_key_still_reaches_transport_freshly_generated() {
    let spy = KeySpy::new();
    let transport =
        MockTransport::new("a", MockPeerBehavior::happy_path(key(1), vec![])).with_key_spy(spy.clone());
    let manager = manager_with_transport(transport, None);

    manager.connect(&Url::parse("a://host:1").unwrap()).await.unwrap();
    let first = spy.get().unwrap();

    manager.connect(&Url::parse("a://host:1").unwrap()).await.unwrap();
    let second = spy.get().unwrap();

    assert_ne!(first.as_bytes(), second.as_bytes());
}

// Cancelling before the dial completes surfaces ConnectionTimeout and the
// in-flight dial is dropped rather than leaked (the mock transport's
// delayed `connect()` never gets to open its pipe).
#[tokio::test(start_paused = true)]
async fn connect_with_timeout_cancels_a_slow_dial() {
    let transport = MockTransport::new("a", MockPeerBehavior::happy_path(key(1), vec![]))
        .with_dial_delay(Duration::from_secs(30));
    let manager = manager_with_transport(transport, None);

    // With the clock paused, tokio auto-advances to the nearest pending
    // timer once the runtime is otherwise idle. The 5s connect timeout
    // fires well before the mock transport's 30s simulated dial would.
    let err = manager
        .connect_with_timeout(&Url::parse("a://host:1").unwrap(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionTimeout);
}
