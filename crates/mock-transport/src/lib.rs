//! An in-memory [`meshlink::Transport`] used by meshlink's own test suite.
//!
//! Grounded on `original_source/debugstuff/{mockconn.go,mocktransport.go}`:
//! each `connect()` spins up an in-memory duplex pipe, writes the 38-byte
//! preamble (optionally malformed, for negative-path tests) from a
//! background task playing "the peer", and hands the other end back as
//! the `ConnectionResult`. `listen()`/`accept()` simply calls `connect()`
//! again per accepted link, mirroring `MockTransportListener.AcceptConn`.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use meshlink::{
    ConnectionResult, Error, PeerPrivateKey, PeerPublicKey, ProtoVersion, RawStream, SecurityLevel, Transport,
    TransportListener,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use url::Url;

/// Lets a test observe which [`PeerPrivateKey`] actually reached the
/// transport's `connect`/`listen` call: a configured key should be reused
/// verbatim, an absent one should come out fresh per dial.
#[derive(Clone, Default)]
pub struct KeySpy(Arc<Mutex<Option<PeerPrivateKey>>>);

impl KeySpy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<PeerPrivateKey> {
        *self.0.lock().unwrap()
    }

    fn record(&self, key: PeerPrivateKey) {
        *self.0.lock().unwrap() = Some(key);
    }
}

impl RawStream for DuplexStream {
    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok("127.0.0.1:0".parse().unwrap())
    }

    fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        Ok("127.0.0.1:0".parse().unwrap())
    }
}

/// What the simulated peer does after the pipe is established.
#[derive(Clone)]
pub struct MockPeerBehavior {
    pub version: ProtoVersion,
    pub peer_key: PeerPublicKey,
    pub payload: Vec<u8>,
    pub delay_before_preamble: Duration,
    /// If set, only this many preamble bytes are written and the peer
    /// then hangs without closing, simulating a truncated preamble.
    pub truncate_preamble_at: Option<usize>,
}

impl MockPeerBehavior {
    pub fn happy_path(peer_key: PeerPublicKey, payload: Vec<u8>) -> Self {
        Self {
            version: meshlink::PROTO_VERSION,
            peer_key,
            payload,
            delay_before_preamble: Duration::ZERO,
            truncate_preamble_at: None,
        }
    }

    pub fn wrong_version(version: ProtoVersion, peer_key: PeerPublicKey) -> Self {
        Self {
            version,
            peer_key,
            payload: Vec::new(),
            delay_before_preamble: Duration::ZERO,
            truncate_preamble_at: None,
        }
    }

    pub fn truncated(at: usize) -> Self {
        Self {
            version: meshlink::PROTO_VERSION,
            peer_key: PeerPublicKey::from_bytes([0u8; 32]),
            payload: Vec::new(),
            delay_before_preamble: Duration::ZERO,
            truncate_preamble_at: Some(at),
        }
    }

    fn encode_preamble(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(meshlink::PREAMBLE_LEN);
        buf.extend_from_slice(&meshlink::MAGIC);
        buf.push(self.version.major);
        buf.push(self.version.minor);
        buf.extend_from_slice(self.peer_key.as_bytes());
        buf
    }
}

/// A mock transport registered under an arbitrary scheme.
pub struct MockTransport {
    pub scheme: String,
    pub security_level: SecurityLevel,
    /// The key the *transport layer* claims for the remote, checked by
    /// `HandshakeConn` against the preamble's announced key. `None` is
    /// the common case (no transport-level identity binding).
    pub transport_key: Option<PeerPublicKey>,
    pub behavior: MockPeerBehavior,
    pub key_spy: Option<KeySpy>,
    /// Delays `Transport::connect`'s own return, simulating a slow dial.
    /// Distinct from `MockPeerBehavior::delay_before_preamble`, which
    /// delays only the simulated peer's preamble write once the pipe is
    /// already open.
    pub dial_delay: Duration,
}

impl MockTransport {
    pub fn new(scheme: impl Into<String>, behavior: MockPeerBehavior) -> Self {
        Self {
            scheme: scheme.into(),
            security_level: SecurityLevel::UNSECURE,
            transport_key: None,
            behavior,
            key_spy: None,
            dial_delay: Duration::ZERO,
        }
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_transport_key(mut self, key: PeerPublicKey) -> Self {
        self.transport_key = Some(key);
        self
    }

    pub fn with_key_spy(mut self, spy: KeySpy) -> Self {
        self.key_spy = Some(spy);
        self
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    async fn open_pipe(&self) -> ConnectionResult {
        let (local, remote) = tokio::io::duplex(4096);
        let behavior = self.behavior.clone();

        tokio::spawn(async move {
            if !behavior.delay_before_preamble.is_zero() {
                tokio::time::sleep(behavior.delay_before_preamble).await;
            }

            let mut remote = remote;
            let preamble = behavior.encode_preamble();
            let to_write = behavior.truncate_preamble_at.unwrap_or(preamble.len());
            let _ = remote.write_all(&preamble[..to_write]).await;

            if behavior.truncate_preamble_at.is_some() {
                // Hang without closing: the caller's read deadline is the
                // only thing that ends this connection.
                std::future::pending::<()>().await;
            }

            let _ = remote.write_all(&behavior.payload).await;
            let _ = remote.flush().await;
            // Keep the peer side alive so subsequent reads on `local`
            // don't observe EOF before the test finishes draining them.
            std::future::pending::<()>().await;
        });

        ConnectionResult {
            stream: Box::new(local),
            transport_key: self.transport_key,
            security_level: self.security_level,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn connect(
        &self,
        _uri: &Url,
        _proxy_uri: Option<&Url>,
        private_key: PeerPrivateKey,
    ) -> Result<ConnectionResult, Error> {
        if let Some(spy) = &self.key_spy {
            spy.record(private_key);
        }
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        Ok(self.open_pipe().await)
    }

    async fn listen(&self, uri: &Url, private_key: PeerPrivateKey) -> Result<Box<dyn TransportListener>, Error> {
        if let Some(spy) = &self.key_spy {
            spy.record(private_key);
        }
        Ok(Box::new(MockTransportListener {
            scheme: self.scheme.clone(),
            security_level: self.security_level,
            transport_key: self.transport_key,
            behavior: self.behavior.clone(),
            uri: uri.clone(),
        }))
    }
}

pub struct MockTransportListener {
    scheme: String,
    security_level: SecurityLevel,
    transport_key: Option<PeerPublicKey>,
    behavior: MockPeerBehavior,
    uri: Url,
}

#[async_trait]
impl TransportListener for MockTransportListener {
    async fn accept(&self) -> Result<ConnectionResult, Error> {
        let transport = MockTransport {
            scheme: self.scheme.clone(),
            security_level: self.security_level,
            transport_key: self.transport_key,
            behavior: self.behavior.clone(),
            key_spy: None,
            dial_delay: Duration::ZERO,
        };
        Ok(transport.open_pipe().await)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn local_address(&self) -> Result<SocketAddr, Error> {
        let host = self.uri.host_str().unwrap_or("127.0.0.1");
        let port = self.uri.port().unwrap_or(0);
        format!("{host}:{port}")
            .parse()
            .map_err(|_| Error::InvalidUri("mock listener uri is not a socket address".into()))
    }
}
