pub mod tcp;

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::{error::Error, key::PeerPrivateKey, key::PeerPublicKey, security::SecurityLevel};

/// A raw, bidirectional byte stream produced by a [`Transport`].
///
/// `HandshakeConn` is the only thing that ever sees this trait object; a
/// concrete transport just needs to hand back anything that reads, writes,
/// and can report both of its socket endpoints.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {
    fn local_addr(&self) -> std::io::Result<SocketAddr>;

    fn peer_addr(&self) -> std::io::Result<SocketAddr>;
}

/// The result of a successful [`Transport::connect`] or
/// [`TransportListener::accept`].
pub struct ConnectionResult {
    pub stream: Box<dyn RawStream>,
    /// A claim the transport makes about the remote's identity, checked
    /// against the preamble's announced key by `HandshakeConn`.
    pub transport_key: Option<PeerPublicKey>,
    pub security_level: SecurityLevel,
}

/// A listener accepting inbound links for one registered scheme.
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn accept(&self) -> Result<ConnectionResult, Error>;

    async fn close(&self) -> Result<(), Error>;

    fn local_address(&self) -> Result<SocketAddr, Error>;
}

/// A pluggable per-scheme dialer/listener.
///
/// Grounded on `original_source/static/types.go`'s `Transport` interface;
/// realized with `async_trait` the way the teacher's `Observer` trait
/// exposes its own async callbacks.
#[async_trait]
pub trait Transport: Send + Sync {
    fn scheme(&self) -> &str;

    async fn connect(
        &self,
        uri: &Url,
        proxy_uri: Option<&Url>,
        private_key: PeerPrivateKey,
    ) -> Result<ConnectionResult, Error>;

    async fn listen(&self, uri: &Url, private_key: PeerPrivateKey) -> Result<Box<dyn TransportListener>, Error>;
}
