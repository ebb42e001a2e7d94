use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_socks::tcp::Socks5Stream;
use url::Url;

use crate::{
    address::AddressGuard,
    error::Error,
    key::PeerPrivateKey,
    security::SecurityLevel,
    transport::{ConnectionResult, RawStream, Transport, TransportListener},
};

impl RawStream for TcpStream {
    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Schemes that activate SOCKS5 dialing.
fn is_socks_scheme(scheme: &str) -> bool {
    matches!(scheme, "socks" | "socks5" | "socks5h")
}

/// TCP transport registered under the `tcp` scheme.
///
/// Direct dials apply [`AddressGuard`] to the resolved destination before
/// connecting; proxied dials apply it to the resolved proxy endpoint
/// first, then again to both the local and remote endpoints of the
/// resulting socket (the post-SOCKS leak guard).
pub struct TcpTransport {
    guard: AddressGuard,
    connect_timeout: Duration,
    keepalive: Duration,
}

impl TcpTransport {
    pub fn new(guard: AddressGuard) -> Self {
        Self {
            guard,
            connect_timeout: Duration::from_secs(120),
            keepalive: Duration::from_secs(15),
        }
    }

    pub fn with_timeouts(guard: AddressGuard, connect_timeout: Duration, keepalive: Duration) -> Self {
        Self {
            guard,
            connect_timeout,
            keepalive,
        }
    }

    async fn dial_direct(&self, uri: &Url) -> Result<TcpStream, Error> {
        let addr = resolve(uri).await?;
        self.guard.check(addr.ip())?;

        let connect = TcpStream::connect(addr);
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectionTimeout)??;

        apply_keepalive(&stream, self.keepalive);
        Ok(stream)
    }

    async fn dial_via_socks(&self, uri: &Url, proxy_uri: &Url) -> Result<TcpStream, Error> {
        let proxy_addr = resolve(proxy_uri).await?;
        self.guard.check(proxy_addr.ip())?;

        let target_host = uri
            .host_str()
            .ok_or_else(|| Error::InvalidUri("destination uri has no host".into()))?;
        let target_port = uri
            .port()
            .ok_or_else(|| Error::InvalidUri("destination uri has no port".into()))?;
        let target = format!("{target_host}:{target_port}");

        let connect = async {
            if let Some(password) = proxy_uri.password() {
                let user = proxy_uri.username();
                Socks5Stream::connect_with_password(proxy_addr, target.as_str(), user, password)
                    .await
                    .map(Socks5Stream::into_inner)
            } else {
                Socks5Stream::connect(proxy_addr, target.as_str())
                    .await
                    .map(Socks5Stream::into_inner)
            }
        };

        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(|err| Error::Io(Arc::new(std::io::Error::other(err))))?;

        self.guard.check(stream.local_addr()?.ip())?;
        self.guard.check(stream.peer_addr()?.ip())?;
        apply_keepalive(&stream, self.keepalive);
        Ok(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn scheme(&self) -> &str {
        "tcp"
    }

    async fn connect(
        &self,
        uri: &Url,
        proxy_uri: Option<&Url>,
        _private_key: PeerPrivateKey,
    ) -> Result<ConnectionResult, Error> {
        let use_socks = proxy_uri.map(|p| is_socks_scheme(p.scheme())).unwrap_or(false);

        let stream = if use_socks {
            self.dial_via_socks(uri, proxy_uri.unwrap()).await?
        } else {
            self.dial_direct(uri).await?
        };

        Ok(ConnectionResult {
            stream: Box::new(stream),
            transport_key: None,
            security_level: SecurityLevel::UNSECURE,
        })
    }

    async fn listen(&self, uri: &Url, _private_key: PeerPrivateKey) -> Result<Box<dyn TransportListener>, Error> {
        let addr = resolve(uri).await?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Box::new(TcpTransportListener {
            inner: listener,
            guard: self.guard.clone(),
        }))
    }
}

pub struct TcpTransportListener {
    inner: TcpListener,
    guard: AddressGuard,
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&self) -> Result<ConnectionResult, Error> {
        let (stream, remote) = self.inner.accept().await?;
        self.guard.check(remote.ip())?;
        Ok(ConnectionResult {
            stream: Box::new(stream),
            transport_key: None,
            security_level: SecurityLevel::UNSECURE,
        })
    }

    async fn close(&self) -> Result<(), Error> {
        // tokio::net::TcpListener has no explicit shutdown; dropping the
        // ConnectionManager's listener handle is what actually releases it.
        Ok(())
    }

    fn local_address(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.local_addr()?)
    }
}

async fn resolve(uri: &Url) -> Result<SocketAddr, Error> {
    let host = uri
        .host_str()
        .ok_or_else(|| Error::InvalidUri("uri has no host".into()))?;
    let port = uri.port().ok_or_else(|| Error::InvalidUri("uri has no port".into()))?;
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::InvalidUri(format!("could not resolve {host}:{port}")))
}

fn apply_keepalive(stream: &TcpStream, keepalive: Duration) {
    let sock_ref = socket2::SockRef::from(stream);
    let _ = sock_ref.set_keepalive(true);
    let _ = sock_ref.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(keepalive));
}
