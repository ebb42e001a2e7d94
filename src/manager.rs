use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, warn};
use url::Url;

use crate::{
    address::AddressGuard,
    allowlist::AllowList,
    dedup::DeduplicationManager,
    error::Error,
    handshake::{HandshakeConn, HandshakeOptions},
    key::PeerPrivateKey,
    proxy::ProxyRouter,
    transport::{Transport, TransportListener},
};

/// Construction parameters for a [`ConnectionManager`].
///
/// Mirrors `SessionManagerOptions` in spirit: every field is meaningfully
/// optional and `Default` yields the least-surprising configuration (no
/// long-lived key, direct proxying, no deduplication, allow-all).
pub struct ConnectionManagerOptions {
    pub private_key: Option<PeerPrivateKey>,
    pub proxy_router: ProxyRouter,
    pub dedup: Option<Arc<DeduplicationManager>>,
    pub allow_list: AllowList,
    pub transports: Vec<Arc<dyn Transport>>,
}

impl Default for ConnectionManagerOptions {
    fn default() -> Self {
        Self {
            private_key: None,
            proxy_router: ProxyRouter::direct(),
            dedup: None,
            allow_list: AllowList::allow_all(),
            transports: Vec::new(),
        }
    }
}

/// Composition façade tying together proxying, identity policy, transport
/// dispatch and the handshake, for both outbound dials and inbound accepts.
///
/// Grounded on `original_source/conn_manager.go`'s `ConnManager`, with the
/// scheme registry keyed the way the teacher's `SessionManager` keys its
/// own registries (a plain hash map built once at construction).
pub struct ConnectionManager {
    private_key: Option<PeerPrivateKey>,
    proxy_router: ProxyRouter,
    dedup: Option<Arc<DeduplicationManager>>,
    allow_list: AllowList,
    transports: HashMap<String, Arc<dyn Transport>>,
    address_guard: AddressGuard,
}

impl ConnectionManager {
    pub fn new(options: ConnectionManagerOptions, address_guard: AddressGuard) -> Arc<Self> {
        let mut transports = HashMap::new();
        for transport in options.transports {
            transports.insert(transport.scheme().to_string(), transport);
        }

        Arc::new(Self {
            private_key: options.private_key,
            proxy_router: options.proxy_router,
            dedup: options.dedup,
            allow_list: options.allow_list,
            transports,
            address_guard,
        })
    }

    fn materialize_key(&self) -> PeerPrivateKey {
        self.private_key.unwrap_or_else(PeerPrivateKey::generate)
    }

    /// Parses the repeatable `key=<hex>` query parameter into the
    /// effective per-dial allow-list. Malformed hex values are silently
    /// skipped rather than failing the dial.
    fn effective_allow_list(&self, uri: &Url) -> AllowList {
        let uri_keys: Vec<_> = uri
            .query_pairs()
            .filter(|(k, _)| k == "key")
            .filter_map(|(_, v)| crate::key::PeerPublicKey::from_hex(&v))
            .collect();
        self.allow_list.extended_with(&uri_keys)
    }

    /// Dials `uri`: resolves the scheme to a registered transport, resolves
    /// a proxy if configured, materializes the private key, dials, applies
    /// the synchronous allow-list rejection, then wraps the result in a
    /// `HandshakeConn`.
    pub async fn connect(self: &Arc<Self>, uri: &Url) -> Result<Arc<HandshakeConn>, Error> {
        let transport = self
            .transports
            .get(uri.scheme())
            .ok_or_else(|| Error::UnknownScheme(uri.scheme().to_string()))?
            .clone();

        let allow_list = self.effective_allow_list(uri);
        let proxy_uri = self.proxy_router.proxy_for(uri);
        let private_key = self.materialize_key();

        debug!("dialing {uri} via scheme '{}' (proxy: {:?})", uri.scheme(), proxy_uri);

        let result = transport.connect(uri, proxy_uri.as_ref(), private_key).await?;

        if !allow_list.is_null() && !allow_list.is_allowed(result.transport_key.as_ref()) {
            warn!("transport-asserted key for {uri} rejected by allow list");
            return Err(Error::InvalidPeerKey(
                "transport-asserted key is not in the allow list".into(),
            ));
        }

        Ok(HandshakeConn::new(
            result.stream,
            HandshakeOptions {
                transport_key: result.transport_key,
                allow_list,
                security_level: result.security_level,
                dedup: self.dedup.clone(),
                address_guard: self.address_guard.clone(),
            },
        ))
    }

    /// Like [`Self::connect`] but bounded by `timeout`. On expiry, any
    /// connection that nonetheless succeeds afterwards is closed rather
    /// than leaked, mirroring `original_source/conn_manager.go`'s
    /// `ConnectTimeout`.
    pub async fn connect_with_timeout(
        self: &Arc<Self>,
        uri: &Url,
        timeout: Duration,
    ) -> Result<Arc<HandshakeConn>, Error> {
        let this = self.clone();
        let uri = uri.clone();

        match tokio::time::timeout(timeout, async move { this.connect(&uri).await }).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }

    /// Resolves `uri`'s scheme to a transport and returns a listener whose
    /// `accept` wraps each inbound link in a `HandshakeConn` carrying this
    /// manager's dedup handle and base allow-list.
    pub async fn listen(self: &Arc<Self>, uri: &Url) -> Result<ManagedListener, Error> {
        let transport = self
            .transports
            .get(uri.scheme())
            .ok_or_else(|| Error::UnknownScheme(uri.scheme().to_string()))?
            .clone();

        let private_key = self.materialize_key();
        let inner = transport.listen(uri, private_key).await?;

        Ok(ManagedListener {
            inner,
            manager: self.clone(),
        })
    }
}

/// A listener bound to one scheme, handing out `HandshakeConn`s on
/// accept.
pub struct ManagedListener {
    inner: Box<dyn TransportListener>,
    manager: Arc<ConnectionManager>,
}

impl ManagedListener {
    pub async fn accept(&self) -> Result<Arc<HandshakeConn>, Error> {
        let result = self.inner.accept().await?;

        Ok(HandshakeConn::new(
            result.stream,
            HandshakeOptions {
                transport_key: result.transport_key,
                allow_list: self.manager.allow_list.clone(),
                security_level: result.security_level,
                dedup: self.manager.dedup.clone(),
                address_guard: self.manager.address_guard.clone(),
            },
        ))
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }

    pub fn local_address(&self) -> Result<std::net::SocketAddr, Error> {
        self.inner.local_address()
    }
}
