//! Dials, accepts and deduplicates peer-to-peer links on an overlay mesh
//! network.
//!
//! The crate sits between application code and the wire: it opens
//! outbound links by URI, accepts inbound links, runs the mesh's
//! link-level handshake, enforces peer-identity policy, and arbitrates
//! between redundant connections to the same peer. Routing, forwarding,
//! session encryption and the application itself are external
//! collaborators. This crate's job ends once an authenticated,
//! deduplicated, bidirectional byte stream carrying the peer's public key
//! has been handed to the caller.
//!
//! See [`ConnectionManager`] for the top-level entry point.

pub mod address;
pub mod allowlist;
pub mod dedup;
pub mod error;
pub mod handshake;
pub mod key;
pub mod manager;
pub mod preamble;
pub mod proxy;
pub mod security;
pub mod transport;

pub use address::{AddressGuard, NoOverlayAddressSpace, OverlayAddressSpace};
pub use allowlist::AllowList;
pub use dedup::{CloseCallback, DeduplicationManager, ReleaseHandle};
pub use error::{Error, ErrorKind, Result};
pub use handshake::{HandshakeConn, HandshakeOptions};
pub use key::{PeerPrivateKey, PeerPublicKey, ProtoVersion, PROTO_VERSION};
pub use manager::{ConnectionManager, ConnectionManagerOptions, ManagedListener};
pub use preamble::{LinkPreamble, MAGIC, PREAMBLE_LEN};
pub use proxy::{ProxyMapping, ProxyRouter};
pub use security::SecurityLevel;
pub use transport::{
    ConnectionResult, RawStream, Transport, TransportListener,
    tcp::{TcpTransport, TcpTransportListener},
};
