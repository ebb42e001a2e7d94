use std::{fmt, io, sync::Arc};

use crate::key::{PeerPublicKey, ProtoVersion};

/// Coarse classification of an [`Error`], independent of its payload.
///
/// Mirrors the "Retryable?" column of the error taxonomy so callers can
/// decide whether to retry a dial without matching on the full variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownScheme,
    InvalidUri,
    UnacceptableAddress,
    ConnectionTimeout,
    UnknownProtocol,
    UnknownProtocolVersion,
    TransportSecurityCheck,
    InvalidPeerKey,
    ClosedByDeduplicator,
    InapplicableProxyType,
    Io,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the operation that produced
    /// this error. Only connection timeouts are retryable outright;
    /// `ClosedByDeduplicator` is situational (the caller knows whether the
    /// preemption is expected) and is deliberately not included here.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ConnectionTimeout)
    }
}

/// Errors raised anywhere in the dial / accept / handshake pipeline.
///
/// There is a single error type for the whole crate, following
/// `turn_server_codec::Error`'s manual `Display` rather than pulling in
/// `thiserror`: the variant set is small, stable, and each arm already
/// carries exactly the data the spec's taxonomy calls for.
#[derive(Debug, Clone)]
pub enum Error {
    UnknownScheme(String),
    InvalidUri(String),
    UnacceptableAddress(String),
    ConnectionTimeout,
    UnknownProtocol,
    UnknownProtocolVersion {
        expected: ProtoVersion,
        received: ProtoVersion,
    },
    TransportSecurityCheck {
        expected: PeerPublicKey,
        received: PeerPublicKey,
    },
    InvalidPeerKey(String),
    ClosedByDeduplicator,
    InapplicableProxyType {
        transport: String,
        proxy: String,
    },
    Io(Arc<io::Error>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownScheme(_) => ErrorKind::UnknownScheme,
            Error::InvalidUri(_) => ErrorKind::InvalidUri,
            Error::UnacceptableAddress(_) => ErrorKind::UnacceptableAddress,
            Error::ConnectionTimeout => ErrorKind::ConnectionTimeout,
            Error::UnknownProtocol => ErrorKind::UnknownProtocol,
            Error::UnknownProtocolVersion { .. } => ErrorKind::UnknownProtocolVersion,
            Error::TransportSecurityCheck { .. } => ErrorKind::TransportSecurityCheck,
            Error::InvalidPeerKey(_) => ErrorKind::InvalidPeerKey,
            Error::ClosedByDeduplicator => ErrorKind::ClosedByDeduplicator,
            Error::InapplicableProxyType { .. } => ErrorKind::InapplicableProxyType,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownScheme(scheme) => write!(f, "unknown scheme: {scheme}"),
            Error::InvalidUri(reason) => write!(f, "uri is invalid: {reason}"),
            Error::UnacceptableAddress(reason) => write!(f, "unacceptable address: {reason}"),
            Error::ConnectionTimeout => write!(f, "connection timeout"),
            Error::UnknownProtocol => write!(f, "unknown protocol"),
            Error::UnknownProtocolVersion { expected, received } => write!(
                f,
                "expected protocol version {expected} but received {received}"
            ),
            Error::TransportSecurityCheck { expected, received } => write!(
                f,
                "transport-asserted key {expected} does not match announced key {received}"
            ),
            Error::InvalidPeerKey(reason) => write!(f, "invalid peer public key: {reason}"),
            Error::ClosedByDeduplicator => write!(f, "connection closed by deduplicator"),
            Error::InapplicableProxyType { transport, proxy } => write!(
                f,
                "proxy '{proxy}' cannot be used with the '{transport}' transport"
            ),
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
