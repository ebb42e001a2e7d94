use std::fmt;

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Size in bytes of a peer identity key.
pub const PEER_KEY_LEN: usize = 32;

/// A peer's public identity key.
///
/// Equality is constant-time: the allow-list and transport-key-binding
/// checks compare untrusted, network-supplied keys against configured
/// ones, and a variable-time comparison would leak how many leading bytes
/// matched.
#[derive(Clone, Copy)]
pub struct PeerPublicKey([u8; PEER_KEY_LEN]);

impl PeerPublicKey {
    pub fn from_bytes(bytes: [u8; PEER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_KEY_LEN] {
        &self.0
    }

    /// Hex-encoded form, used as the map key in the deduplication registry
    /// and for rendering keys in log lines and error messages.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; PEER_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl PartialEq for PeerPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PeerPublicKey {}

impl fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerPublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PeerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A peer's private identity key.
///
/// The core never inspects these bytes beyond handing them to a
/// [`crate::transport::Transport`]; `Debug` deliberately redacts the
/// contents so a stray `log::debug!("{:?}", key)` at a call site added
/// later can't leak key material.
#[derive(Clone, Copy)]
pub struct PeerPrivateKey([u8; PEER_KEY_LEN]);

impl PeerPrivateKey {
    pub fn from_bytes(bytes: [u8; PEER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_KEY_LEN] {
        &self.0
    }

    /// Generates a fresh random private key, used when the caller does not
    /// configure a long-lived one.
    pub fn generate() -> Self {
        let mut bytes = [0u8; PEER_KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for PeerPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PeerPrivateKey(..)")
    }
}

/// `(major, minor)` protocol version. The only version this crate accepts
/// on the wire is [`PROTO_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for ProtoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The only protocol version this crate's handshake accepts.
pub const PROTO_VERSION: ProtoVersion = ProtoVersion { major: 0, minor: 4 };

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = PeerPublicKey::from_bytes([7u8; PEER_KEY_LEN]);
        let hex = key.to_hex();
        assert_eq!(PeerPublicKey::from_hex(&hex), Some(key));
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(PeerPublicKey::from_hex("aabb").is_none());
    }

    #[test]
    fn equality_is_constant_time_but_still_correct() {
        let a = PeerPublicKey::from_bytes([1u8; PEER_KEY_LEN]);
        let b = PeerPublicKey::from_bytes([1u8; PEER_KEY_LEN]);
        let c = PeerPublicKey::from_bytes([2u8; PEER_KEY_LEN]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
