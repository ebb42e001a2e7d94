use crate::{
    error::Error,
    key::{PEER_KEY_LEN, PROTO_VERSION, PeerPublicKey, ProtoVersion},
};

/// Literal magic bytes opening every link: `b"meta"`.
pub const MAGIC: [u8; 4] = *b"meta";

/// Total wire size of [`LinkPreamble`]: 4-byte magic + 1-byte major +
/// 1-byte minor + 32-byte public key.
pub const PREAMBLE_LEN: usize = MAGIC.len() + 2 + PEER_KEY_LEN;

/// The fixed 38-byte opening frame of every link.
///
/// Bit-exact layout:
/// ```text
/// offset 0: 0x6d 0x65 0x74 0x61   ('m' 'e' 't' 'a')
/// offset 4: major (1 byte)        currently 0x00
/// offset 5: minor (1 byte)        currently 0x04
/// offset 6: peer public key       32 bytes
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LinkPreamble {
    pub version: ProtoVersion,
    pub peer_key: PeerPublicKey,
}

impl LinkPreamble {
    pub fn new(peer_key: PeerPublicKey) -> Self {
        Self {
            version: PROTO_VERSION,
            peer_key,
        }
    }

    pub fn encode(&self) -> [u8; PREAMBLE_LEN] {
        let mut buf = [0u8; PREAMBLE_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.major;
        buf[5] = self.version.minor;
        buf[6..].copy_from_slice(self.peer_key.as_bytes());
        buf
    }

    /// Parses a 38-byte buffer, validating the magic and version.
    ///
    /// The version and peer key are still extracted (and returned
    /// alongside an `UnknownProtocolVersion` error) so a caller such as
    /// [`crate::handshake::HandshakeConn`] can make them observable even
    /// when the handshake ultimately fails.
    pub fn parse(buf: &[u8; PREAMBLE_LEN]) -> Result<Self, (Error, Option<ProtoVersion>, Option<PeerPublicKey>)> {
        if buf[0..4] != MAGIC {
            return Err((Error::UnknownProtocol, None, None));
        }

        let received = ProtoVersion {
            major: buf[4],
            minor: buf[5],
        };

        let mut key_bytes = [0u8; PEER_KEY_LEN];
        key_bytes.copy_from_slice(&buf[6..]);
        let peer_key = PeerPublicKey::from_bytes(key_bytes);

        if received != PROTO_VERSION {
            return Err((
                Error::UnknownProtocolVersion {
                    expected: PROTO_VERSION,
                    received,
                },
                Some(received),
                Some(peer_key),
            ));
        }

        Ok(Self {
            version: received,
            peer_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_round_trips() {
        let key = PeerPublicKey::from_bytes([9u8; PEER_KEY_LEN]);
        let preamble = LinkPreamble::new(key);
        let buf = preamble.encode();
        let parsed = LinkPreamble::parse(&buf).unwrap();
        assert_eq!(parsed.version, PROTO_VERSION);
        assert_eq!(parsed.peer_key, key);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = LinkPreamble::new(PeerPublicKey::from_bytes([0u8; PEER_KEY_LEN])).encode();
        buf[0] = b'x';
        let (err, version, key) = LinkPreamble::parse(&buf).unwrap_err();
        assert!(matches!(err, Error::UnknownProtocol));
        assert!(version.is_none());
        assert!(key.is_none());
    }

    #[test]
    fn rejects_wrong_version_but_still_exposes_version_and_key() {
        let mut buf = LinkPreamble::new(PeerPublicKey::from_bytes([3u8; PEER_KEY_LEN])).encode();
        buf[4] = 1;
        buf[5] = 5;
        let (err, version, key) = LinkPreamble::parse(&buf).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownProtocolVersion {
                expected: ProtoVersion { major: 0, minor: 4 },
                received: ProtoVersion { major: 1, minor: 5 },
            }
        ));
        assert_eq!(version, Some(ProtoVersion { major: 1, minor: 5 }));
        assert_eq!(key, Some(PeerPublicKey::from_bytes([3u8; PEER_KEY_LEN])));
    }
}
