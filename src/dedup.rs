use std::sync::Arc;

use ahash::HashMap;
use parking_lot::Mutex;

use crate::{key::PeerPublicKey, security::SecurityLevel};

/// A callback stored alongside a registry entry and invoked whenever that
/// entry is removed, whether by preemption or by the owning connection's
/// own release.
///
/// Must do only non-blocking work and must never call back into the
/// manager synchronously (no `release` from inside here). The
/// recommended realization latches a failure error on the owning
/// `HandshakeConn` and closes its stream.
pub type CloseCallback = Box<dyn Fn() + Send + Sync>;

struct Entry {
    security_level: SecurityLevel,
    close: Option<CloseCallback>,
    connection_id: u64,
}

struct Inner {
    connections: HashMap<String, Entry>,
    next_connection_id: u64,
    secure_mode: bool,
    self_block_key: Option<PeerPublicKey>,
}

/// Process-wide registry admitting at most one active connection per peer
/// identity.
///
/// `check`/`release` are serialized through a single `parking_lot::Mutex`,
/// matching the lock discipline `service::session::SessionManager` uses
/// for its own registries. Peer keys are tracked by their hex string form
/// rather than requiring `PeerPublicKey` to be hashable.
pub struct DeduplicationManager {
    inner: Mutex<Inner>,
}

/// A token returned by [`DeduplicationManager::check`] on admission.
///
/// Dropping it does nothing by itself; call [`ReleaseHandle::release`]
/// from the owning connection's close path. It is safe to call `release`
/// more than once: a stale release (the registry no longer holds this
/// connection id) is a no-op.
pub struct ReleaseHandle {
    manager: Arc<DeduplicationManager>,
    peer_key_hex: String,
    connection_id: u64,
}

impl ReleaseHandle {
    pub fn release(&self) {
        self.manager.release(&self.peer_key_hex, self.connection_id);
    }
}

impl DeduplicationManager {
    pub fn new(secure_mode: bool, self_block_key: Option<PeerPublicKey>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                connections: HashMap::default(),
                next_connection_id: 0,
                secure_mode,
                self_block_key,
            }),
        })
    }

    /// Admits, refuses, or preempts a connection announcing `peer_key`.
    ///
    /// Returns `None` when the connection is refused (self-connection,
    /// duplicate in non-secure mode, or not strictly stronger than the
    /// incumbent in secure mode). Returns `Some(handle)` on admission;
    /// the caller must call [`ReleaseHandle::release`] exactly once, when
    /// its connection closes.
    pub fn check(
        self: &Arc<Self>,
        peer_key: PeerPublicKey,
        security_level: SecurityLevel,
        close: CloseCallback,
    ) -> Option<ReleaseHandle> {
        let mut inner = self.inner.lock();

        if let Some(block_key) = inner.self_block_key {
            if block_key == peer_key {
                return None;
            }
        }

        let peer_key_hex = peer_key.to_hex();

        match inner.connections.get_mut(&peer_key_hex) {
            None => {
                let connection_id = inner.next_connection_id;
                inner.next_connection_id += 1;
                inner.connections.insert(
                    peer_key_hex.clone(),
                    Entry {
                        security_level,
                        close: Some(close),
                        connection_id,
                    },
                );
                Some(ReleaseHandle {
                    manager: self.clone(),
                    peer_key_hex,
                    connection_id,
                })
            }
            Some(existing) => {
                if !inner.secure_mode {
                    return None;
                }
                if security_level > existing.security_level {
                    if let Some(evict) = existing.close.take() {
                        evict();
                    }
                    let connection_id = inner.next_connection_id;
                    inner.next_connection_id += 1;
                    inner.connections.insert(
                        peer_key_hex.clone(),
                        Entry {
                            security_level,
                            close: Some(close),
                            connection_id,
                        },
                    );
                    Some(ReleaseHandle {
                        manager: self.clone(),
                        peer_key_hex,
                        connection_id,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn release(&self, peer_key_hex: &str, connection_id: u64) {
        let close = {
            let mut inner = self.inner.lock();
            let matches_current = matches!(
                inner.connections.get(peer_key_hex),
                Some(entry) if entry.connection_id == connection_id
            );
            if !matches_current {
                return;
            }
            let entry = inner.connections.remove(peer_key_hex).expect("checked above");
            entry.close
        };
        if let Some(close) = close {
            close();
        }
    }

    #[cfg(test)]
    fn contains(&self, peer_key: &PeerPublicKey) -> bool {
        self.inner.lock().connections.contains_key(&peer_key.to_hex())
    }
}
