use std::{net::IpAddr, sync::Arc};

use crate::error::Error;

/// The mesh's own address-space membership test.
///
/// The core has no notion of the overlay's address allocation scheme, so
/// it is handed a predicate, `is_overlay_address(ip) -> bool`, and only
/// orchestrates when that predicate gets consulted.
pub trait OverlayAddressSpace: Send + Sync {
    /// Returns `true` if `ip`, viewed as a 16-byte address, lies within
    /// the overlay's own address or subnet prefix.
    fn contains(&self, ip: IpAddr) -> bool;
}

impl<F> OverlayAddressSpace for F
where
    F: Fn(IpAddr) -> bool + Send + Sync,
{
    fn contains(&self, ip: IpAddr) -> bool {
        self(ip)
    }
}

/// A predicate that never matches, used when the embedder has no overlay
/// address space to defend (or in tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlayAddressSpace;

impl OverlayAddressSpace for NoOverlayAddressSpace {
    fn contains(&self, _ip: IpAddr) -> bool {
        false
    }
}

/// Rejects dialing or accepting into the overlay's own address space,
/// preventing routing loops.
///
/// Applied before dialing directly, on the resolved proxy endpoint when
/// dialing through a proxy, and again on both endpoints of the
/// established socket post-connect (the post-SOCKS leak guard).
#[derive(Clone)]
pub struct AddressGuard {
    space: Arc<dyn OverlayAddressSpace>,
}

impl AddressGuard {
    pub fn new(space: Arc<dyn OverlayAddressSpace>) -> Self {
        Self { space }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoOverlayAddressSpace))
    }

    /// Returns `Error::UnacceptableAddress` iff `ip` lies within the
    /// overlay's own address space.
    pub fn check(&self, ip: IpAddr) -> Result<(), Error> {
        if self.space.contains(ip) {
            Err(Error::UnacceptableAddress(format!(
                "{ip} routes into the overlay's own address space"
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn disabled_guard_accepts_everything() {
        let guard = AddressGuard::disabled();
        assert!(guard.check(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))).is_ok());
    }

    #[test]
    fn guard_rejects_matching_predicate() {
        let guard = AddressGuard::new(Arc::new(|ip: IpAddr| ip == Ipv4Addr::new(10, 0, 0, 1)));
        assert!(guard.check(Ipv4Addr::new(10, 0, 0, 1).into()).is_err());
        assert!(guard.check(Ipv4Addr::new(10, 0, 0, 2).into()).is_ok());
    }
}
