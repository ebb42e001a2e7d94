use crate::key::PeerPublicKey;

/// A set of permitted peer public keys.
///
/// `None` means allow-all; `Some(vec![])` means deny-all. Kept as a
/// plain slice scanned linearly with a constant-time element comparison
/// rather than a hash set: the list is expected to be small (a handful
/// of pinned peers), so a hash set buys nothing and a slice keeps the
/// constant-time guarantee simple to reason about.
#[derive(Debug, Clone, Default)]
pub struct AllowList(Option<Vec<PeerPublicKey>>);

impl AllowList {
    /// The allow-all list.
    pub fn allow_all() -> Self {
        Self(None)
    }

    /// The deny-all list.
    pub fn deny_all() -> Self {
        Self(Some(Vec::new()))
    }

    pub fn new(keys: Vec<PeerPublicKey>) -> Self {
        Self(Some(keys))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// `true` iff `self` is allow-all, or `key` is present and matches an
    /// entry under constant-time comparison. A missing `key` is never
    /// allowed once the list is non-null.
    pub fn is_allowed(&self, key: Option<&PeerPublicKey>) -> bool {
        let Some(keys) = &self.0 else {
            return true;
        };
        let Some(key) = key else {
            return false;
        };
        keys.iter().any(|candidate| candidate == key)
    }

    /// Returns a copy of `self` with `extra` keys appended. If `self` is
    /// null but `extra` is non-empty, the result is exactly `extra`; if
    /// both are empty the result stays null (allow-all).
    pub fn extended_with(&self, extra: &[PeerPublicKey]) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        let mut keys = self.0.clone().unwrap_or_default();
        keys.extend_from_slice(extra);
        Self(Some(keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PeerPublicKey {
        PeerPublicKey::from_bytes([byte; 32])
    }

    #[test]
    fn null_allows_everything_including_absent_key() {
        let list = AllowList::allow_all();
        assert!(list.is_allowed(Some(&key(1))));
        assert!(list.is_allowed(None));
    }

    #[test]
    fn empty_denies_everything() {
        let list = AllowList::deny_all();
        assert!(!list.is_allowed(Some(&key(1))));
        assert!(!list.is_allowed(None));
    }

    #[test]
    fn non_empty_allows_only_members() {
        let list = AllowList::new(vec![key(1), key(2)]);
        assert!(list.is_allowed(Some(&key(1))));
        assert!(!list.is_allowed(Some(&key(3))));
        assert!(!list.is_allowed(None));
    }

    #[test]
    fn extended_with_on_null_base_becomes_exactly_the_extra_keys() {
        let list = AllowList::allow_all().extended_with(&[key(5)]);
        assert!(list.is_allowed(Some(&key(5))));
        assert!(!list.is_allowed(Some(&key(6))));
    }

    #[test]
    fn extended_with_no_extra_keys_is_unchanged() {
        let list = AllowList::allow_all().extended_with(&[]);
        assert!(list.is_null());
    }
}
