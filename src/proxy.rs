use regex::Regex;
use url::Url;

/// One entry of a [`ProxyRouter`]'s ordered rule table: dials whose host
/// matches `host_regex` are routed through `proxy` (or direct, if
/// `proxy` is `None`).
pub struct ProxyMapping {
    pub host_regex: Regex,
    pub proxy: Option<Url>,
}

impl ProxyMapping {
    pub fn new(host_regex: Regex, proxy: Option<Url>) -> Self {
        Self { host_regex, proxy }
    }
}

/// Maps a destination URI to a proxy URI via a default plus an ordered
/// list of host-regex rules, first match wins.
///
/// Grounded on `original_source/proxy_manager.go`'s `ProxyManager`: no
/// anchoring is imposed on the regex (a bare substring match, same as Go's
/// `regexp.MatchString` used there), and a `None` proxy, whether from a
/// matched rule or the fallthrough default, means a direct connection.
#[derive(Default)]
pub struct ProxyRouter {
    default_proxy: Option<Url>,
    mappings: Vec<ProxyMapping>,
}

impl ProxyRouter {
    pub fn new(default_proxy: Option<Url>, mappings: Vec<ProxyMapping>) -> Self {
        Self {
            default_proxy,
            mappings,
        }
    }

    /// Identity router: every dial goes direct.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Resolves the proxy to use for `uri`, or `None` for a direct
    /// connection.
    pub fn proxy_for(&self, uri: &Url) -> Option<Url> {
        let host = uri.host_str().unwrap_or_default();
        for mapping in &self.mappings {
            if mapping.host_regex.is_match(host) {
                return mapping.proxy.clone();
            }
        }
        self.default_proxy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn no_rules_falls_through_to_default() {
        let router = ProxyRouter::new(Some(url("socks5://proxy.example:1080")), vec![]);
        assert_eq!(
            router.proxy_for(&url("tcp://peer.example:1234")),
            Some(url("socks5://proxy.example:1080"))
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let router = ProxyRouter::new(
            Some(url("socks5://default:1080")),
            vec![
                ProxyMapping::new(Regex::new(r"\.onion$").unwrap(), Some(url("socks5://tor:9050"))),
                ProxyMapping::new(Regex::new(r".*").unwrap(), Some(url("socks5://catch-all:1080"))),
            ],
        );
        assert_eq!(
            router.proxy_for(&url("tcp://peer.onion:1234")),
            Some(url("socks5://tor:9050"))
        );
        assert_eq!(
            router.proxy_for(&url("tcp://peer.example:1234")),
            Some(url("socks5://catch-all:1080"))
        );
    }

    #[test]
    fn direct_router_always_returns_none() {
        let router = ProxyRouter::direct();
        assert_eq!(router.proxy_for(&url("tcp://peer.example:1234")), None);
    }

    #[test]
    fn matched_rule_can_force_direct_over_default() {
        let router = ProxyRouter::new(
            Some(url("socks5://default:1080")),
            vec![ProxyMapping::new(Regex::new(r"^lan\.").unwrap(), None)],
        );
        assert_eq!(router.proxy_for(&url("tcp://lan.internal:1234")), None);
    }
}
