use std::net::IpAddr;

use crate::failure::FailureConfig;
use crate::glob::glob_match;

/// Check a single allow/block list entry against a client IP.
///
/// Entries come in three shapes: an exact address (`192.168.1.100`), a CIDR
/// block (`10.0.0.0/8`), or a glob pattern (`192.168.*`). Unparseable
/// entries never match.
pub fn entry_matches(entry: &str, ip: IpAddr) -> bool {
    let entry = entry.trim();

    if let Ok(exact) = entry.parse::<IpAddr>() {
        return exact == ip;
    }
    if entry.contains('/') {
        return entry
            .parse::<ipnet::IpNet>()
            .map(|net| net.contains(&ip))
            .unwrap_or(false);
    }
    if entry.contains('*') || entry.contains('?') {
        return glob_match(entry, &ip.to_string());
    }
    false
}

/// Evaluate the IP filter stage for one client.
///
/// Blocklist wins over allowlist; an empty allowlist admits everyone the
/// blocklist did not reject. Only consulted when `ip_filtering_enabled`.
pub fn is_allowed(config: &FailureConfig, ip: IpAddr) -> bool {
    if !config.ip_filtering_enabled {
        return true;
    }

    if !config.ip_blocklist.is_empty()
        && config.ip_blocklist.iter().any(|e| entry_matches(e, ip))
    {
        return false;
    }

    if !config.ip_allowlist.is_empty()
        && !config.ip_allowlist.iter().any(|e| entry_matches(e, ip))
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn exact_entry() {
        assert!(entry_matches("192.168.1.100", ip("192.168.1.100")));
        assert!(!entry_matches("192.168.1.100", ip("192.168.1.101")));
    }

    #[test]
    fn cidr_entry() {
        assert!(entry_matches("10.0.0.0/8", ip("10.200.3.4")));
        assert!(!entry_matches("10.0.0.0/8", ip("11.0.0.1")));
        assert!(!entry_matches("10.0.0.0/40", ip("10.0.0.1")));
    }

    #[test]
    fn glob_entry() {
        assert!(entry_matches("192.168.1.*", ip("192.168.1.42")));
        assert!(!entry_matches("192.168.1.*", ip("192.168.2.42")));
        assert!(entry_matches("*", ip("8.8.8.8")));
    }

    #[test]
    fn disabled_filter_allows_everything() {
        let cfg = FailureConfig {
            ip_blocklist: vec!["*".to_string()],
            ..Default::default()
        };
        assert!(is_allowed(&cfg, ip("1.2.3.4")));
    }

    #[test]
    fn blocklist_rejects_match() {
        let cfg = FailureConfig {
            ip_filtering_enabled: true,
            ip_blocklist: vec!["192.168.1.100".to_string()],
            ..Default::default()
        };
        assert!(!is_allowed(&cfg, ip("192.168.1.100")));
        assert!(is_allowed(&cfg, ip("192.168.1.101")));
    }

    #[test]
    fn allowlist_rejects_non_members() {
        let cfg = FailureConfig {
            ip_filtering_enabled: true,
            ip_allowlist: vec!["10.0.0.0/24".to_string()],
            ..Default::default()
        };
        assert!(is_allowed(&cfg, ip("10.0.0.77")));
        assert!(!is_allowed(&cfg, ip("10.0.1.77")));
    }

    #[test]
    fn blocklist_wins_over_allowlist() {
        let cfg = FailureConfig {
            ip_filtering_enabled: true,
            ip_allowlist: vec!["10.0.0.0/8".to_string()],
            ip_blocklist: vec!["10.0.0.5".to_string()],
            ..Default::default()
        };
        assert!(!is_allowed(&cfg, ip("10.0.0.5")));
        assert!(is_allowed(&cfg, ip("10.0.0.6")));
    }

    #[test]
    fn ipv6_exact_and_cidr() {
        let cfg = FailureConfig {
            ip_filtering_enabled: true,
            ip_blocklist: vec!["2001:db8::/32".to_string()],
            ..Default::default()
        };
        assert!(!is_allowed(&cfg, ip("2001:db8::1")));
        assert!(is_allowed(&cfg, ip("2001:db9::1")));
    }
}
