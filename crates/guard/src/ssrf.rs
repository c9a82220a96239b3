use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::net::lookup_host;
use tracing::debug;
use url::{Host, Url};

use sift_core::SiftError;

/// Hostnames that point at the local machine without touching DNS.
fn is_local_alias(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    host.eq_ignore_ascii_case("localhost")
        || host.eq_ignore_ascii_case("localhost.localdomain")
        || host.eq_ignore_ascii_case("ip6-localhost")
        || host.to_ascii_lowercase().ends_with(".localhost")
}

/// Why an address must never be fetched, or None if it is publicly
/// routable. Checked for every resolved address and after every redirect.
pub fn blocked_ip_reason(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return blocked_v4(mapped);
            }
            blocked_v6(v6)
        }
    }
}

fn blocked_v4(ip: Ipv4Addr) -> Option<&'static str> {
    if ip == Ipv4Addr::new(169, 254, 169, 254) {
        return Some("cloud metadata");
    }
    if ip.is_loopback() {
        return Some("loopback");
    }
    if ip.is_link_local() {
        return Some("link-local");
    }
    if ip.is_private() {
        return Some("private");
    }
    if ip.is_multicast() {
        return Some("multicast");
    }
    if ip.is_unspecified() {
        return Some("unspecified");
    }
    if ip.is_broadcast() {
        return Some("broadcast");
    }
    None
}

fn blocked_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if ip == "fd00:ec2::254".parse::<Ipv6Addr>().expect("literal") {
        return Some("cloud metadata");
    }
    if ip.is_loopback() {
        return Some("loopback");
    }
    if ip.is_unspecified() {
        return Some("unspecified");
    }
    if ip.is_multicast() {
        return Some("multicast");
    }
    let seg0 = ip.segments()[0];
    // fe80::/10
    if seg0 & 0xffc0 == 0xfe80 {
        return Some("link-local");
    }
    // fc00::/7 unique local
    if seg0 & 0xfe00 == 0xfc00 {
        return Some("private");
    }
    None
}

/// Resolve the URL's host and verify that no resolved address falls in a
/// blocked range. Raw IP literals are checked directly; local-machine
/// aliases never reach DNS. Returns the vetted addresses.
pub async fn ensure_public_address(url: &Url) -> Result<Vec<IpAddr>, SiftError> {
    let host = url
        .host()
        .ok_or_else(|| SiftError::InvalidUrl(format!("{url}: missing host")))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let addrs: Vec<IpAddr> = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(name) => {
            if is_local_alias(name) {
                return Err(SiftError::SsrfBlocked(format!("{name} is a local alias")));
            }
            let resolved = lookup_host((name, port))
                .await
                .map_err(|e| SiftError::Fetch(format!("dns lookup for {name} failed: {e}")))?
                .map(|sa| sa.ip())
                .collect::<Vec<_>>();
            if resolved.is_empty() {
                return Err(SiftError::Fetch(format!("dns lookup for {name} returned no addresses")));
            }
            resolved
        }
    };

    for ip in &addrs {
        if let Some(reason) = blocked_ip_reason(*ip) {
            debug!(url = %url, ip = %ip, reason, "blocked address");
            return Err(SiftError::SsrfBlocked(format!("{ip} ({reason})")));
        }
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(s: &str) -> Option<&'static str> {
        blocked_ip_reason(s.parse().unwrap())
    }

    #[test]
    fn blocks_the_documented_ranges() {
        assert_eq!(blocked("127.0.0.1"), Some("loopback"));
        assert_eq!(blocked("127.8.8.8"), Some("loopback"));
        assert_eq!(blocked("169.254.169.254"), Some("cloud metadata"));
        assert_eq!(blocked("169.254.0.10"), Some("link-local"));
        assert_eq!(blocked("10.0.0.1"), Some("private"));
        assert_eq!(blocked("172.16.5.5"), Some("private"));
        assert_eq!(blocked("192.168.1.1"), Some("private"));
        assert_eq!(blocked("224.0.0.1"), Some("multicast"));
        assert_eq!(blocked("0.0.0.0"), Some("unspecified"));
        assert_eq!(blocked("::1"), Some("loopback"));
        assert_eq!(blocked("::"), Some("unspecified"));
        assert_eq!(blocked("fe80::1"), Some("link-local"));
        assert_eq!(blocked("fc00::1"), Some("private"));
        assert_eq!(blocked("fd12::34"), Some("private"));
        assert_eq!(blocked("fd00:ec2::254"), Some("cloud metadata"));
        assert_eq!(blocked("ff02::1"), Some("multicast"));
        // v4-mapped v6 can't smuggle a blocked v4 through.
        assert_eq!(blocked("::ffff:127.0.0.1"), Some("loopback"));
    }

    #[test]
    fn allows_public_addresses() {
        assert_eq!(blocked("8.8.8.8"), None);
        assert_eq!(blocked("93.184.216.34"), None);
        assert_eq!(blocked("2606:4700::1111"), None);
    }

    #[tokio::test]
    async fn rejects_ip_literals_without_dns() {
        for raw in [
            "http://127.0.0.1/admin",
            "http://169.254.169.254/latest/meta-data/",
            "http://[::1]:8080/",
            "http://192.168.0.1/",
        ] {
            let url = Url::parse(raw).unwrap();
            let err = ensure_public_address(&url).await.unwrap_err();
            assert!(matches!(err, SiftError::SsrfBlocked(_)), "{raw} should be blocked");
        }
    }

    #[tokio::test]
    async fn rejects_localhost_aliases() {
        for raw in ["http://localhost/", "http://LOCALHOST:3000/x", "http://foo.localhost/"] {
            let url = Url::parse(raw).unwrap();
            let err = ensure_public_address(&url).await.unwrap_err();
            assert!(matches!(err, SiftError::SsrfBlocked(_)), "{raw} should be blocked");
        }
    }
}
