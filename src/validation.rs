//! Target validation and SSRF protection

use std::net::IpAddr;
use tokio::net::lookup_host;
use url::Url;

use crate::config::Config;
use crate::error::ProxyError;

/// Allowed URL schemes for outgoing requests
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Blocked hostnames (case-insensitive)
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal", // GCP metadata
    "metadata.google.com",      // GCP metadata alt
    "instance-data",            // AWS metadata hostname
];

/// Validate a resolved target before any outbound request is made
///
/// Checks:
/// 1. URL scheme is http or https
/// 2. Hostname is not on blocklist
/// 3. Literal or resolved IP is not in private/internal ranges (unless allowed)
pub async fn validate_target(url: &Url, config: &Config) -> Result<(), ProxyError> {
    let scheme = url.scheme();
    if !ALLOWED_SCHEMES.contains(&scheme) {
        return Err(ProxyError::invalid_request(format!(
            "URL scheme '{}' not allowed. Only http and https are permitted.",
            scheme
        )));
    }

    let Some(host) = url.host_str() else {
        return Err(ProxyError::invalid_request("URL must have a valid hostname."));
    };
    let host_lower = host.to_lowercase();

    if BLOCKED_HOSTNAMES.iter().any(|&blocked| host_lower == blocked)
        || host_lower.ends_with(".localhost")
    {
        return Err(ProxyError::invalid_request(format!(
            "Hostname '{}' is blocked for security reasons.",
            host
        )));
    }

    if config.allow_private_ips {
        return Ok(());
    }

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_ip_blocked(&ip, config) {
            return Err(ProxyError::invalid_request(format!(
                "IP address '{}' is blocked. Private/internal IPs are not allowed.",
                ip
            )));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    // If DNS resolution fails here the fetch reports it with a proper error code
    if let Ok(addrs) = lookup_host((host, port)).await {
        for addr in addrs {
            if is_ip_blocked(&addr.ip(), config) {
                return Err(ProxyError::invalid_request(format!(
                    "Hostname '{}' resolves to blocked IP '{}'. Private/internal IPs are not allowed.",
                    host,
                    addr.ip()
                )));
            }
        }
    }

    Ok(())
}

/// Configured ranges plus the always-blocked special-purpose networks
fn is_ip_blocked(ip: &IpAddr, config: &Config) -> bool {
    if config.blocked_ip_ranges.iter().any(|range| range.contains(ip)) {
        return true;
    }

    match ip {
        // 0.0.0.0/8 current network, 224.0.0.0/4 multicast, 240.0.0.0/4 reserved
        IpAddr::V4(v4) => matches!(v4.octets()[0], 0 | 224..=255),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(mapped) => is_ip_blocked(&IpAddr::V4(mapped), config),
            None => {
                let head = v6.segments()[0];
                // fe80::/10 link-local, fc00::/7 unique local
                (head & 0xffc0) == 0xfe80 || (head & 0xfe00) == 0xfc00 || v6.is_unspecified()
            }
        },
    }
}

/// Sanitize a URL for logging by removing credentials
pub fn sanitize_url_for_logging(url: &Url) -> String {
    let mut url = url.clone();
    if !url.username().is_empty() || url.password().is_some() {
        let _ = url.set_username("***");
        let _ = url.set_password(Some("***"));
    }
    url.to_string()
}
