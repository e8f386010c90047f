//! Configuration module for environment variables

use std::{env, net::IpAddr, str::FromStr};

use url::Url;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Log level (default: info)
    pub log_level: String,
    /// Maximum concurrent outbound fetches (default: 100)
    pub max_concurrent: usize,
    /// Timeout for full-page fetches in seconds (default: 20)
    pub page_timeout: u64,
    /// Timeout for lightweight probe fetches in seconds (default: 5)
    pub probe_timeout: u64,
    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,
    /// Maximum response body size in bytes (default: 50MB)
    pub max_response_body_size: usize,
    /// Server request timeout in seconds (default: 60)
    pub server_timeout: u64,
    /// Redirect hops followed before giving up (default: 10)
    pub max_redirects: usize,
    /// Host of the search engine used for free-text input (default: www.google.com)
    pub search_engine: String,
    /// Externally visible base of this proxy; derived from the request when unset
    pub public_base_url: Option<Url>,
    /// Blocked IP ranges for SSRF protection (internal networks)
    pub blocked_ip_ranges: Vec<IpRange>,
    /// Allow requests to private/internal IPs (default: false)
    pub allow_private_ips: bool,
}

/// Represents an IP range for blocking
#[derive(Debug, Clone)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: IpAddr::from_str(start).ok()?,
            end: IpAddr::from_str(end).ok()?,
        })
    }

    /// Inclusive membership; an address of the other family never matches
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (ip, self.start, self.end) {
            (IpAddr::V4(ip), IpAddr::V4(start), IpAddr::V4(end)) => (start..=end).contains(ip),
            (IpAddr::V6(ip), IpAddr::V6(start), IpAddr::V6(end)) => (start..=end).contains(ip),
            _ => false,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT").unwrap_or(8080),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_concurrent: env_parse("MAX_CONCURRENT").unwrap_or(100),
            page_timeout: env_parse("PAGE_TIMEOUT").unwrap_or(20),
            probe_timeout: env_parse("PROBE_TIMEOUT").unwrap_or(5),
            max_request_body_size: env_parse("MAX_REQUEST_BODY_SIZE")
                .unwrap_or(10 * 1024 * 1024), // 10MB
            max_response_body_size: env_parse("MAX_RESPONSE_BODY_SIZE")
                .unwrap_or(50 * 1024 * 1024), // 50MB
            server_timeout: env_parse("SERVER_TIMEOUT").unwrap_or(60),
            max_redirects: env_parse("MAX_REDIRECTS").unwrap_or(10),
            search_engine: env::var("SEARCH_ENGINE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "www.google.com".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .ok()
                .and_then(|v| Url::parse(v.trim_end_matches('/')).ok()),
            blocked_ip_ranges: Self::default_blocked_ranges(),
            allow_private_ips: env::var("ALLOW_PRIVATE_IPS")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Default blocked IP ranges (RFC 1918, loopback, link-local, etc.)
    fn default_blocked_ranges() -> Vec<IpRange> {
        [
            // Loopback
            ("127.0.0.0", "127.255.255.255"),
            // Private Class A
            ("10.0.0.0", "10.255.255.255"),
            // Private Class B
            ("172.16.0.0", "172.31.255.255"),
            // Private Class C
            ("192.168.0.0", "192.168.255.255"),
            // Link-local, including cloud metadata
            ("169.254.0.0", "169.254.255.255"),
            // Carrier-grade NAT
            ("100.64.0.0", "100.127.255.255"),
            // IPv6 loopback
            ("::1", "::1"),
        ]
        .iter()
        .filter_map(|(start, end)| IpRange::parse(start, end))
        .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
