//! Response header policy
//!
//! Every response is embeddable (frame-allow), CORS-permissive and
//! uncacheable. Origin headers that describe the origin's own framing of the
//! body are never passed through; the proxy re-frames responses itself.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::profiles::Flavor;

/// Value of `X-Proxy-Source` on every proxied response
pub const PROXY_SOURCE: &str = "frameproxy";

/// Origin response headers that are never forwarded
const STRIPPED_ORIGIN_HEADERS: &[&str] = &[
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
    "upgrade",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
];

/// Origin headers replaced by the proxy's own frame and cache policy
const POLICY_HEADERS: &[&str] = &[
    "x-frame-options",
    "content-security-policy",
    "content-security-policy-report-only",
    "cache-control",
    "pragma",
    "expires",
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
];

const FRAME_CSP: &str = "frame-ancestors 'self' *; default-src 'unsafe-inline' 'unsafe-eval' * data: blob:";

/// Which surface a response is for; drives the CORS method/header lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Frame,
    Relay(Flavor),
    Api,
}

impl Surface {
    fn allow_methods(&self) -> &'static str {
        match self {
            Surface::Frame => "GET, POST, OPTIONS",
            Surface::Relay(Flavor::Standard) => "GET, POST, PUT, DELETE, OPTIONS",
            Surface::Relay(Flavor::Bare) => "GET, POST, PUT, DELETE, OPTIONS, HEAD",
            Surface::Relay(Flavor::Wisp) => "GET, POST, PUT, DELETE, OPTIONS, HEAD, CONNECT",
            Surface::Api => "GET, OPTIONS",
        }
    }

    fn allow_headers(&self) -> &'static str {
        match self {
            Surface::Relay(Flavor::Bare) | Surface::Relay(Flavor::Wisp) => "*",
            Surface::Relay(Flavor::Standard) => "Content-Type, Authorization",
            Surface::Frame | Surface::Api => "Content-Type",
        }
    }
}

/// Drop hop-by-hop and encoding headers from an origin header list
pub fn filter_origin_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !STRIPPED_ORIGIN_HEADERS.contains(&name.as_str())
        })
        .cloned()
        .collect()
}

/// Copy origin headers into a response, minus stripped and policy headers
pub fn forward_origin_headers(target: &mut HeaderMap, origin: &[(String, String)]) {
    for (name, value) in filter_origin_headers(origin) {
        if POLICY_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            target.append(name, value);
        }
    }
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn set_static(headers: &mut HeaderMap, name: &'static str, value: &'static str) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
}

pub fn apply_cors(headers: &mut HeaderMap, surface: Surface) {
    set_static(headers, "access-control-allow-origin", "*");
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(surface.allow_methods()),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(surface.allow_headers()),
    );
    match surface {
        Surface::Relay(Flavor::Bare) => set_static(headers, "access-control-expose-headers", "*"),
        Surface::Relay(Flavor::Wisp) => {
            set_static(headers, "access-control-expose-headers", "*");
            set_static(headers, "access-control-allow-credentials", "true");
        }
        _ => {}
    }
}

pub fn apply_frame_policy(headers: &mut HeaderMap) {
    set_static(headers, "x-frame-options", "ALLOWALL");
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(FRAME_CSP),
    );
}

pub fn apply_no_store(headers: &mut HeaderMap) {
    set_static(headers, "cache-control", "no-cache, no-store, must-revalidate");
    set_static(headers, "pragma", "no-cache");
    set_static(headers, "expires", "0");
}

/// Details surfaced in the identification headers of a framed page
#[derive(Debug, Clone)]
pub struct FrameInfo<'a> {
    pub original_url: &'a str,
    pub user_agent: &'a str,
    pub method: &'a str,
}

/// Full decoration for a `/proxy` response
pub fn decorate_frame(headers: &mut HeaderMap, info: &FrameInfo<'_>) {
    apply_frame_policy(headers);
    apply_no_store(headers);
    apply_cors(headers, Surface::Frame);
    set_static(headers, "x-proxy-source", PROXY_SOURCE);
    set_static(headers, "x-proxy-navigation", "intercepted");
    set(headers, HeaderName::from_static("x-original-url"), info.original_url);
    set(headers, HeaderName::from_static("x-proxy-user-agent"), info.user_agent);
    if !info.method.eq_ignore_ascii_case("GET") {
        set(headers, HeaderName::from_static("x-proxy-method"), info.method);
    }
}

/// Flavor identification and CORS for a `/relay` response
pub fn decorate_relay(headers: &mut HeaderMap, flavor: Flavor, status: u16, method: &str) {
    apply_cors(headers, Surface::Relay(flavor));
    apply_no_store(headers);
    set_static(headers, "x-proxy-source", PROXY_SOURCE);
    let status = status.to_string();
    match flavor {
        Flavor::Standard => {}
        Flavor::Bare => {
            set(headers, HeaderName::from_static("x-bare-server"), &server_name());
            set_static(headers, "x-bare-protocol", "1.0.0");
            set(headers, HeaderName::from_static("x-bare-status"), &status);
        }
        Flavor::Wisp => {
            set(headers, HeaderName::from_static("x-wisp-server"), &server_name());
            set_static(headers, "x-wisp-protocol", "1.0");
            set(headers, HeaderName::from_static("x-wisp-status"), &status);
            set(headers, HeaderName::from_static("x-wisp-method"), &method.to_ascii_uppercase());
        }
    }
}

/// Headers on error pages: still embeddable and never cached
pub fn decorate_error(headers: &mut HeaderMap) {
    apply_frame_policy(headers);
    apply_no_store(headers);
    set_static(headers, "access-control-allow-origin", "*");
    set_static(headers, "x-proxy-source", PROXY_SOURCE);
}

/// Headers for an `OPTIONS` preflight on `surface`
pub fn preflight(surface: Surface) -> HeaderMap {
    let mut headers = HeaderMap::new();
    apply_cors(&mut headers, surface);
    set_static(&mut headers, "access-control-max-age", "86400");
    if surface == Surface::Frame {
        set_static(&mut headers, "x-frame-options", "ALLOWALL");
    }
    headers
}

fn server_name() -> String {
    format!("{}/{}", PROXY_SOURCE, env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hop_by_hop_headers_stripped() {
        let origin = pairs(&[
            ("Content-Encoding", "gzip"),
            ("Content-Length", "42"),
            ("Transfer-Encoding", "chunked"),
            ("Connection", "keep-alive"),
            ("Content-Type", "text/plain"),
            ("Set-Cookie", "a=1"),
        ]);
        let kept = filter_origin_headers(&origin);
        assert_eq!(kept, pairs(&[("Content-Type", "text/plain"), ("Set-Cookie", "a=1")]));
    }

    #[test]
    fn test_forward_skips_policy_headers_and_keeps_repeats() {
        let origin = pairs(&[
            ("x-frame-options", "DENY"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
        ]);
        let mut headers = HeaderMap::new();
        forward_origin_headers(&mut headers, &origin);
        assert!(headers.get("x-frame-options").is_none());
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_frame_decoration() {
        let mut headers = HeaderMap::new();
        decorate_frame(
            &mut headers,
            &FrameInfo {
                original_url: "https://example.com/",
                user_agent: "UA",
                method: "POST",
            },
        );
        assert_eq!(headers["x-frame-options"], "ALLOWALL");
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert!(headers["cache-control"].to_str().unwrap().contains("no-store"));
        assert_eq!(headers["x-original-url"], "https://example.com/");
        assert_eq!(headers["x-proxy-method"], "POST");
        assert!(headers["content-security-policy"]
            .to_str()
            .unwrap()
            .contains("frame-ancestors"));
    }

    #[test]
    fn test_relay_flavor_headers() {
        let mut headers = HeaderMap::new();
        decorate_relay(&mut headers, Flavor::Wisp, 201, "post");
        assert_eq!(headers["x-wisp-status"], "201");
        assert_eq!(headers["x-wisp-method"], "POST");
        assert_eq!(headers["access-control-allow-credentials"], "true");

        let mut headers = HeaderMap::new();
        decorate_relay(&mut headers, Flavor::Bare, 200, "GET");
        assert_eq!(headers["x-bare-protocol"], "1.0.0");
        assert!(headers.get("x-wisp-protocol").is_none());
    }

    #[test]
    fn test_preflight_lists_methods() {
        let headers = preflight(Surface::Frame);
        assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
        assert_eq!(headers["access-control-max-age"], "86400");
    }
}
