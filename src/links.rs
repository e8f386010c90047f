//! Self-referential proxy links
//!
//! A proxy link is `<proxy base>/proxy?u=<token>` where the token is the
//! [`codec`](crate::codec) encoding of the normalized absolute target URL.

use url::Url;

use crate::codec;

/// Path of the rewriting route, relative to the proxy base
pub const PROXY_PATH: &str = "/proxy";

/// The externally visible rewriting endpoint of this proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    endpoint: String,
}

impl ProxyEndpoint {
    /// Build the endpoint from the proxy's base URL (scheme, host, optional prefix)
    pub fn new(base: &Url) -> Self {
        let mut base = base.clone();
        base.set_query(None);
        base.set_fragment(None);
        Self {
            endpoint: format!("{}{}", base.as_str().trim_end_matches('/'), PROXY_PATH),
        }
    }

    /// Full endpoint URL, e.g. `https://p.test/proxy`
    pub fn as_str(&self) -> &str {
        &self.endpoint
    }

    /// Wrap an absolute http(s) URL into a proxy link.
    ///
    /// Anything that does not parse as an absolute http(s) URL is returned
    /// unchanged, so a malformed reference degrades to a dead link.
    pub fn encode(&self, target: &str) -> String {
        match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                format!("{}?u={}", self.endpoint, codec::encode(url.as_str()))
            }
            _ => target.to_string(),
        }
    }

    /// True if `value` already points at this endpoint
    pub fn is_proxied(&self, value: &str) -> bool {
        value
            .strip_prefix(self.endpoint.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('?'))
    }

    /// Recover the target carried by a proxy link.
    ///
    /// Accepts `u` (token), `url` (plain) and `q` (free text) parameters.
    /// Any other input, including absolute and relative URLs that are not
    /// proxy links, is returned unchanged.
    pub fn decode(&self, link: &str) -> String {
        if !self.is_proxied(link) {
            return link.to_string();
        }
        let Ok(parsed) = Url::parse(link) else {
            return link.to_string();
        };
        let mut fallback = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "u" => return codec::decode(&value),
                "url" | "q" if fallback.is_none() => fallback = Some(value.into_owned()),
                _ => {}
            }
        }
        fallback.unwrap_or_else(|| link.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> ProxyEndpoint {
        ProxyEndpoint::new(&Url::parse("https://p.test").unwrap())
    }

    #[test]
    fn test_endpoint_from_base() {
        assert_eq!(endpoint().as_str(), "https://p.test/proxy");
        let prefixed = ProxyEndpoint::new(&Url::parse("https://p.test/app/").unwrap());
        assert_eq!(prefixed.as_str(), "https://p.test/app/proxy");
    }

    #[test]
    fn test_round_trip_normalizes() {
        let ep = endpoint();
        for (input, normalized) in [
            ("https://example.com", "https://example.com/"),
            ("http://example.com/a?b=c", "http://example.com/a?b=c"),
            ("https://EXAMPLE.com/a#frag", "https://example.com/a#frag"),
            ("https://example.com:443/x", "https://example.com/x"),
        ] {
            let link = ep.encode(input);
            assert!(ep.is_proxied(&link));
            assert_eq!(ep.decode(&link), normalized);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let ep = endpoint();
        assert_eq!(
            ep.encode("https://example.com/about"),
            ep.encode("https://example.com/about")
        );
    }

    #[test]
    fn test_encode_fails_open() {
        let ep = endpoint();
        assert_eq!(ep.encode("not a url"), "not a url");
        assert_eq!(ep.encode("mailto:a@b.com"), "mailto:a@b.com");
        assert_eq!(ep.encode("http://[::1"), "http://[::1");
    }

    #[test]
    fn test_decode_identity_for_non_proxy_links() {
        let ep = endpoint();
        assert_eq!(ep.decode("https://other.example/x"), "https://other.example/x");
        assert_eq!(ep.decode("relative/path"), "relative/path");
        assert_eq!(ep.decode("https://p.test/proxyish"), "https://p.test/proxyish");
    }

    #[test]
    fn test_decode_plain_url_parameter() {
        let ep = endpoint();
        assert_eq!(
            ep.decode("https://p.test/proxy?url=https%3A%2F%2Fa.example%2F"),
            "https://a.example/"
        );
        assert_eq!(ep.decode("https://p.test/proxy?q=cats"), "cats");
    }
}
