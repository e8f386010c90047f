//! Turns caller input into a validated absolute target

use std::fmt;
use url::Url;

use crate::{codec, error::ProxyError, navigation::SearchEngine};

/// Scheme and authority of the target, the base for relative references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: String,
    /// Host, with the port when it is not the scheme default
    pub host: String,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// What to fetch for one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReference {
    raw_input: String,
    resolved_url: Url,
    origin: Origin,
    search_query: bool,
}

impl TargetReference {
    fn new(raw_input: &str, resolved_url: Url, search_query: bool) -> Result<Self, ProxyError> {
        let host = resolved_url
            .host_str()
            .ok_or_else(|| ProxyError::invalid_url(raw_input))?;
        let host = match resolved_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(Self {
            raw_input: raw_input.to_string(),
            origin: Origin {
                scheme: resolved_url.scheme().to_string(),
                host,
            },
            resolved_url,
            search_query,
        })
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    pub fn resolved_url(&self) -> &Url {
        &self.resolved_url
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// True when the input was free text turned into a search
    pub fn is_search_query(&self) -> bool {
        self.search_query
    }
}

fn parse_http(candidate: &str) -> Option<Url> {
    Url::parse(candidate)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

/// Resolve raw caller input.
///
/// Order: proxy token, the input as written, its percent-decoded form, and
/// finally free text, which becomes a search on `search`. Inputs that carry
/// a scheme separator or start with `/` but still fail to parse, and inputs
/// naming a non-http(s) scheme, are rejected.
pub fn resolve(raw_input: &str, search: &SearchEngine) -> Result<TargetReference, ProxyError> {
    let raw = raw_input.trim();
    if raw.is_empty() {
        return Err(ProxyError::invalid_url(raw_input));
    }

    if let Some(url) = codec::decode_token(raw).as_deref().and_then(parse_http) {
        return TargetReference::new(raw_input, url, false);
    }
    if let Some(url) = parse_http(raw) {
        return TargetReference::new(raw_input, url, false);
    }

    let candidate = codec::decode(raw);
    let candidate = candidate.trim();
    if let Some(url) = parse_http(candidate) {
        return TargetReference::new(raw_input, url, false);
    }

    let names_other_scheme = !candidate.contains(char::is_whitespace)
        && Url::parse(candidate).is_ok_and(|url| !matches!(url.scheme(), "http" | "https"));
    if candidate.contains("://") || candidate.starts_with('/') || names_other_scheme {
        return Err(ProxyError::invalid_url(raw_input));
    }

    TargetReference::new(raw_input, search.query_url(candidate), true)
}
