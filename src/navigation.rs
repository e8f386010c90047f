//! Reference resolution and navigation rules
//!
//! The markup rewriter applies these rules to the delivered document and the
//! interceptor script (`interceptor.js`) applies the same rules in the page to
//! anything discovered later. Both sides must agree, so any change here has a
//! counterpart in the script.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use url::Url;

use crate::{codec::has_http_scheme, rewriter::RewriteContext};

/// Query parameters the search engine's own form adds to a submission
pub const SEARCH_FORM_MARKERS: &[&str] = &["sca_esv", "source", "ei"];

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("static regex"));

/// Shape of a reference found in markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    Empty,
    Fragment,
    /// Non-http(s) scheme such as `javascript:`, `mailto:`, `data:`; value is lowercased
    OtherScheme(String),
    ProtocolRelative,
    RootRelative,
    Absolute,
    Relative,
}

impl ReferenceKind {
    /// Whether the reference leads to an http(s) document the proxy can fetch
    pub fn is_navigable(&self) -> bool {
        matches!(
            self,
            ReferenceKind::ProtocolRelative
                | ReferenceKind::RootRelative
                | ReferenceKind::Absolute
                | ReferenceKind::Relative
        )
    }
}

pub fn classify(reference: &str) -> ReferenceKind {
    let r = reference.trim();
    if r.is_empty() {
        ReferenceKind::Empty
    } else if r.starts_with('#') {
        ReferenceKind::Fragment
    } else if r.starts_with("//") {
        ReferenceKind::ProtocolRelative
    } else if r.starts_with('/') {
        ReferenceKind::RootRelative
    } else if has_http_scheme(r) {
        ReferenceKind::Absolute
    } else if let Some(m) = SCHEME.find(r) {
        ReferenceKind::OtherScheme(m.as_str().trim_end_matches(':').to_ascii_lowercase())
    } else {
        ReferenceKind::Relative
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NotNavigable(ReferenceKind),
    Parse(url::ParseError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotNavigable(kind) => write!(f, "not navigable: {:?}", kind),
            ResolveError::Parse(err) => write!(f, "unparseable reference: {}", err),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<url::ParseError> for ResolveError {
    fn from(err: url::ParseError) -> Self {
        ResolveError::Parse(err)
    }
}

/// Resolve `reference` to an absolute URL against the document at `origin`.
///
/// * `//host/x` takes the origin's scheme
/// * `/x` takes the origin's scheme, host and port
/// * `http(s)://...` is used as is
/// * anything else resolves against the origin's directory
pub fn resolve_reference(reference: &str, origin: &Url) -> Result<Url, ResolveError> {
    let r = reference.trim();
    let url = match classify(r) {
        ReferenceKind::ProtocolRelative => Url::parse(&format!("{}:{}", origin.scheme(), r))?,
        ReferenceKind::RootRelative => {
            let host = origin.host_str().ok_or(url::ParseError::EmptyHost)?;
            let authority = match origin.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            Url::parse(&format!("{}://{}{}", origin.scheme(), authority, r))?
        }
        ReferenceKind::Absolute => Url::parse(r)?,
        ReferenceKind::Relative => origin.join(r)?,
        kind => return Err(ResolveError::NotNavigable(kind)),
    };
    Ok(url)
}

/// The search engine used for free-text input and search form recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEngine {
    host: String,
    search_base: Url,
}

impl SearchEngine {
    pub fn new(host: &str) -> Result<Self, url::ParseError> {
        let search_base = Url::parse(&format!("https://{}/search", host.trim()))?;
        let host = search_base
            .host_str()
            .ok_or(url::ParseError::EmptyHost)?
            .to_string();
        Ok(Self { host, search_base })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `https://<host>/search`, without a query
    pub fn search_base(&self) -> &Url {
        &self.search_base
    }

    /// Search URL for a free-text query, form-urlencoded
    pub fn query_url(&self, query: &str) -> Url {
        let mut url = self.search_base.clone();
        url.query_pairs_mut().append_pair("q", query);
        url
    }

    /// True when `url` is served by this engine or one of its subdomains
    pub fn matches(&self, url: &Url) -> bool {
        let base = self.host.strip_prefix("www.").unwrap_or(&self.host);
        url.host_str().is_some_and(|host| {
            host.eq_ignore_ascii_case(base)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", base.to_ascii_lowercase()))
        })
    }

    /// True for the engine's own search results endpoint
    pub fn is_search_action(&self, url: &Url) -> bool {
        self.matches(url) && url.path().starts_with("/search")
    }

    /// Replace an engine `/url?q=<target>` redirect link with its destination
    pub fn unwrap_redirect(&self, url: Url) -> Url {
        if !self.matches(&url) || url.path() != "/url" {
            return url;
        }
        let destination = url
            .query_pairs()
            .filter(|(key, _)| key == "url" || key == "q")
            .map(|(_, value)| value.into_owned())
            .find(|value| has_http_scheme(value))
            .and_then(|value| Url::parse(&value).ok());
        destination.unwrap_or(url)
    }
}

/// Proxy link for a navigable reference, or `None` when the reference must
/// stay as written (fragment, special scheme, already proxied, unresolvable).
pub fn proxify(reference: &str, ctx: &RewriteContext) -> Option<String> {
    let r = reference.trim();
    if ctx.proxy.is_proxied(r) || !classify(r).is_navigable() {
        return None;
    }
    let absolute = resolve_reference(r, &ctx.origin_url).ok()?;
    let target = ctx.search.unwrap_redirect(absolute);
    Some(ctx.proxy.encode(target.as_str()))
}

/// Absolute direct form for a subresource reference, or `None` to leave it
pub fn absolutize(reference: &str, ctx: &RewriteContext) -> Option<String> {
    resolve_reference(reference, &ctx.origin_url)
        .ok()
        .map(String::from)
}
