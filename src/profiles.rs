//! Outbound header profiles and browser emulation
//!
//! A [`HeaderProfile`] is picked per request from a fixed table. Selection
//! takes the RNG as a parameter, so production uses the thread RNG and tests
//! use a seeded one. Emulation names map to `wreq_util::Emulation` variants
//! and give the TLS/HTTP2 fingerprint that matches the user agent.

use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use strum::VariantArray;
use url::Url;
use wreq_util::Emulation;

use crate::navigation::SearchEngine;

const ACCEPT_DOCUMENT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const ACCEPT_DOCUMENT_SHORT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// Headers a caller may never override; the client owns them
const FORBIDDEN_OVERRIDES: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "origin",
    "referer",
];

struct Browser {
    name: &'static str,
    user_agent: &'static str,
    emulation: &'static str,
    /// Client hints; only Chromium browsers send them
    sec_ch_ua: Option<&'static str>,
    platform: &'static str,
}

const BROWSERS: &[Browser] = &[
    Browser {
        name: "chrome-120-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        emulation: "chrome_120",
        sec_ch_ua: Some(r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#),
        platform: r#""Windows""#,
    },
    Browser {
        name: "chrome-120-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        emulation: "chrome_120",
        sec_ch_ua: Some(r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#),
        platform: r#""macOS""#,
    },
    Browser {
        name: "chrome-119-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        emulation: "chrome_119",
        sec_ch_ua: Some(r#""Google Chrome";v="119", "Chromium";v="119", "Not?A_Brand";v="24""#),
        platform: r#""Windows""#,
    },
    Browser {
        name: "safari-17-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        emulation: "safari_17.0",
        sec_ch_ua: None,
        platform: r#""macOS""#,
    },
];

/// Detection probes run by `/analyze`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Bare request with a truncated browser user agent
    Standard,
    /// Full browser header set and fingerprint
    Stealth,
    /// Self-identifying bot with forwarding headers
    Obvious,
}

impl Probe {
    pub const ALL: [Probe; 3] = [Probe::Standard, Probe::Stealth, Probe::Obvious];

    pub fn description(&self) -> &'static str {
        match self {
            Probe::Standard => "Basic proxy request with common User-Agent",
            Probe::Stealth => "Request with comprehensive browser-like headers",
            Probe::Obvious => "Request with obvious proxy headers for filter testing",
        }
    }

    pub fn detection_risk(&self) -> &'static str {
        match self {
            Probe::Standard => "Medium",
            Probe::Stealth => "Low",
            Probe::Obvious => "High",
        }
    }
}

/// Relay protocol variants; they differ only in header sets and decoration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Standard,
    Bare,
    Wisp,
}

/// What the outbound request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Top-level page load through `/proxy`
    Navigate,
    /// Form submission replayed through `/proxy`
    FormPost,
    Probe(Probe),
    Relay(Flavor),
}

/// Headers and fingerprint for one outbound request. Immutable once selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProfile {
    pub name: String,
    pub user_agent: String,
    /// `wreq_util::Emulation` name; `None` sends no browser fingerprint
    pub emulation: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HeaderProfile {
    /// Pick a profile for `target`. Search engine targets always get a
    /// Chromium profile with client hints and without `DNT`.
    pub fn select<R: Rng + ?Sized>(
        kind: ProfileKind,
        target: &Url,
        search: &SearchEngine,
        rng: &mut R,
    ) -> Self {
        match kind {
            ProfileKind::Navigate | ProfileKind::FormPost => {
                let is_search = search.matches(target);
                let browser = if is_search {
                    let chromium: Vec<&Browser> =
                        BROWSERS.iter().filter(|b| b.sec_ch_ua.is_some()).collect();
                    chromium.choose(rng).copied()
                } else {
                    BROWSERS.choose(rng)
                };
                let browser = browser.unwrap_or(&BROWSERS[0]);
                document_profile(browser, kind, target, is_search)
            }
            ProfileKind::Probe(probe) => probe_profile(probe),
            ProfileKind::Relay(flavor) => relay_profile(flavor),
        }
    }

    /// Apply caller overrides, replacing same-named headers
    pub fn with_overrides(mut self, overrides: &HeaderOverrides) -> Self {
        for (name, value) in &overrides.0 {
            if name.eq_ignore_ascii_case("user-agent") {
                self.user_agent = value.clone();
            }
            self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            self.headers.push((name.clone(), value.clone()));
        }
        self
    }
}

fn origin_of(target: &Url) -> String {
    target.origin().ascii_serialization()
}

fn push(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.push((name.to_string(), value.to_string()));
}

fn document_profile(browser: &Browser, kind: ProfileKind, target: &Url, is_search: bool) -> HeaderProfile {
    let origin = origin_of(target);
    let mut headers = Vec::with_capacity(16);
    push(&mut headers, "user-agent", browser.user_agent);
    push(
        &mut headers,
        "accept",
        if is_search { ACCEPT_DOCUMENT_SHORT } else { ACCEPT_DOCUMENT },
    );
    push(&mut headers, "accept-language", "en-US,en;q=0.9");
    if !is_search {
        push(&mut headers, "dnt", "1");
    }
    push(&mut headers, "upgrade-insecure-requests", "1");
    push(&mut headers, "sec-fetch-dest", "document");
    push(&mut headers, "sec-fetch-mode", "navigate");
    push(&mut headers, "sec-fetch-user", "?1");
    if is_search {
        if let Some(sec_ch_ua) = browser.sec_ch_ua {
            push(&mut headers, "sec-ch-ua", sec_ch_ua);
            push(&mut headers, "sec-ch-ua-mobile", "?0");
            push(&mut headers, "sec-ch-ua-platform", browser.platform);
        }
    }
    let suffix = match kind {
        ProfileKind::FormPost => {
            push(&mut headers, "sec-fetch-site", "same-origin");
            push(&mut headers, "origin", &origin);
            "form"
        }
        _ => {
            push(&mut headers, "sec-fetch-site", "none");
            push(&mut headers, "cache-control", "max-age=0");
            "navigate"
        }
    };
    push(&mut headers, "referer", &origin);

    HeaderProfile {
        name: format!("{}/{}", browser.name, suffix),
        user_agent: browser.user_agent.to_string(),
        emulation: Some(browser.emulation.to_string()),
        headers,
    }
}

fn probe_profile(probe: Probe) -> HeaderProfile {
    let mut headers = Vec::new();
    let (user_agent, emulation) = match probe {
        Probe::Standard => ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36", None),
        Probe::Stealth => {
            push(&mut headers, "accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8");
            push(&mut headers, "accept-language", "en-US,en;q=0.5");
            push(&mut headers, "dnt", "1");
            push(&mut headers, "upgrade-insecure-requests", "1");
            push(&mut headers, "sec-fetch-dest", "document");
            push(&mut headers, "sec-fetch-mode", "navigate");
            push(&mut headers, "sec-fetch-site", "none");
            (BROWSERS[0].user_agent, Some(BROWSERS[0].emulation))
        }
        Probe::Obvious => {
            push(&mut headers, "x-forwarded-for", "127.0.0.1");
            push(&mut headers, "x-proxy-connection", "keep-alive");
            push(&mut headers, "via", "1.1 frameproxy");
            ("Frameproxy-Probe/1.0", None)
        }
    };
    headers.insert(0, ("user-agent".to_string(), user_agent.to_string()));
    HeaderProfile {
        name: format!("probe/{}", serde_name(&probe)),
        user_agent: user_agent.to_string(),
        emulation: emulation.map(str::to_string),
        headers,
    }
}

fn relay_profile(flavor: Flavor) -> HeaderProfile {
    let browser = &BROWSERS[0];
    let mut headers = Vec::new();
    push(&mut headers, "user-agent", browser.user_agent);
    match flavor {
        Flavor::Standard => {
            push(&mut headers, "accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8");
            push(&mut headers, "accept-language", "en-US,en;q=0.5");
            push(&mut headers, "upgrade-insecure-requests", "1");
        }
        Flavor::Bare => {
            push(&mut headers, "accept", "*/*");
            push(&mut headers, "accept-language", "en-US,en;q=0.9");
            if let Some(sec_ch_ua) = browser.sec_ch_ua {
                push(&mut headers, "sec-ch-ua", sec_ch_ua);
            }
            push(&mut headers, "sec-ch-ua-mobile", "?0");
            push(&mut headers, "sec-ch-ua-platform", browser.platform);
            push(&mut headers, "sec-fetch-dest", "document");
            push(&mut headers, "sec-fetch-mode", "navigate");
            push(&mut headers, "sec-fetch-site", "none");
            push(&mut headers, "sec-fetch-user", "?1");
        }
        Flavor::Wisp => {
            push(&mut headers, "accept", "*/*");
            push(&mut headers, "accept-language", "en-US,en;q=0.9");
            push(&mut headers, "cache-control", "no-cache");
            push(&mut headers, "pragma", "no-cache");
            push(&mut headers, "sec-websocket-version", "13");
            push(
                &mut headers,
                "sec-websocket-extensions",
                "permessage-deflate; client_max_window_bits",
            );
        }
    }
    HeaderProfile {
        name: format!("relay/{}", serde_name(&flavor)),
        user_agent: browser.user_agent.to_string(),
        emulation: Some(browser.emulation.to_string()),
        headers,
    }
}

fn serde_name<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}

/// Caller-supplied headers, already stripped of the ones the client owns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderOverrides(pub Vec<(String, String)>);

impl HeaderOverrides {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_ascii_lowercase(), v.as_ref().to_string()))
            .filter(|(k, _)| !k.is_empty() && !FORBIDDEN_OVERRIDES.contains(&k.as_str()))
            .collect();
        headers.sort();
        Self(headers)
    }
}

/// Names of the header profiles in the table
pub fn header_profile_names() -> Vec<String> {
    BROWSERS.iter().map(|b| b.name.to_string()).collect()
}

/// Emulation names wreq-util knows, in its serialized form (`chrome_131`)
pub fn emulation_names() -> Vec<String> {
    Emulation::VARIANTS
        .iter()
        .filter_map(|e| serde_json::to_value(e).ok())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

impl HeaderProfile {
    /// The TLS/HTTP2 fingerprint to send. `Err` carries a name wreq-util
    /// does not recognize.
    pub fn fingerprint(&self) -> Result<Option<Emulation>, &str> {
        let Some(name) = self.emulation.as_deref() else {
            return Ok(None);
        };
        serde_json::from_value(serde_json::Value::from(name))
            .map(Some)
            .map_err(|_| name)
    }
}
