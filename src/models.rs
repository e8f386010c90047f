//! Request and response models for the HTTP surface

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{
    error::ProxyError,
    fetch::OutboundBody,
    links::ProxyEndpoint,
    navigation::SearchEngine,
    profiles::{Flavor, HeaderOverrides, Probe},
    resolver::{resolve, TargetReference},
};

/// Query parameters accepted by `/proxy`; any one of the three names the target
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProxyParams {
    pub url: Option<String>,
    pub u: Option<String>,
    pub q: Option<String>,
    /// Everything else on the query string
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl ProxyParams {
    /// First non-empty of `url`, `u`, `q`
    pub fn raw_target(&self) -> Option<&str> {
        [&self.url, &self.u, &self.q]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }

    /// A search-engine form that escaped client-side interception: `q`
    /// arrives with the engine's own hidden fields and no explicit target
    pub fn escaped_search_query(&self, markers: &[&str]) -> Option<&str> {
        if self.url.is_some() || self.u.is_some() {
            return None;
        }
        let q = self.q.as_deref().filter(|q| !q.trim().is_empty())?;
        markers
            .iter()
            .any(|m| self.extra.contains_key(*m))
            .then_some(q)
    }
}

/// JSON body for `POST /relay`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub flavor: Flavor,

    /// Timeout in seconds; the page timeout when absent
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Every shape an inbound request can take, resolved once at the boundary
#[derive(Debug)]
pub enum InboundRequest {
    Query(ProxyParams),
    Form {
        params: ProxyParams,
        body: Vec<u8>,
        content_type: Option<String>,
    },
    Json(RelayRequest),
}

/// Canonical form handed to the core
#[derive(Debug)]
pub struct ResolvedRequest {
    pub target: TargetReference,
    pub overrides: HeaderOverrides,
    pub outbound: OutboundBody,
}

/// Resolve a raw target; a link to `endpoint` itself is unwrapped first
/// so pasted proxy links are not proxied twice
fn resolve_target(
    raw: &str,
    search: &SearchEngine,
    endpoint: Option<&ProxyEndpoint>,
) -> Result<TargetReference, ProxyError> {
    match endpoint {
        Some(endpoint) if endpoint.is_proxied(raw.trim()) => {
            resolve(&endpoint.decode(raw.trim()), search)
        }
        _ => resolve(raw, search),
    }
}

impl InboundRequest {
    pub fn resolve(
        self,
        search: &SearchEngine,
        endpoint: Option<&ProxyEndpoint>,
    ) -> Result<ResolvedRequest, ProxyError> {
        match self {
            InboundRequest::Query(params) => {
                let raw = params
                    .raw_target()
                    .ok_or_else(|| ProxyError::invalid_url(""))?;
                Ok(ResolvedRequest {
                    target: resolve_target(raw, search, endpoint)?,
                    overrides: HeaderOverrides::default(),
                    outbound: OutboundBody::get(),
                })
            }
            InboundRequest::Form {
                params,
                body,
                content_type,
            } => {
                let raw = params
                    .raw_target()
                    .ok_or_else(|| ProxyError::invalid_url(""))?;
                Ok(ResolvedRequest {
                    target: resolve_target(raw, search, endpoint)?,
                    overrides: HeaderOverrides::default(),
                    outbound: OutboundBody {
                        method: wreq::Method::POST,
                        bytes: Some(body),
                        content_type: Some(content_type.unwrap_or_else(|| {
                            "application/x-www-form-urlencoded".to_string()
                        })),
                    },
                })
            }
            InboundRequest::Json(relay) => {
                let method = wreq::Method::from_bytes(relay.method.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| {
                        ProxyError::invalid_request(format!("Invalid HTTP method: {}", relay.method))
                    })?;
                let content_type = relay
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                    .map(|(_, v)| v.clone());
                let overrides = HeaderOverrides::from_pairs(
                    relay
                        .headers
                        .iter()
                        .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type")),
                );
                Ok(ResolvedRequest {
                    target: resolve_target(&relay.url, search, endpoint)?,
                    overrides,
                    outbound: OutboundBody {
                        method,
                        bytes: relay.body.map(String::into_bytes),
                        content_type,
                    },
                })
            }
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub search_engine: String,
    pub header_profiles: Vec<String>,
    pub emulations: Vec<String>,
}

impl HealthResponse {
    pub fn new(search_engine: &str, header_profiles: Vec<String>, emulations: Vec<String>) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            search_engine: search_engine.to_string(),
            header_profiles,
            emulations,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    pub url: Option<String>,
}

/// Query parameters for the `GET /relay` shorthand
#[derive(Debug, Deserialize)]
pub struct RelayParams {
    pub url: Option<String>,
    #[serde(default)]
    pub flavor: Flavor,
}

impl RelayParams {
    pub fn into_request(self) -> Option<RelayRequest> {
        let url = self.url.filter(|u| !u.trim().is_empty())?;
        Some(RelayRequest {
            url,
            method: default_method(),
            headers: HashMap::new(),
            body: None,
            flavor: self.flavor,
            timeout: None,
        })
    }
}

/// One probe fetch in an `/analyze` report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub probe: Probe,
    pub description: &'static str,
    pub detection_risk: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Successful probes bucketed by detection risk
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPatterns {
    pub low_risk: usize,
    pub medium_risk: usize,
    pub high_risk: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeSummary {
    pub total_probes: usize,
    pub successful_probes: usize,
    /// Whole percent, e.g. "67%"
    pub success_rate: String,
    /// Mean over successful probes only
    pub average_response_time_ms: u64,
    pub detection_patterns: DetectionPatterns,
    pub recommendations: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeReport {
    pub url: String,
    pub probes: Vec<ProbeResult>,
    pub analysis: AnalyzeSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SearchEngine {
        SearchEngine::new("www.google.com").unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> ProxyParams {
        let map: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map)).unwrap()
    }

    #[test]
    fn test_raw_target_precedence() {
        let p = params(&[("q", "cats"), ("url", "https://a.example/")]);
        assert_eq!(p.raw_target(), Some("https://a.example/"));
        let p = params(&[("url", " "), ("q", "cats")]);
        assert_eq!(p.raw_target(), Some("cats"));
        assert_eq!(params(&[]).raw_target(), None);
    }

    #[test]
    fn test_escaped_search_detection() {
        let markers = crate::navigation::SEARCH_FORM_MARKERS;
        let p = params(&[("q", "rust"), ("sca_esv", "abc")]);
        assert_eq!(p.escaped_search_query(markers), Some("rust"));
        let p = params(&[("q", "rust")]);
        assert_eq!(p.escaped_search_query(markers), None);
        let p = params(&[("u", "x"), ("q", "rust"), ("ei", "1")]);
        assert_eq!(p.escaped_search_query(markers), None);
    }

    #[test]
    fn test_query_resolves_to_get() {
        let resolved = InboundRequest::Query(params(&[("q", "cats")]))
            .resolve(&engine(), None)
            .unwrap();
        assert_eq!(
            resolved.target.resolved_url().as_str(),
            "https://www.google.com/search?q=cats"
        );
        assert_eq!(resolved.outbound.method, wreq::Method::GET);
        assert_eq!(resolved.overrides, HeaderOverrides::default());
    }

    #[test]
    fn test_form_resolves_to_post_with_default_content_type() {
        let resolved = InboundRequest::Form {
            params: params(&[("url", "https://a.example/login")]),
            body: b"user=x".to_vec(),
            content_type: None,
        }
        .resolve(&engine(), None)
        .unwrap();
        assert_eq!(resolved.outbound.method, wreq::Method::POST);
        assert_eq!(resolved.outbound.bytes.as_deref(), Some(&b"user=x"[..]));
        assert_eq!(
            resolved.outbound.content_type.as_deref(),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_json_relay_request() {
        let relay: RelayRequest = serde_json::from_str(
            r#"{"url":"https://api.example/v1","method":"put","headers":{"Content-Type":"application/json","Host":"evil","X-Token":"t"},"body":"{}","flavor":"bare"}"#,
        )
        .unwrap();
        assert_eq!(relay.flavor, Flavor::Bare);
        let resolved = InboundRequest::Json(relay).resolve(&engine(), None).unwrap();
        assert_eq!(resolved.outbound.method, wreq::Method::PUT);
        assert_eq!(resolved.outbound.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            resolved.overrides,
            HeaderOverrides(vec![("x-token".to_string(), "t".to_string())])
        );
    }

    #[test]
    fn test_json_relay_rejects_bad_method() {
        let relay: RelayRequest =
            serde_json::from_str(r#"{"url":"https://api.example/","method":"GE T"}"#).unwrap();
        let err = InboundRequest::Json(relay).resolve(&engine(), None).unwrap_err();
        assert_eq!(err.response.code, crate::error::ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_pasted_proxy_link_is_unwrapped() {
        let endpoint = ProxyEndpoint::new(&url::Url::parse("https://p.test").unwrap());
        let link = endpoint.encode("https://a.example/deep?x=1");
        let resolved = InboundRequest::Query(params(&[("url", &link)]))
            .resolve(&engine(), Some(&endpoint))
            .unwrap();
        assert_eq!(resolved.target.resolved_url().as_str(), "https://a.example/deep?x=1");
    }

    #[test]
    fn test_missing_target_is_invalid_url() {
        let err = InboundRequest::Query(ProxyParams::default())
            .resolve(&engine(), None)
            .unwrap_err();
        assert_eq!(err.response.code, crate::error::ErrorCode::InvalidUrl);
    }
}
