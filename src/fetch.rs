//! Outbound fetch orchestration
//!
//! One wreq client per request, built with the selected profile's browser
//! emulation. Redirects are followed here one hop at a time and every hop is
//! checked against the target guard before it is requested; callers validate
//! the first URL and only ever see the final response. The whole exchange,
//! body included, is bounded by the caller's timeout.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, error, warn};
use url::Url;
use wreq::{
    header::{CONTENT_TYPE, LOCATION},
    redirect::Policy,
    Client, Method,
};

use crate::{
    config::Config,
    error::{classify_wreq_error, ErrorCode, ProxyError, UPSTREAM_BODY_EXCERPT},
    profiles::HeaderProfile,
    resolver::TargetReference,
    validation::{sanitize_url_for_logging, validate_target},
};

/// Method and payload of the outbound request
#[derive(Debug, Clone)]
pub struct OutboundBody {
    pub method: Method,
    pub bytes: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl OutboundBody {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            bytes: None,
            content_type: None,
        }
    }

    /// Method and payload replayed after a redirect with `status`
    fn after_redirect(self, status: u16) -> Self {
        match status {
            303 if self.method != Method::HEAD => Self::get(),
            301 | 302 if self.method == Method::POST => Self::get(),
            _ => self,
        }
    }
}

/// A complete origin response
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub status_text: String,
    /// URL after redirects; the base for rewriting
    pub final_url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub elapsed_ms: u64,
}

impl FetchedResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }

    pub fn is_css(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/css"))
    }

    /// Leading excerpt of the body as text
    pub fn partial_body(&self) -> String {
        String::from_utf8_lossy(&self.body)
            .chars()
            .take(UPSTREAM_BODY_EXCERPT)
            .collect()
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Success(FetchedResponse),
    /// Origin answered with a non-2xx status
    HttpError(FetchedResponse),
    /// No usable response: timeout, DNS, connection or size failure
    NetworkFailure { code: ErrorCode, reason: String },
}

impl FetchOutcome {
    /// Collapse into the terminal-error view used by the frame route
    pub fn into_result(self) -> Result<FetchedResponse, ProxyError> {
        match self {
            FetchOutcome::Success(response) => Ok(response),
            FetchOutcome::HttpError(response) => Err(ProxyError::upstream(
                response.status,
                &response.status_text,
                response.final_url.as_str(),
                Some(&response.partial_body()),
            )),
            FetchOutcome::NetworkFailure { code, reason } => Err(ProxyError::network(code, reason)),
        }
    }
}

/// Issues outbound requests under the configured limits
#[derive(Debug, Clone)]
pub struct Fetcher {
    max_response_body_size: usize,
    max_redirects: usize,
    guard: Arc<Config>,
}

impl Fetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            max_response_body_size: config.max_response_body_size,
            max_redirects: config.max_redirects,
            guard: Arc::new(config.clone()),
        }
    }

    fn client(&self, profile: &HeaderProfile, timeout: Duration) -> Result<Client, wreq::Error> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none());
        match profile.fingerprint() {
            Ok(Some(emulation)) => builder = builder.emulation(emulation),
            Ok(None) => {}
            Err(invalid) => warn!(emulation = %invalid, "Unknown emulation profile, sending without fingerprint"),
        }
        builder.build()
    }

    pub async fn fetch(
        &self,
        target: &TargetReference,
        profile: &HeaderProfile,
        outbound: &OutboundBody,
        timeout: Duration,
    ) -> FetchOutcome {
        let safe_url = sanitize_url_for_logging(target.resolved_url());
        debug!(
            url = %safe_url,
            origin = %target.origin(),
            method = %outbound.method,
            profile = %profile.name,
            "Fetching"
        );

        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.exchange(target, profile, outbound, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::NetworkFailure {
                code: ErrorCode::Timeout,
                reason: format!("Request timeout after {}s", timeout.as_secs_f32()),
            },
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            FetchOutcome::Success(response) | FetchOutcome::HttpError(response) => debug!(
                url = %safe_url,
                status = response.status,
                elapsed_ms,
                body_size = response.body.len(),
                "Fetch completed"
            ),
            FetchOutcome::NetworkFailure { code, reason } => error!(
                url = %safe_url,
                code = %code,
                elapsed_ms,
                error = %reason,
                "Fetch failed"
            ),
        }
        outcome
    }

    async fn exchange(
        &self,
        target: &TargetReference,
        profile: &HeaderProfile,
        outbound: &OutboundBody,
        timeout: Duration,
    ) -> FetchOutcome {
        let client = match self.client(profile, timeout) {
            Ok(client) => client,
            Err(e) => {
                return FetchOutcome::NetworkFailure {
                    code: ErrorCode::Unknown,
                    reason: format!("Failed to build client: {}", e),
                }
            }
        };

        let start = Instant::now();
        let mut url = target.resolved_url().clone();
        let mut outbound = outbound.clone();
        let mut redirects = 0;
        let response = loop {
            let response = match send(&client, &url, profile, &outbound).await {
                Ok(response) => response,
                Err(e) => {
                    let (code, reason) = classify_wreq_error(&e);
                    return FetchOutcome::NetworkFailure { code, reason };
                }
            };
            let Some(next) = redirect_location(&response, &url) else {
                break response;
            };
            if redirects == self.max_redirects {
                return FetchOutcome::NetworkFailure {
                    code: ErrorCode::NetworkError,
                    reason: format!("Too many redirects (max: {})", self.max_redirects),
                };
            }
            redirects += 1;

            if let Err(err) = validate_target(&next, &self.guard).await {
                warn!(
                    from = %sanitize_url_for_logging(&url),
                    to = %sanitize_url_for_logging(&next),
                    error = %err.response.error,
                    "Redirect rejected"
                );
                return FetchOutcome::NetworkFailure {
                    code: err.response.code,
                    reason: format!(
                        "Redirect to {} rejected: {}",
                        sanitize_url_for_logging(&next),
                        err.response.error
                    ),
                };
            }
            debug!(to = %sanitize_url_for_logging(&next), hop = redirects, "Following redirect");
            outbound = outbound.after_redirect(response.status().as_u16());
            url = next;
        };

        let status = response.status();
        let final_url = url;
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match read_body_with_limit(response, self.max_response_body_size).await {
            Ok(body) => body,
            Err((code, reason)) => return FetchOutcome::NetworkFailure { code, reason },
        };

        let fetched = FetchedResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            final_url,
            headers,
            body,
            content_type,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        if status.is_success() {
            FetchOutcome::Success(fetched)
        } else {
            FetchOutcome::HttpError(fetched)
        }
    }
}

async fn send(
    client: &Client,
    url: &Url,
    profile: &HeaderProfile,
    outbound: &OutboundBody,
) -> Result<wreq::Response, wreq::Error> {
    let mut request = client.request(outbound.method.clone(), url.as_str());
    for (name, value) in &profile.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(content_type) = &outbound.content_type {
        request = request.header(CONTENT_TYPE, content_type.as_str());
    }
    if let Some(bytes) = &outbound.bytes {
        request = request.body(bytes.clone());
    }
    request.send().await
}

/// Where a redirect response points, resolved against the URL that produced it
fn redirect_location(response: &wreq::Response, current: &Url) -> Option<Url> {
    if !matches!(response.status().as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

/// Read the body, refusing anything over `max_size`
async fn read_body_with_limit(
    response: wreq::Response,
    max_size: usize,
) -> Result<Vec<u8>, (ErrorCode, String)> {
    let too_large = |size: u64| {
        let err = ProxyError::body_too_large(size, max_size);
        (err.response.code, err.response.error)
    };

    if let Some(content_length) = response.content_length() {
        if content_length > max_size as u64 {
            return Err(too_large(content_length));
        }
    }

    let bytes = response.bytes().await.map_err(|e| {
        let (code, message) = classify_wreq_error(&e);
        (code, format!("Failed to read response body: {}", message))
    })?;

    if bytes.len() > max_size {
        return Err(too_large(bytes.len() as u64));
    }
    Ok(bytes.to_vec())
}
