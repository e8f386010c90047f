//! Error types and error codes for the proxy service

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use html_escape::encode_text;
use serde::Serialize;
use std::fmt;

use crate::headers::decorate_error;

/// Number of upstream body characters echoed back on an HTTP error
pub const UPSTREAM_BODY_EXCERPT: usize = 500;

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input could not be resolved to an http(s) URL or a search query
    InvalidUrl,
    /// Origin answered with a non-2xx status
    UpstreamHttpError,
    /// Outbound fetch exceeded its time bound
    Timeout,
    /// DNS resolution failed
    DnsError,
    /// SSL/TLS error
    TlsError,
    /// Connection refused, reset or otherwise broken
    NetworkError,
    /// Response body exceeded the configured limit
    BodyTooLarge,
    /// Invalid request parameters
    InvalidRequest,
    /// Unknown/internal error
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidUrl => write!(f, "INVALID_URL"),
            ErrorCode::UpstreamHttpError => write!(f, "UPSTREAM_HTTP_ERROR"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::DnsError => write!(f, "DNS_ERROR"),
            ErrorCode::TlsError => write!(f, "TLS_ERROR"),
            ErrorCode::NetworkError => write!(f, "NETWORK_ERROR"),
            ErrorCode::BodyTooLarge => write!(f, "BODY_TOO_LARGE"),
            ErrorCode::InvalidRequest => write!(f, "INVALID_REQUEST"),
            ErrorCode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Standard error response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    /// The caller's raw input, echoed for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// URL the proxy attempted to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    /// Leading excerpt of the origin's error body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_body: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            error: error.into(),
            code,
            input: None,
            url: None,
            status_text: None,
            upstream_body: None,
        }
    }
}

/// Proxy error with HTTP status code
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ProxyError {
    pub fn new(status: StatusCode, error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            status,
            response: ErrorResponse::new(error, code),
        }
    }

    pub fn invalid_url(input: &str) -> Self {
        let mut err = Self::new(
            StatusCode::BAD_REQUEST,
            "Input is neither an http(s) URL nor a search query",
            ErrorCode::InvalidUrl,
        );
        err.response.input = Some(input.to_string());
        err
    }

    /// Origin returned a non-2xx status; the origin's status is preserved
    pub fn upstream(status: u16, status_text: &str, url: &str, body: Option<&str>) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut err = Self::new(
            status,
            format!("Origin responded with {} {}", status.as_u16(), status_text),
            ErrorCode::UpstreamHttpError,
        );
        err.response.url = Some(url.to_string());
        err.response.status_text = Some(status_text.to_string());
        err.response.upstream_body = body
            .filter(|b| !b.trim().is_empty())
            .map(|b| b.chars().take(UPSTREAM_BODY_EXCERPT).collect());
        err
    }

    /// Outbound fetch failed before a response arrived
    pub fn network(code: ErrorCode, reason: impl Into<String>) -> Self {
        let status = match code {
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, reason, code)
    }

    pub fn body_too_large(size: u64, max: usize) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            format!(
                "Response body too large: {} bytes (max: {} bytes)",
                size, max
            ),
            ErrorCode::BodyTooLarge,
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, ErrorCode::InvalidRequest)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::Unknown,
        )
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.response.input = Some(input.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.response.url = Some(url.to_string());
        self
    }

    /// Render as the HTML page shown inside the embedding frame
    pub fn to_html(&self) -> String {
        let r = &self.response;
        let mut page = String::with_capacity(1024);
        page.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Proxy Error</title></head><body>");
        page.push_str(&format!(
            "<h1>Proxy Error: {}</h1><p>{}</p>",
            r.code,
            encode_text(&r.error)
        ));
        if let Some(status_text) = &r.status_text {
            page.push_str(&format!(
                "<p><strong>Status:</strong> {} {}</p>",
                self.status.as_u16(),
                encode_text(status_text)
            ));
        }
        if let Some(url) = &r.url {
            page.push_str(&format!("<p><strong>URL:</strong> {}</p>", encode_text(url)));
        }
        if let Some(input) = &r.input {
            page.push_str(&format!(
                "<p><strong>Original input:</strong> {}</p>",
                encode_text(input)
            ));
        }
        if let Some(body) = &r.upstream_body {
            page.push_str(&format!(
                "<p><strong>Server response:</strong></p><pre>{}</pre>",
                encode_text(body)
            ));
        }
        page.push_str("<p><a href=\"javascript:history.back()\">&larr; Go back</a></p></body></html>");
        page
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Html(self.to_html())).into_response();
        decorate_error(response.headers_mut());
        response
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.response.code, self.response.error)
    }
}

impl std::error::Error for ProxyError {}

/// JSON rendering of a [`ProxyError`] for the API routes
#[derive(Debug)]
pub struct JsonError(pub ProxyError);

impl From<ProxyError> for JsonError {
    fn from(err: ProxyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for JsonError {
    fn into_response(self) -> Response {
        let mut response = (self.0.status, Json(self.0.response)).into_response();
        decorate_error(response.headers_mut());
        response
    }
}

/// Classify wreq errors into appropriate error codes
pub fn classify_wreq_error(err: &wreq::Error) -> (ErrorCode, String) {
    let message = err.to_string();

    if err.is_timeout() {
        (ErrorCode::Timeout, format!("Request timeout: {}", message))
    } else if err.is_connect() {
        let lower = message.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("getaddrinfo") {
            (
                ErrorCode::DnsError,
                format!("DNS resolution failed: {}", message),
            )
        } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
            (ErrorCode::TlsError, format!("TLS error: {}", message))
        } else {
            (
                ErrorCode::NetworkError,
                format!("Connection error: {}", message),
            )
        }
    } else if err.is_request() {
        (
            ErrorCode::NetworkError,
            format!("Request failed: {}", message),
        )
    } else {
        (ErrorCode::Unknown, message)
    }
}
