//! HTTP route handlers for the proxy service

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use html_escape::encode_double_quoted_attribute;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};
use url::Url;

use crate::{
    analyze,
    config::Config,
    error::{JsonError, ProxyError},
    fetch::{FetchOutcome, Fetcher},
    headers::{self, FrameInfo, Surface},
    links::{ProxyEndpoint, PROXY_PATH},
    models::{
        AnalyzeParams, HealthResponse, InboundRequest, ProxyParams, RelayParams, RelayRequest,
        ResolvedRequest,
    },
    navigation::{SearchEngine, SEARCH_FORM_MARKERS},
    profiles::{emulation_names, header_profile_names, Flavor, HeaderProfile, ProfileKind},
    resolver::{resolve, TargetReference},
    rewriter::{self, RewriteContext},
    validation::{sanitize_url_for_logging, validate_target},
};

/// Longest relay timeout a caller may ask for, in seconds
const MAX_RELAY_TIMEOUT: u64 = 300;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub semaphore: Arc<Semaphore>,
    pub search: SearchEngine,
    pub fetcher: Fetcher,
}

impl AppState {
    pub fn new(config: Config, search: SearchEngine) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let fetcher = Fetcher::new(&config);
        Self {
            config,
            semaphore,
            search,
            fetcher,
        }
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, ProxyError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| ProxyError::unknown("Service unavailable"))
    }

    fn select_profile(&self, kind: ProfileKind, target: &TargetReference) -> HeaderProfile {
        let mut rng = rand::thread_rng();
        HeaderProfile::select(kind, target.resolved_url(), &self.search, &mut rng)
    }
}

/// All routes, without the outer middleware layers
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            PROXY_PATH,
            get(proxy_get_handler)
                .post(proxy_post_handler)
                .options(|| async { preflight(Surface::Frame) }),
        )
        .route(
            "/relay",
            get(relay_get_handler)
                .post(relay_post_handler)
                .options(|| async { preflight(Surface::Relay(Flavor::Bare)) }),
        )
        .route(
            "/analyze",
            get(analyze_handler).options(|| async { preflight(Surface::Api) }),
        )
        .with_state(state)
}

fn preflight(surface: Surface) -> impl IntoResponse {
    (StatusCode::OK, headers::preflight(surface))
}

/// Externally visible base URL of this proxy.
///
/// `PUBLIC_BASE_URL` wins; otherwise the inbound `Host` (or
/// `X-Forwarded-Host`) and `X-Forwarded-Proto` headers are used.
fn proxy_base(config: &Config, headers: &HeaderMap) -> Result<Url, ProxyError> {
    if let Some(base) = &config.public_base_url {
        return Ok(base.clone());
    }
    let first_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let host = first_value("x-forwarded-host")
        .or_else(|| first_value(header::HOST.as_str()))
        .ok_or_else(|| ProxyError::invalid_request("Missing Host header"))?;
    let scheme = match first_value("x-forwarded-proto") {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };
    Url::parse(&format!("{}://{}", scheme, host))
        .map_err(|_| ProxyError::invalid_request(format!("Invalid Host header: {}", host)))
}

/// GET /health - Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.search.host(),
        header_profile_names(),
        emulation_names(),
    ))
}

/// GET /proxy - Fetch and rewrite a page for display in a frame
pub async fn proxy_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProxyParams>,
) -> Result<Response, ProxyError> {
    if let Some(query) = params.escaped_search_query(SEARCH_FORM_MARKERS) {
        return search_redirect(&state, &headers, query);
    }
    serve_frame(&state, &headers, InboundRequest::Query(params)).await
}

/// POST /proxy - Replay a form submission against the target and rewrite the result
pub async fn proxy_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProxyParams>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let inbound = InboundRequest::Form {
        params,
        body: body.to_vec(),
        content_type,
    };
    serve_frame(&state, &headers, inbound).await
}

async fn serve_frame(
    state: &AppState,
    headers: &HeaderMap,
    inbound: InboundRequest,
) -> Result<Response, ProxyError> {
    let base = proxy_base(&state.config, headers)?;
    let endpoint = ProxyEndpoint::new(&base);
    let ResolvedRequest {
        target,
        overrides,
        outbound,
    } = inbound.resolve(&state.search, Some(&endpoint))?;

    let annotate = |err: ProxyError| {
        let err = err.with_input(target.raw_input());
        if err.response.url.is_none() {
            err.with_url(target.resolved_url().as_str())
        } else {
            err
        }
    };

    validate_target(target.resolved_url(), &state.config)
        .await
        .map_err(annotate)?;

    let kind = if outbound.method == wreq::Method::POST {
        ProfileKind::FormPost
    } else {
        ProfileKind::Navigate
    };
    let profile = state.select_profile(kind, &target).with_overrides(&overrides);

    let _permit = state.permit().await?;
    let fetched = state
        .fetcher
        .fetch(
            &target,
            &profile,
            &outbound,
            Duration::from_secs(state.config.page_timeout),
        )
        .await
        .into_result()
        .map_err(annotate)?;

    let ctx = RewriteContext::new(fetched.final_url.clone(), endpoint, state.search.clone());
    let (body, content_type) = if fetched.is_html() || fetched.content_type.is_none() {
        let html = String::from_utf8_lossy(&fetched.body);
        (
            rewriter::rewrite(&html, &ctx).into_bytes(),
            "text/html; charset=utf-8".to_string(),
        )
    } else if fetched.is_css() {
        let css = String::from_utf8_lossy(&fetched.body);
        (
            rewriter::rewrite_css(&css, &ctx).into_bytes(),
            "text/css; charset=utf-8".to_string(),
        )
    } else {
        let content_type = fetched.content_type.clone().unwrap_or_default();
        (fetched.body, content_type)
    };

    info!(
        url = %sanitize_url_for_logging(target.resolved_url()),
        final_url = %sanitize_url_for_logging(&fetched.final_url),
        method = %outbound.method,
        status = fetched.status,
        elapsed_ms = fetched.elapsed_ms,
        profile = %profile.name,
        body_size = body.len(),
        "Page proxied"
    );

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::OK);
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    headers::decorate_frame(
        response_headers,
        &FrameInfo {
            original_url: target.resolved_url().as_str(),
            user_agent: &profile.user_agent,
            method: outbound.method.as_str(),
        },
    );
    Ok(response)
}

/// Page that sends an escaped search form back through the proxy
fn search_redirect(state: &AppState, headers: &HeaderMap, query: &str) -> Result<Response, ProxyError> {
    let base = proxy_base(&state.config, headers)?;
    let target = state.search.query_url(query);
    let link = ProxyEndpoint::new(&base).encode(target.as_str());
    debug!(query = %query, "Recovering search form submission");

    let attr = encode_double_quoted_attribute(&link);
    let script_link = serde_json::to_string(&link)
        .map_err(|e| ProxyError::unknown(e.to_string()))?
        .replace("</", "<\\/");
    let page = format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
            "<meta http-equiv=\"refresh\" content=\"0;url={attr}\">",
            "<title>Redirecting...</title></head><body>",
            "<p>Redirecting to <a href=\"{attr}\">search results</a>...</p>",
            "<script>window.location.replace({script});</script>",
            "</body></html>"
        ),
        attr = attr,
        script = script_link,
    );

    let mut response = Html(page).into_response();
    headers::decorate_frame(
        response.headers_mut(),
        &FrameInfo {
            original_url: target.as_str(),
            user_agent: "",
            method: "GET",
        },
    );
    Ok(response)
}

/// POST /relay - Raw pass-through of an arbitrary request
pub async fn relay_post_handler(
    State(state): State<AppState>,
    Json(req): Json<RelayRequest>,
) -> Result<Response, JsonError> {
    relay(&state, req).await
}

/// GET /relay?url= - Shorthand for a GET relay
pub async fn relay_get_handler(
    State(state): State<AppState>,
    Query(params): Query<RelayParams>,
) -> Result<Response, JsonError> {
    let req = params
        .into_request()
        .ok_or_else(|| ProxyError::invalid_request("URL parameter is required"))?;
    relay(&state, req).await
}

async fn relay(state: &AppState, req: RelayRequest) -> Result<Response, JsonError> {
    let flavor = req.flavor;
    let timeout = req
        .timeout
        .filter(|t| *t > 0)
        .map(|t| t.min(MAX_RELAY_TIMEOUT))
        .unwrap_or(state.config.page_timeout);
    let ResolvedRequest {
        target,
        overrides,
        outbound,
    } = InboundRequest::Json(req).resolve(&state.search, None)?;
    validate_target(target.resolved_url(), &state.config).await?;

    let profile = state
        .select_profile(ProfileKind::Relay(flavor), &target)
        .with_overrides(&overrides);

    let _permit = state.permit().await?;
    let outcome = state
        .fetcher
        .fetch(&target, &profile, &outbound, Duration::from_secs(timeout))
        .await;

    let fetched = match outcome {
        FetchOutcome::Success(fetched) | FetchOutcome::HttpError(fetched) => fetched,
        FetchOutcome::NetworkFailure { code, reason } => {
            return Err(ProxyError::network(code, reason)
                .with_url(target.resolved_url().as_str())
                .into())
        }
    };

    info!(
        url = %sanitize_url_for_logging(target.resolved_url()),
        method = %outbound.method,
        flavor = ?flavor,
        status = fetched.status,
        elapsed_ms = fetched.elapsed_ms,
        body_size = fetched.body.len(),
        "Request relayed"
    );

    let status = StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(fetched.body));
    *response.status_mut() = status;
    headers::forward_origin_headers(response.headers_mut(), &fetched.headers);
    headers::decorate_relay(
        response.headers_mut(),
        flavor,
        fetched.status,
        outbound.method.as_str(),
    );
    Ok(response)
}

/// GET /analyze?url= - Compare how the origin treats three probe profiles
pub async fn analyze_handler(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Response, JsonError> {
    let raw = params
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ProxyError::invalid_request("URL parameter is required"))?;
    let target = resolve(&raw, &state.search)?;
    if target.is_search_query() {
        return Err(ProxyError::invalid_url(&raw).into());
    }
    validate_target(target.resolved_url(), &state.config).await?;

    let _permit = state.permit().await?;
    let report = analyze::analyze(
        &target,
        &state.fetcher,
        &state.search,
        Duration::from_secs(state.config.probe_timeout),
    )
    .await;

    let mut response = Json(report).into_response();
    headers::apply_cors(response.headers_mut(), Surface::Api);
    headers::apply_no_store(response.headers_mut());
    Ok(response)
}
