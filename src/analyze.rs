//! Detection probes for `/analyze`
//!
//! The same target is fetched with three header profiles at once, ranging
//! from a full browser fingerprint to a self-identifying bot, and the
//! outcomes are compared.

use std::{collections::BTreeMap, time::Duration, time::Instant};

use tracing::info;

use crate::{
    fetch::{FetchOutcome, Fetcher, OutboundBody},
    models::{AnalyzeReport, AnalyzeSummary, DetectionPatterns, ProbeResult},
    navigation::SearchEngine,
    profiles::{HeaderProfile, Probe, ProfileKind},
    resolver::TargetReference,
    validation::sanitize_url_for_logging,
};

const RECOMMENDATIONS: &[&str] = &[
    "Monitor server logs for requests with a \"Frameproxy-Probe\" User-Agent",
    "Check for X-Forwarded-For and Via headers",
    "Analyze response time patterns (proxies often have higher latency)",
    "Look for unusual header combinations",
    "Monitor for requests missing common browser headers",
];

pub async fn analyze(
    target: &TargetReference,
    fetcher: &Fetcher,
    search: &SearchEngine,
    timeout: Duration,
) -> AnalyzeReport {
    let [standard, stealth, obvious] = Probe::ALL;
    let (standard, stealth, obvious) = tokio::join!(
        run_probe(standard, target, fetcher, search, timeout),
        run_probe(stealth, target, fetcher, search, timeout),
        run_probe(obvious, target, fetcher, search, timeout),
    );
    let probes = vec![standard, stealth, obvious];
    let analysis = summarize(&probes);

    info!(
        url = %sanitize_url_for_logging(target.resolved_url()),
        successful = analysis.successful_probes,
        total = analysis.total_probes,
        "Analysis completed"
    );

    AnalyzeReport {
        url: target.resolved_url().to_string(),
        probes,
        analysis,
    }
}

async fn run_probe(
    probe: Probe,
    target: &TargetReference,
    fetcher: &Fetcher,
    search: &SearchEngine,
    timeout: Duration,
) -> ProbeResult {
    let profile = {
        let mut rng = rand::thread_rng();
        HeaderProfile::select(ProfileKind::Probe(probe), target.resolved_url(), search, &mut rng)
    };

    let start = Instant::now();
    let outcome = fetcher
        .fetch(target, &profile, &OutboundBody::get(), timeout)
        .await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    let mut result = ProbeResult {
        probe,
        description: probe.description(),
        detection_risk: probe.detection_risk(),
        success: false,
        status: None,
        response_time_ms,
        content_length: None,
        headers: BTreeMap::new(),
        error: None,
    };
    match outcome {
        FetchOutcome::Success(response) | FetchOutcome::HttpError(response) => {
            result.success = (200..300).contains(&response.status);
            result.status = Some(response.status);
            result.content_length = Some(response.body.len());
            for (name, value) in response.headers {
                result
                    .headers
                    .entry(name)
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }
        }
        FetchOutcome::NetworkFailure { reason, .. } => result.error = Some(reason),
    }
    result
}

pub fn summarize(probes: &[ProbeResult]) -> AnalyzeSummary {
    let successful: Vec<&ProbeResult> = probes.iter().filter(|p| p.success).collect();
    let total = probes.len();
    let success_rate = if total == 0 {
        0
    } else {
        ((successful.len() as f64 / total as f64) * 100.0).round() as u64
    };
    let average_response_time_ms =
        successful.iter().map(|p| p.response_time_ms).sum::<u64>() / successful.len().max(1) as u64;

    let mut patterns = DetectionPatterns::default();
    for probe in &successful {
        match probe.detection_risk {
            "Low" => patterns.low_risk += 1,
            "Medium" => patterns.medium_risk += 1,
            _ => patterns.high_risk += 1,
        }
    }

    AnalyzeSummary {
        total_probes: total,
        successful_probes: successful.len(),
        success_rate: format!("{}%", success_rate),
        average_response_time_ms,
        detection_patterns: patterns,
        recommendations: RECOMMENDATIONS.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, resolver::resolve};
    use axum::{http::HeaderMap, routing::get, Router};
    use tokio::net::TcpListener;

    fn result(probe: Probe, success: bool, ms: u64) -> ProbeResult {
        ProbeResult {
            probe,
            description: probe.description(),
            detection_risk: probe.detection_risk(),
            success,
            status: success.then_some(200),
            response_time_ms: ms,
            content_length: None,
            headers: BTreeMap::new(),
            error: None,
        }
    }

    #[test]
    fn test_summary_counts_successful_only() {
        let probes = vec![
            result(Probe::Standard, true, 100),
            result(Probe::Stealth, true, 300),
            result(Probe::Obvious, false, 5000),
        ];
        let summary = summarize(&probes);
        assert_eq!(summary.total_probes, 3);
        assert_eq!(summary.successful_probes, 2);
        assert_eq!(summary.success_rate, "67%");
        assert_eq!(summary.average_response_time_ms, 200);
        assert_eq!(summary.detection_patterns.low_risk, 1);
        assert_eq!(summary.detection_patterns.medium_risk, 1);
        assert_eq!(summary.detection_patterns.high_risk, 0);
    }

    #[test]
    fn test_summary_with_no_success() {
        let summary = summarize(&[result(Probe::Obvious, false, 10)]);
        assert_eq!(summary.success_rate, "0%");
        assert_eq!(summary.average_response_time_ms, 0);
    }

    #[tokio::test]
    async fn test_origin_can_tell_probes_apart() {
        // Origin rejects anything announcing a Via header
        let router = Router::new().route(
            "/",
            get(|headers: HeaderMap| async move {
                if headers.contains_key("via") {
                    (axum::http::StatusCode::FORBIDDEN, "blocked")
                } else {
                    (axum::http::StatusCode::OK, "welcome")
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let search = SearchEngine::new("www.google.com").unwrap();
        let target = resolve(&format!("http://{}/", addr), &search).unwrap();
        let report = analyze(
            &target,
            &Fetcher::new(&Config::default()),
            &search,
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(report.probes.len(), 3);
        let by_probe = |p: Probe| report.probes.iter().find(|r| r.probe == p).unwrap();
        assert!(by_probe(Probe::Standard).success);
        assert!(by_probe(Probe::Stealth).success);
        assert_eq!(by_probe(Probe::Obvious).status, Some(403));
        assert!(!by_probe(Probe::Obvious).success);
        assert_eq!(report.analysis.successful_probes, 2);
    }
}
