//! Integration tests for the remote Prometheus scraper.

mod common;

use axum::extract::State;
use axum::http::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use do_agent::collectors::scraper::{BearerAuth, ScraperOptions};
use do_agent::collectors::{Collector, Scraper};
use do_agent::model::MetricFamily;
use do_agent::whitelist::Whitelist;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::{Arc, Mutex};

const EXPOSITION: &str = "\
# HELP kube_deployment_spec_replicas Number of desired pods for a deployment.
# TYPE kube_deployment_spec_replicas gauge
kube_deployment_spec_replicas{deployment=\"web\",namespace=\"default\"} 3
kube_deployment_spec_replicas{deployment=\"api\",namespace=\"default\"} 2
# HELP go_goroutines Number of goroutines that currently exist.
# TYPE go_goroutines gauge
go_goroutines 42
";

#[derive(Clone, Default)]
struct Target {
    token: Arc<Mutex<String>>,
    seen: Arc<Mutex<Vec<HeaderMap>>>,
}

async fn metrics(State(target): State<Target>, headers: HeaderMap) -> Response {
    target.seen.lock().unwrap().push(headers.clone());

    let expected = format!("Bearer {}", target.token.lock().unwrap());
    if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let accepts_gzip = headers
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));
    if !accepts_gzip {
        return EXPOSITION.into_response();
    }

    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(EXPOSITION.as_bytes()).unwrap();
    ([(CONTENT_ENCODING, "gzip")], enc.finish().unwrap()).into_response()
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

fn family<'a>(mfs: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
    mfs.iter().find(|mf| mf.name == name)
}

#[tokio::test]
async fn test_gzip_scrape_with_whitelist_and_token_file() {
    let target = Target::default();
    *target.token.lock().unwrap() = "secret-token".to_string();
    let base = common::serve(
        Router::new()
            .route("/metrics", get(metrics))
            .with_state(target.clone()),
    )
    .await;

    let mut token_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(token_file, "secret-token").unwrap();

    let opts = ScraperOptions {
        bearer: Some(BearerAuth::TokenFile(token_file.path().to_path_buf())),
        ..ScraperOptions::default()
    };
    let scraper = Scraper::new(
        "dokubernetes",
        &format!("{}/metrics/", base),
        Vec::new(),
        Whitelist::k8s(),
        opts,
    )
    .unwrap();
    assert_eq!(scraper.endpoint(), format!("{}/metrics", base));

    let mfs = scraper.collect().await.unwrap();
    let replicas = family(&mfs, "kube_deployment_spec_replicas").unwrap();
    assert_eq!(replicas.samples.len(), 2);
    assert_eq!(replicas.help, "Number of desired pods for a deployment.");
    assert!(family(&mfs, "go_goroutines").is_none());

    let success = family(&mfs, "dokubernetes_scrape_collector_success").unwrap();
    assert_eq!(success.samples[0].value().scalar(), Some(1.0));
    assert_eq!(success.samples[0].label("collector"), Some("dokubernetes"));
    assert!(family(&mfs, "dokubernetes_scrape_collector_duration_seconds").is_some());

    let seen = target.seen.lock().unwrap();
    let headers = &seen[0];
    assert_eq!(
        headers
            .get("x-prometheus-scrape-timeout-seconds")
            .and_then(|v| v.to_str().ok()),
        Some("5.000000")
    );
    assert!(headers
        .get("accept")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain;version=0.0.4"));
}

#[tokio::test]
async fn test_rotated_token_is_picked_up() {
    let target = Target::default();
    *target.token.lock().unwrap() = "first".to_string();
    let base = common::serve(
        Router::new()
            .route("/metrics", get(metrics))
            .with_state(target.clone()),
    )
    .await;

    let token_file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(token_file.path(), "first\n").unwrap();
    let opts = ScraperOptions {
        bearer: Some(BearerAuth::TokenFile(token_file.path().to_path_buf())),
        ..ScraperOptions::default()
    };
    let scraper = Scraper::new(
        "prometheus",
        &format!("{}/metrics", base),
        Vec::new(),
        Whitelist::allow_all(),
        opts,
    )
    .unwrap();
    assert!(scraper.scrape().await.is_ok());

    *target.token.lock().unwrap() = "second".to_string();
    assert!(scraper.scrape().await.is_err());

    std::fs::write(token_file.path(), "second").unwrap();
    let mfs = scraper.scrape().await.unwrap();
    assert!(family(&mfs, "go_goroutines").is_some());
}

#[tokio::test]
async fn test_failed_scrape_reports_zero_success() {
    let base = common::serve(Router::new().route("/metrics", get(broken))).await;
    let scraper = Scraper::new(
        "dodbaas",
        &format!("{}/metrics", base),
        Vec::new(),
        Whitelist::dbaas(),
        ScraperOptions::default(),
    )
    .unwrap();

    let mfs = scraper.collect().await.unwrap();
    assert_eq!(mfs.len(), 2);
    let success = family(&mfs, "dodbaas_scrape_collector_success").unwrap();
    assert_eq!(success.samples[0].value().scalar(), Some(0.0));
}

async fn slow() -> &'static str {
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    EXPOSITION
}

#[tokio::test]
async fn test_timed_out_scrape_reports_zero_success() {
    let base = common::serve(Router::new().route("/metrics", get(slow))).await;
    let opts = ScraperOptions {
        timeout: std::time::Duration::from_millis(100),
        ..ScraperOptions::default()
    };
    let scraper = Scraper::new(
        "dokubernetes",
        &format!("{}/metrics", base),
        Vec::new(),
        Whitelist::k8s(),
        opts,
    )
    .unwrap();

    let started = std::time::Instant::now();
    let mfs = scraper.collect().await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(2));

    // only the synthesized gauges, nothing scraped
    assert_eq!(mfs.len(), 2);
    assert!(family(&mfs, "kube_deployment_spec_replicas").is_none());
    let success = family(&mfs, "dokubernetes_scrape_collector_success").unwrap();
    assert_eq!(success.samples[0].value().scalar(), Some(0.0));
}
