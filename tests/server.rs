//! Scrape endpoint tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use ping_exporter::server::{ExporterState, bind, create_router};
use ping_exporter::{Aggregator, MetricsSink, Outcome, RttGauge, StartupError};

// =============================================================================
// Test Helpers
// =============================================================================

fn test_state() -> ExporterState {
    ExporterState {
        target: "example.com".to_string(),
        hostname: "probe-1".to_string(),
        gauge: Arc::new(RttGauge::new("probe-1")),
        aggregator: Arc::new(Aggregator::new()),
    }
}

/// Start test server and return base URL.
async fn start_test_server(state: ExporterState, metrics_path: &str) -> String {
    let listener = bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let router = create_router(state, metrics_path);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_scrape_reflects_latest_sample_and_snapshot() {
    let state = test_state();
    let gauge = Arc::clone(&state.gauge);
    let aggregator = Arc::clone(&state.aggregator);
    let base_url = start_test_server(state, "/metrics").await;

    aggregator.update(&Outcome::Success {
        sequence: 0,
        rtt: Duration::from_millis(4),
        bytes: 32,
        source: IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
    });
    aggregator.update(&Outcome::Lost { sequence: 1 });
    gauge.set("example.com", 4.0).unwrap();
    gauge.set("example.com", 7.5).unwrap();

    let resp = reqwest::get(format!("{}/metrics", base_url))
        .await
        .expect("Failed to send metrics request");
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"].to_str().unwrap().starts_with("text/plain"));

    let body = resp.text().await.expect("Failed to read metrics body");
    assert!(body.contains("# TYPE ping_rtt gauge"));
    assert!(body.contains("ping_rtt{hostname=\"probe-1\",targetHost=\"example.com\"} 7.5\n"));
    assert!(body.contains("ping_packets_sent{hostname=\"probe-1\",targetHost=\"example.com\"} 2\n"));
    assert!(body.contains("ping_packets_received{hostname=\"probe-1\",targetHost=\"example.com\"} 1\n"));
    assert!(body.contains("ping_packet_loss_percent{hostname=\"probe-1\",targetHost=\"example.com\"} 50\n"));
}

#[tokio::test]
async fn test_custom_metrics_path_and_health() {
    let base_url = start_test_server(test_state(), "/probe/metrics").await;

    let resp = reqwest::get(format!("{}/probe/metrics", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = reqwest::get(format!("{}/metrics", base_url)).await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!("{}/healthz", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_bind_conflict_is_startup_error() {
    let first = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = first.local_addr().unwrap();

    let second = bind(addr).await;
    assert!(matches!(second, Err(StartupError::Bind { .. })));
}
