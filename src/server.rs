//! Scrape endpoint.
//!
//! Serves the live `ping_rtt` gauge and the session statistics in the
//! Prometheus text format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;

use crate::error::StartupError;
use crate::metrics::{RttGauge, render_statistics};
use crate::stats::Aggregator;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state of the scrape endpoint.
#[derive(Clone)]
pub struct ExporterState {
    pub target: String,
    pub hostname: String,
    pub gauge: Arc<RttGauge>,
    pub aggregator: Arc<Aggregator>,
}

impl ExporterState {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.gauge.render(&mut out);
        render_statistics(&mut out, &self.target, &self.hostname, &self.aggregator.snapshot());
        out
    }
}

pub fn create_router(state: ExporterState, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Binds the listen address up front so a busy port fails startup.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

async fn metrics(State(state): State<ExporterState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.render())
}

async fn healthz() -> &'static str {
    "ok"
}
