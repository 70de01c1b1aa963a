//! Scrape-format metrics and the HTTP surface serving them.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Pipeline counters and gauges, registered against one registry.
pub struct Metrics {
    registry: Registry,
    pub spans_received: IntCounter,
    pub traces_flushed: IntCounter,
    pub bundles_dropped: IntCounter,
    pub catalogue_paths_created: IntCounter,
    pub decode_errors: IntCounter,
    pub broken_traces: IntCounter,
    pub sink_errors: IntCounter,
    pub log_entries: IntCounter,
    pub log_decode_errors: IntCounter,
    pub buffered_traces: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let spans_received =
            IntCounter::new("spans_received_total", "Spans decoded off the bus").unwrap();
        let traces_flushed = IntCounter::new(
            "traces_flushed_total",
            "Trace bundles emitted after their quiescence window",
        )
        .unwrap();
        let bundles_dropped = IntCounter::new(
            "bundles_dropped_total",
            "Bundles dropped because the processing channel was full",
        )
        .unwrap();
        let catalogue_paths_created = IntCounter::new(
            "catalogue_paths_created_total",
            "Paths materialised on first observation",
        )
        .unwrap();
        let decode_errors =
            IntCounter::new("decode_errors_total", "Undecodable span payloads dropped").unwrap();
        let broken_traces = IntCounter::new(
            "broken_traces_total",
            "Bundles that did not assemble into a rooted call graph",
        )
        .unwrap();
        let sink_errors =
            IntCounter::new("sink_errors_total", "Failed catalogue or event store writes").unwrap();
        let log_entries =
            IntCounter::new("log_entries_total", "HTTP log entries persisted").unwrap();
        let log_decode_errors = IntCounter::new(
            "log_decode_errors_total",
            "Unparseable HTTP log messages dropped",
        )
        .unwrap();
        let buffered_traces =
            IntGauge::new("buffered_traces", "Traces currently held in the buffer").unwrap();

        for collector in [
            &spans_received,
            &traces_flushed,
            &bundles_dropped,
            &catalogue_paths_created,
            &decode_errors,
            &broken_traces,
            &sink_errors,
            &log_entries,
            &log_decode_errors,
        ] {
            registry.register(Box::new(collector.clone())).unwrap();
        }
        registry.register(Box::new(buffered_traces.clone())).unwrap();

        Metrics {
            registry,
            spans_received,
            traces_flushed,
            bundles_dropped,
            catalogue_paths_created,
            decode_errors,
            broken_traces,
            sink_errors,
            log_entries,
            log_decode_errors,
            buffered_traces,
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut body = String::new();
        if let Err(e) = TextEncoder::new().encode_utf8(&self.registry.gather(), &mut body) {
            tracing::error!("failed to encode metrics: {e}");
        }
        body
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run_metrics_server(metrics: Arc<Metrics>, bind: &str) -> anyhow::Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(metrics);

    info!("metrics server listening on {}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    use axum::http::{header, StatusCode};
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        let metrics = Metrics::new();
        metrics.spans_received.inc_by(3);
        metrics.buffered_traces.set(2);

        let body = metrics.render();
        assert!(body.contains("spans_received_total 3"));
        assert!(body.contains("buffered_traces 2"));
        assert!(body.contains("broken_traces_total 0"));
    }
}
