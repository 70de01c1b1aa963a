use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracepath::buffer::TraceBuffer;
use tracepath::catalogue::Catalogue;
use tracepath::config::Args;
use tracepath::events::EventWriter;
use tracepath::metrics::{self, Metrics};
use tracepath::pipeline::Pipeline;
use tracepath::store::sqlite::SqliteStore;
use tracepath::store::{CatalogueStore, EventStore};
use tracepath::subscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracepath=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Sinks and bus are fatal at startup; everything after this point
    // degrades instead of exiting.
    let store = Arc::new(SqliteStore::open(&args.db_path).context("open sink database")?);
    let catalogue_store: Arc<dyn CatalogueStore> = store.clone();
    let event_store: Arc<dyn EventStore> = store.clone();

    let metrics = Arc::new(Metrics::new());
    let catalogue =
        Arc::new(Catalogue::bootstrap(catalogue_store).context("bootstrap path catalogue")?);
    let buffer = Arc::new(TraceBuffer::new());

    let client = async_nats::connect(&args.nats_url)
        .await
        .with_context(|| format!("connect to NATS at {}", args.nats_url))?;
    info!(url = %args.nats_url, "connected to NATS");

    let pipeline = Arc::new(Pipeline::new(
        buffer.clone(),
        catalogue,
        EventWriter::new(event_store.clone(), metrics.clone()),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (bundle_tx, bundle_rx) = broadcast::channel(args.bundle_capacity);

    let span_lane = tokio::spawn(subscriber::run_span_subscriber(
        client.clone(),
        args.nats_subject.clone(),
        buffer.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    ));
    let log_lane = tokio::spawn(subscriber::run_log_subscriber(
        client.clone(),
        args.nats_log_subject.clone(),
        event_store,
        metrics.clone(),
        shutdown_rx.clone(),
    ));
    let flusher = tokio::spawn(pipeline.clone().run_flusher(
        args.buffer_window(),
        bundle_tx,
        shutdown_rx.clone(),
    ));
    let processor = tokio::spawn(pipeline.clone().run_processor(bundle_rx));
    drop(shutdown_rx);

    let metrics_state = metrics.clone();
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::run_metrics_server(metrics_state, &metrics_addr).await {
            error!("metrics server error: {e}");
        }
    });

    wait_for_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    // Stop ingesting, flush what is left, then exit within the grace window.
    let drain = async {
        let _ = span_lane.await;
        let _ = log_lane.await;
        let _ = flusher.await;
        let _ = processor.await;
        pipeline.drain_remaining().await;
    };
    if tokio::time::timeout(args.shutdown_deadline(), drain)
        .await
        .is_err()
    {
        warn!(
            grace_secs = args.shutdown_grace,
            "drain deadline exceeded, exiting with residual traces"
        );
    }

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
