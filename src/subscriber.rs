//! NATS subscriptions feeding the pipeline.
//!
//! Two independent lanes share the bus client: OTLP span payloads on the
//! trace subject and JSON access-log entries on the log subject. Delivery is
//! at-least-once; duplicates collapse in the buffer (spans) or surface as
//! extra appended rows (logs), both harmless.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::buffer::TraceBuffer;
use crate::decode;
use crate::httplog;
use crate::metrics::Metrics;
use crate::store::EventStore;

/// Subscribes to the span subject and pushes every decoded span into the
/// trace buffer until shutdown.
pub async fn run_span_subscriber(
    client: async_nats::Client,
    subject: String,
    buffer: Arc<TraceBuffer>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut subscription = client.subscribe(subject.clone()).await?;
    info!(%subject, "subscribed to span subject");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = subscription.next() => match message {
                Some(message) => handle_span_message(&message.payload, &buffer, &metrics),
                None => {
                    warn!(%subject, "span subscription closed by server");
                    return Ok(());
                }
            },
        }
    }
    let _ = subscription.unsubscribe().await;
    Ok(())
}

/// Decodes one bus message and buffers its spans. Undecodable payloads are
/// dropped with a counter increment; the subscription continues.
pub fn handle_span_message(payload: &[u8], buffer: &TraceBuffer, metrics: &Metrics) {
    match decode::decode_traces(payload) {
        Ok(spans) => {
            metrics.spans_received.inc_by(spans.len() as u64);
            for span in spans {
                buffer.add(span);
            }
            metrics.buffered_traces.set(buffer.len() as i64);
        }
        Err(e) => {
            metrics.decode_errors.inc();
            warn!("dropping span message: {e}");
        }
    }
}

/// Subscribes to the log subject and appends accepted entries to the event
/// store until shutdown.
pub async fn run_log_subscriber(
    client: async_nats::Client,
    subject: String,
    store: Arc<dyn EventStore>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut subscription = client.subscribe(subject.clone()).await?;
    info!(%subject, "subscribed to log subject");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = subscription.next() => match message {
                Some(message) => httplog::handle_log_message(&message.payload, store.as_ref(), &metrics),
                None => {
                    warn!(%subject, "log subscription closed by server");
                    return Ok(());
                }
            },
        }
    }
    let _ = subscription.unsubscribe().await;
    Ok(())
}
