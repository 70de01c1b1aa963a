//! The processing pipeline: flush ticks, bundle hand-off and the
//! per-bundle processing turn.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::buffer::TraceBuffer;
use crate::catalogue::Catalogue;
use crate::events::EventWriter;
use crate::graph::CallGraph;
use crate::metrics::Metrics;
use crate::model::TraceBundle;
use crate::path;

/// Path id recorded on spans of bundles that never resolved to a graph.
pub const UNRESOLVED_PATH_ID: u32 = 0;

pub struct Pipeline {
    buffer: Arc<TraceBuffer>,
    catalogue: Arc<Catalogue>,
    events: EventWriter,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        buffer: Arc<TraceBuffer>,
        catalogue: Arc<Catalogue>,
        events: EventWriter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Pipeline {
            buffer,
            catalogue,
            events,
            metrics,
        }
    }

    /// One processing turn: graph assembly, path identity, catalogue
    /// materialisation on first sight, event appends.
    ///
    /// Broken traces skip the catalogue and the path/hop events but still
    /// persist their raw spans. Sink failures are counted and never abort
    /// the turn.
    pub fn process_bundle(&self, bundle: &TraceBundle) {
        if bundle.is_empty() {
            return;
        }
        self.metrics.traces_flushed.inc();

        let graph = match CallGraph::from_bundle(bundle) {
            Ok(graph) => graph,
            Err(reason) => {
                self.metrics.broken_traces.inc();
                warn!(trace_id = %bundle.trace_id, %reason, "broken trace");
                self.events.write_spans(&bundle.spans, UNRESOLVED_PATH_ID);
                return;
            }
        };

        let path_id = path::path_id(&graph);
        debug!(trace_id = %bundle.trace_id, path_id, spans = graph.len(), "processing trace");

        match self.catalogue.observe(&graph, path_id) {
            Ok(true) => self.metrics.catalogue_paths_created.inc(),
            Ok(false) => {}
            Err(e) => {
                self.metrics.sink_errors.inc();
                warn!(trace_id = %bundle.trace_id, path_id, "catalogue write failed: {e}");
            }
        }

        self.events.write_trace(&graph, path_id);
    }

    /// Ticks every `window`, draining quiescent traces into the bundle
    /// channel. Receiver lag drops the oldest bundles; the drop is counted
    /// by the processor when it observes the lag.
    pub async fn run_flusher(
        self: Arc<Self>,
        window: Duration,
        bundles: broadcast::Sender<TraceBundle>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(window);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for bundle in self.buffer.drain_expired(window) {
                        // Send only fails with zero receivers; the processor
                        // outlives the flusher, so a failure means shutdown.
                        let _ = bundles.send(bundle);
                    }
                    self.metrics.buffered_traces.set(self.buffer.len() as i64);
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("flusher stopped");
    }

    /// Consumes bundles until the channel closes. The flusher holds the only
    /// sender, so shutdown propagates here as a close once every bundle sent
    /// before the flusher stopped has been received.
    pub async fn run_processor(self: Arc<Self>, mut bundles: broadcast::Receiver<TraceBundle>) {
        loop {
            match bundles.recv().await {
                Ok(bundle) => self.process_bundle(&bundle),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.metrics.bundles_dropped.inc_by(n);
                    warn!(dropped = n, "bundle channel overflow, oldest bundles dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("processor stopped");
    }

    /// Force-drains the buffer (window zero) and processes every residual
    /// trace inline. Called on shutdown after the flusher has stopped.
    pub async fn drain_remaining(&self) {
        let bundles = self.buffer.drain_expired(Duration::ZERO);
        if !bundles.is_empty() {
            info!(traces = bundles.len(), "draining residual traces");
        }
        for bundle in bundles {
            self.process_bundle(&bundle);
            // Keep the drain preemptible by the shutdown-grace timeout.
            tokio::task::yield_now().await;
        }
        self.metrics.buffered_traces.set(self.buffer.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testutil::{bundle, span};
    use crate::store::memory::MemoryStore;

    fn pipeline() -> (Arc<Pipeline>, Arc<MemoryStore>, Arc<Metrics>, Arc<TraceBuffer>) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new());
        let buffer = Arc::new(TraceBuffer::new());
        let catalogue = Arc::new(Catalogue::bootstrap(store.clone()).unwrap());
        let events = EventWriter::new(store.clone(), metrics.clone());
        (
            Arc::new(Pipeline::new(buffer.clone(), catalogue, events, metrics.clone())),
            store,
            metrics,
            buffer,
        )
    }

    #[test]
    fn processing_turn_writes_catalogue_and_events() {
        let (pipeline, store, metrics, _) = pipeline();
        pipeline.process_bundle(&bundle(vec![
            span("a", "", "checkout", "POST /checkout"),
            span("b", "a", "order", "POST /orders"),
        ]));

        assert_eq!(store.paths().len(), 1);
        assert_eq!(store.path_events().len(), 1);
        assert_eq!(store.hop_events().len(), 1);
        assert_eq!(store.spans().len(), 2);
        assert_eq!(metrics.traces_flushed.get(), 1);
        assert_eq!(metrics.catalogue_paths_created.get(), 1);
        assert_eq!(metrics.broken_traces.get(), 0);
    }

    #[test]
    fn reprocessing_skips_catalogue_but_appends_events() {
        let (pipeline, store, metrics, _) = pipeline();
        let b = bundle(vec![
            span("a", "", "checkout", "POST /checkout"),
            span("b", "a", "order", "POST /orders"),
        ]);
        pipeline.process_bundle(&b);
        pipeline.process_bundle(&b);

        assert_eq!(store.paths().len(), 1);
        assert_eq!(metrics.catalogue_paths_created.get(), 1);
        assert_eq!(store.path_events().len(), 2);
        assert_eq!(store.hop_events().len(), 2);
        assert_eq!(store.spans().len(), 4);
    }

    #[test]
    fn broken_bundle_persists_spans_only() {
        let (pipeline, store, metrics, _) = pipeline();
        pipeline.process_bundle(&bundle(vec![
            span("a", "", "svc", "op"),
            span("b", "deadbeef", "svc", "op"),
        ]));

        assert_eq!(metrics.broken_traces.get(), 1);
        assert!(store.paths().is_empty());
        assert!(store.path_events().is_empty());
        assert_eq!(store.spans().len(), 2);
        assert!(store.spans().iter().all(|s| s.path_id == UNRESOLVED_PATH_ID));
    }

    #[test]
    fn empty_bundle_is_a_silent_no_op() {
        let (pipeline, store, metrics, _) = pipeline();
        pipeline.process_bundle(&bundle(vec![]));
        assert_eq!(metrics.traces_flushed.get(), 0);
        assert!(store.spans().is_empty());
    }

    #[tokio::test]
    async fn drain_remaining_processes_buffered_traces() {
        let (pipeline, store, metrics, buffer) = pipeline();
        for i in 0..10 {
            let mut root = span("a", "", "svc", "op");
            root.trace_id = format!("t{i}");
            buffer.add(root);
        }

        pipeline.drain_remaining().await;

        assert_eq!(store.path_events().len(), 10);
        assert_eq!(metrics.buffered_traces.get(), 0);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn processor_drains_queued_bundles_before_stopping_on_close() {
        let (pipeline, store, _, _) = pipeline();
        let (tx, rx) = broadcast::channel(16);

        for i in 0..3 {
            let mut root = span("a", "", "svc", "op");
            root.trace_id = format!("t{i}");
            tx.send(bundle(vec![root])).unwrap();
        }
        drop(tx);

        pipeline.run_processor(rx).await;
        assert_eq!(store.path_events().len(), 3);
    }

    #[tokio::test]
    async fn flusher_shutdown_closes_the_bundle_channel() {
        let (pipeline, store, _, buffer) = pipeline();
        let (tx, rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        buffer.add(span("a", "", "svc", "op"));
        let flusher = tokio::spawn(pipeline.clone().run_flusher(
            Duration::from_millis(5),
            tx,
            shutdown_rx,
        ));
        let processor = tokio::spawn(pipeline.clone().run_processor(rx));

        // Let at least one tick fire, then stop.
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        flusher.await.unwrap();
        processor.await.unwrap();

        assert_eq!(store.path_events().len(), 1);
        assert!(buffer.is_empty());
    }
}
