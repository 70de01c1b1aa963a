//! Per-trace event appends.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::graph::CallGraph;
use crate::metrics::Metrics;
use crate::model::{HopEvent, PathEvent, SpanRecord, StoredSpan};
use crate::path;
use crate::store::EventStore;

/// Appends one `PathEvent`, one `HopEvent` per edge and one flattened span
/// per record for every processed trace.
///
/// Appends are fire-and-forget: a failed write is logged and counted and the
/// turn continues with the remaining records.
pub struct EventWriter {
    store: Arc<dyn EventStore>,
    metrics: Arc<Metrics>,
}

impl EventWriter {
    pub fn new(store: Arc<dyn EventStore>, metrics: Arc<Metrics>) -> Self {
        EventWriter { store, metrics }
    }

    /// Writes the full event set for a successfully assembled trace.
    pub fn write_trace(&self, graph: &CallGraph, path_id: u32) {
        let root = graph.span(graph.root());
        let path_event = PathEvent {
            event_id: Uuid::new_v4().to_string(),
            path_id,
            trace_id: root.trace_id.clone(),
            timestamp_millis: root.start_unix_millis(),
        };
        if let Err(e) = self.store.append_path_event(&path_event) {
            self.metrics.sink_errors.inc();
            warn!(trace_id = %root.trace_id, "path event append failed: {e}");
        }

        for (parent, child) in graph.edges() {
            let child_span = graph.span(child);
            let hop_event = HopEvent {
                event_id: Uuid::new_v4().to_string(),
                hop_id: path::hop_id(graph.span(parent), child_span, path_id),
                timestamp_millis: child_span.start_unix_millis(),
                duration_micros: child_span.duration_micros,
                has_error: child_span.has_error(),
            };
            if let Err(e) = self.store.append_hop_event(&hop_event) {
                self.metrics.sink_errors.inc();
                warn!(trace_id = %root.trace_id, "hop event append failed: {e}");
            }
        }

        for id in 0..graph.len() {
            self.write_span(graph.span(id), path_id);
        }
    }

    /// Persists raw span records without path/hop events; used for broken
    /// traces so the data is not lost. `path_id` 0 marks the unresolved
    /// shape.
    pub fn write_spans(&self, spans: &[SpanRecord], path_id: u32) {
        for span in spans {
            self.write_span(span, path_id);
        }
    }

    fn write_span(&self, span: &SpanRecord, path_id: u32) {
        if let Err(e) = self.store.append_span(&StoredSpan::from_record(span, path_id)) {
            self.metrics.sink_errors.inc();
            warn!(trace_id = %span.trace_id, span_id = %span.span_id, "span append failed: {e}");
        }
    }
}
