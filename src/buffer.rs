//! Quiescence-window trace buffer.
//!
//! Spans accumulate per trace id until no new span has arrived for the
//! configured window; the flusher then drains the whole trace as one bundle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::model::{SpanRecord, TraceBundle};

struct PendingTrace {
    /// Keyed by span id, so redelivered spans overwrite instead of duplicate.
    spans: HashMap<String, SpanRecord>,
    last_touch: Instant,
}

/// Shared map from trace id to its pending spans plus last-touch timestamp.
pub struct TraceBuffer {
    traces: DashMap<String, PendingTrace>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        TraceBuffer {
            traces: DashMap::new(),
        }
    }

    /// Appends a span to its trace and refreshes the trace's last-touch time.
    pub fn add(&self, span: SpanRecord) {
        let mut entry = self
            .traces
            .entry(span.trace_id.clone())
            .or_insert_with(|| PendingTrace {
                spans: HashMap::new(),
                last_touch: Instant::now(),
            });
        entry.last_touch = Instant::now();
        entry.spans.insert(span.span_id.clone(), span);
    }

    /// Removes and returns every trace whose last arrival is older than
    /// `window`. A window of zero force-drains everything (shutdown).
    ///
    /// The candidate scan and the removal are separate steps; `remove_if`
    /// re-checks the expiry so a trace touched in between stays buffered.
    pub fn drain_expired(&self, window: Duration) -> Vec<TraceBundle> {
        let expired: Vec<String> = self
            .traces
            .iter()
            .filter(|entry| entry.value().last_touch.elapsed() >= window)
            .map(|entry| entry.key().clone())
            .collect();

        let mut bundles = Vec::with_capacity(expired.len());
        for trace_id in expired {
            if let Some((trace_id, pending)) = self
                .traces
                .remove_if(&trace_id, |_, pending| pending.last_touch.elapsed() >= window)
            {
                bundles.push(TraceBundle {
                    trace_id,
                    spans: pending.spans.into_values().collect(),
                });
            }
        }
        bundles
    }

    /// Number of traces currently buffered.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testutil::span;

    fn span_for_trace(trace_id: &str, span_id: &str) -> SpanRecord {
        let mut s = span(span_id, "", "svc", "op");
        s.trace_id = trace_id.into();
        s
    }

    #[test]
    fn spans_group_by_trace_id() {
        let buffer = TraceBuffer::new();
        buffer.add(span_for_trace("t1", "a"));
        buffer.add(span_for_trace("t1", "b"));
        buffer.add(span_for_trace("t2", "a"));
        assert_eq!(buffer.len(), 2);

        let mut bundles = buffer.drain_expired(Duration::ZERO);
        bundles.sort_by(|a, b| a.trace_id.cmp(&b.trace_id));
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].trace_id, "t1");
        assert_eq!(bundles[0].spans.len(), 2);
        assert_eq!(bundles[1].spans.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn duplicate_span_ids_are_collapsed() {
        let buffer = TraceBuffer::new();
        buffer.add(span_for_trace("t1", "a"));
        buffer.add(span_for_trace("t1", "a"));
        let bundles = buffer.drain_expired(Duration::ZERO);
        assert_eq!(bundles[0].spans.len(), 1);
    }

    #[test]
    fn quiescent_traces_survive_a_long_window() {
        let buffer = TraceBuffer::new();
        buffer.add(span_for_trace("t1", "a"));
        assert!(buffer.drain_expired(Duration::from_secs(3600)).is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn expired_traces_drain_after_the_window() {
        let buffer = TraceBuffer::new();
        buffer.add(span_for_trace("t1", "a"));
        std::thread::sleep(Duration::from_millis(30));
        let bundles = buffer.drain_expired(Duration::from_millis(10));
        assert_eq!(bundles.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn arrival_refreshes_the_window() {
        let buffer = TraceBuffer::new();
        buffer.add(span_for_trace("t1", "a"));
        std::thread::sleep(Duration::from_millis(30));
        buffer.add(span_for_trace("t1", "b"));
        // The first span is old, but the trace as a whole is fresh.
        assert!(buffer.drain_expired(Duration::from_millis(25)).is_empty());
        assert_eq!(buffer.len(), 1);
    }
}
