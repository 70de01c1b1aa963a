//! In-memory and persisted data shapes for the trace pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Span kind as carried by OTLP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Maps the OTLP `SpanKind` enum value; unspecified collapses to internal.
    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

/// OTLP attribute value, kept as a tagged variant until persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Array(Vec<AttrValue>),
    Map(Vec<(String, AttrValue)>),
}

impl AttrValue {
    /// Canonical textual form: bools as `true`/`false`, integers in decimal,
    /// doubles via the shortest round-trip, arrays and maps as JSON.
    pub fn render(&self) -> String {
        match self {
            AttrValue::Str(s) => s.clone(),
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Double(d) => d.to_string(),
            AttrValue::Array(_) | AttrValue::Map(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Str(s) => serde_json::Value::String(s.clone()),
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Int(i) => serde_json::Value::from(*i),
            AttrValue::Double(d) => serde_json::Value::from(*d),
            AttrValue::Array(values) => {
                serde_json::Value::Array(values.iter().map(AttrValue::to_json).collect())
            }
            AttrValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn is_empty_text(&self) -> bool {
        match self {
            AttrValue::Str(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// One normalised span, as produced by the decoder and buffered until the
/// owning trace flushes.
///
/// `service` is resolved from the resource-level `service.name` attribute and
/// stamped onto every span of that resource; `parent_span_id` is empty for
/// the root span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub service: String,
    pub operation: String,
    pub kind: SpanKind,
    pub start_unix_micros: i64,
    pub duration_micros: i64,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl SpanRecord {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }

    /// True iff an `error` or `error.message` attribute is present and
    /// non-empty. A bool `true` counts: only empty strings are treated as
    /// absent.
    pub fn has_error(&self) -> bool {
        ["error", "error.message"]
            .iter()
            .any(|key| self.attributes.get(*key).is_some_and(|v| !v.is_empty_text()))
    }

    /// Concatenation of the `error` and `error.message` attribute texts.
    pub fn error_text(&self) -> String {
        let mut text = String::new();
        for key in ["error", "error.message"] {
            if let Some(value) = self.attributes.get(key) {
                text.push_str(&value.render());
            }
        }
        text
    }

    pub fn start_unix_millis(&self) -> i64 {
        self.start_unix_micros / 1000
    }
}

/// The spans of one trace, emitted together once the trace has been quiescent
/// for the buffer window. Span ids are unique within a bundle.
#[derive(Debug, Clone)]
pub struct TraceBundle {
    pub trace_id: String,
    pub spans: Vec<SpanRecord>,
}

impl TraceBundle {
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

// ── Catalogue records (content-addressed, upserted idempotently) ────────────

/// A (service, operation) pair observed anywhere in a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op_id: String,
    pub name: String,
    pub service: String,
}

/// A caller→callee edge under one specific path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRecord {
    pub hop_id: String,
    pub path_id: u32,
    pub caller_service: String,
    pub caller_operation: String,
    pub called_service: String,
    pub called_operation: String,
}

/// Edge entry inside a `PathRecord`, referencing operations by their ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHop {
    pub hop_id: String,
    pub source_op_id: String,
    pub target_op_id: String,
}

/// Catalogue entry for one unique call-graph shape. Written once per
/// distinct path id, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRecord {
    pub path_id: u32,
    pub created_at_millis: i64,
    pub longest_chain: u32,
    pub longest_error_chain: u32,
    pub operations: Vec<OperationRecord>,
    pub hops: Vec<PathHop>,
}

// ── Event records (append-only, one set per processed trace) ────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEvent {
    pub event_id: String,
    pub path_id: u32,
    pub trace_id: String,
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopEvent {
    pub event_id: String,
    pub hop_id: String,
    pub timestamp_millis: i64,
    pub duration_micros: i64,
    pub has_error: bool,
}

/// Flattened span as persisted to the event store, tagged with the resolved
/// path id. Broken traces are persisted with `path_id = 0` so the raw data
/// is not lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSpan {
    pub event_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub service: String,
    pub operation: String,
    pub kind: SpanKind,
    pub start_unix_micros: i64,
    pub duration_micros: i64,
    pub attributes: BTreeMap<String, String>,
    pub has_error: bool,
    pub error_text: String,
    pub path_id: u32,
}

impl StoredSpan {
    /// Flattens a `SpanRecord`, coercing every attribute to its textual form.
    pub fn from_record(record: &SpanRecord, path_id: u32) -> Self {
        StoredSpan {
            event_id: uuid::Uuid::new_v4().to_string(),
            trace_id: record.trace_id.clone(),
            span_id: record.span_id.clone(),
            parent_span_id: record.parent_span_id.clone(),
            service: record.service.clone(),
            operation: record.operation.clone(),
            kind: record.kind,
            start_unix_micros: record.start_unix_micros,
            duration_micros: record.duration_micros,
            attributes: record
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.render()))
                .collect(),
            has_error: record.has_error(),
            error_text: record.error_text(),
            path_id,
        }
    }
}

/// One structured HTTP access-log entry, consumed from the log subject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpLogEntry {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub uri_path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub remote_ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub referer: String,
    #[serde(default)]
    pub request_id: String,
    /// Unix seconds of the request start.
    #[serde(default)]
    pub start_time: i64,
    /// `YYYYMMDD` of `start_time`, stamped at ingestion.
    #[serde(default)]
    pub start_time_date: String,
    /// Request duration in milliseconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub error_message: String,
}
