//! OTLP span decoding: turns raw bus payloads into `SpanRecord`s.

use std::collections::BTreeMap;

use opentelemetry_proto::tonic::{
    common::v1::{any_value::Value as AnyValueKind, AnyValue},
    trace::v1::TracesData,
};
use prost::Message;

use crate::error::DecodeError;
use crate::model::{AttrValue, SpanKind, SpanRecord};

/// Decodes one OTLP `TracesData` protobuf into normalised span records.
///
/// For every `ResourceSpans` the resource-level `service.name` attribute is
/// resolved (default `"unknown"` when absent or not a string) and stamped
/// onto each span underneath it.
pub fn decode_traces(payload: &[u8]) -> Result<Vec<SpanRecord>, DecodeError> {
    let data = TracesData::decode(payload)?;

    let mut records = Vec::new();
    for resource_spans in data.resource_spans {
        let service = resource_spans
            .resource
            .as_ref()
            .and_then(|r| {
                r.attributes
                    .iter()
                    .find(|kv| kv.key == "service.name")
                    .and_then(|kv| kv.value.as_ref())
                    .and_then(|v| {
                        if let Some(AnyValueKind::StringValue(s)) = &v.value {
                            if s.is_empty() {
                                None
                            } else {
                                Some(s.clone())
                            }
                        } else {
                            None
                        }
                    })
            })
            .unwrap_or_else(|| "unknown".to_string());

        for scope_spans in resource_spans.scope_spans {
            for span in scope_spans.spans {
                let mut attributes = BTreeMap::new();
                for kv in &span.attributes {
                    if let Some(value) = convert_any_value(&kv.value) {
                        attributes.insert(kv.key.clone(), value);
                    }
                }

                let start_unix_micros = (span.start_time_unix_nano / 1000) as i64;
                let end_unix_micros = (span.end_time_unix_nano / 1000) as i64;

                records.push(SpanRecord {
                    trace_id: hex::encode(&span.trace_id),
                    span_id: hex::encode(&span.span_id),
                    parent_span_id: hex::encode(&span.parent_span_id),
                    service: service.clone(),
                    operation: span.name.clone(),
                    kind: SpanKind::from_otlp(span.kind),
                    start_unix_micros,
                    duration_micros: (end_unix_micros - start_unix_micros).max(0),
                    attributes,
                });
            }
        }
    }

    Ok(records)
}

fn convert_any_value(value: &Option<AnyValue>) -> Option<AttrValue> {
    match value.as_ref().and_then(|v| v.value.as_ref())? {
        AnyValueKind::StringValue(s) => Some(AttrValue::Str(s.clone())),
        AnyValueKind::BoolValue(b) => Some(AttrValue::Bool(*b)),
        AnyValueKind::IntValue(i) => Some(AttrValue::Int(*i)),
        AnyValueKind::DoubleValue(d) => Some(AttrValue::Double(*d)),
        AnyValueKind::BytesValue(b) => Some(AttrValue::Str(hex::encode(b))),
        AnyValueKind::ArrayValue(arr) => Some(AttrValue::Array(
            arr.values
                .iter()
                .filter_map(|v| convert_any_value(&Some(v.clone())))
                .collect(),
        )),
        AnyValueKind::KvlistValue(kvs) => Some(AttrValue::Map(
            kvs.values
                .iter()
                .filter_map(|kv| Some((kv.key.clone(), convert_any_value(&kv.value)?)))
                .collect(),
        )),
    }
}

#[cfg(test)]
pub mod testutil {
    //! Builders for OTLP payloads used across the test suite.

    use opentelemetry_proto::tonic::{
        common::v1::{any_value, AnyValue, KeyValue},
        resource::v1::Resource,
        trace::v1::{ResourceSpans, ScopeSpans, Span, TracesData},
    };
    use prost::Message;

    pub fn string_attr(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    pub fn bool_attr(key: &str, value: bool) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::BoolValue(value)),
            }),
        }
    }

    pub fn span(
        trace_id: &[u8],
        span_id: &[u8],
        parent_span_id: &[u8],
        name: &str,
        start_micros: u64,
        duration_micros: u64,
        attributes: Vec<KeyValue>,
    ) -> Span {
        Span {
            trace_id: trace_id.to_vec(),
            span_id: span_id.to_vec(),
            parent_span_id: parent_span_id.to_vec(),
            name: name.to_string(),
            kind: 2,
            start_time_unix_nano: start_micros * 1000,
            end_time_unix_nano: (start_micros + duration_micros) * 1000,
            attributes,
            ..Default::default()
        }
    }

    pub fn resource_spans(service: &str, spans: Vec<Span>) -> ResourceSpans {
        ResourceSpans {
            resource: Some(Resource {
                attributes: vec![string_attr("service.name", service)],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn encode(resource_spans: Vec<ResourceSpans>) -> Vec<u8> {
        TracesData { resource_spans }.encode_to_vec()
    }
}
