//! Mock traffic generator for local development.
//!
//! Publishes synthetic OTLP span payloads and HTTP access-log entries onto
//! the bus so the processor can be exercised without a running service
//! fleet.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use opentelemetry_proto::tonic::{
    common::v1::{any_value, AnyValue, KeyValue},
    resource::v1::Resource,
    trace::v1::{ResourceSpans, ScopeSpans, Span, TracesData},
};
use prost::Message;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracepath::model::HttpLogEntry;

/// Synthetic span and access-log publisher.
#[derive(Parser, Debug)]
#[command(name = "tracepath-mockgen", about = "Publish mock spans and logs to the bus")]
struct Args {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    nats_url: String,

    /// Subject for OTLP span payloads
    #[arg(long, env = "NATS_SUBJECT", default_value = "traces.service")]
    nats_subject: String,

    /// Subject for HTTP access-log entries
    #[arg(long, env = "NATS_LOG_SUBJECT", default_value = "logs")]
    nats_log_subject: String,

    /// Publish interval in milliseconds
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Number of distinct mock services
    #[arg(long, default_value_t = 7)]
    services: usize,
}

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH"];
const STATUS_CODES: &[i32] = &[200, 201, 400, 401, 403, 404, 500];
const RESOURCES: &[&str] = &["orders", "stock", "users", "payments", "carts"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracepath_mockgen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let services: Vec<String> = (1..=args.services)
        .map(|i| format!("service-{i}"))
        .collect();

    let client = async_nats::connect(&args.nats_url)
        .await
        .with_context(|| format!("connect to NATS at {}", args.nats_url))?;
    info!(url = %args.nats_url, "connected to NATS");

    let mut tick = tokio::time::interval(Duration::from_millis(args.interval_ms));
    loop {
        tick.tick().await;
        let mut rng = rand::thread_rng();

        let payload = generate_trace(&mut rng, &services);
        client
            .publish(args.nats_subject.clone(), payload.into())
            .await?;

        let log = serde_json::to_vec(&generate_http_log(&mut rng, &services))?;
        client
            .publish(args.nats_log_subject.clone(), log.into())
            .await?;
    }
}

/// A randomized two- or three-level call tree, one `ResourceSpans` block per
/// participating service, encoded as `TracesData`.
fn generate_trace(rng: &mut impl Rng, services: &[String]) -> Vec<u8> {
    let trace_id: [u8; 16] = rng.gen();
    let now_micros = chrono::Utc::now().timestamp_micros() as u64;

    let root_service = services.choose(rng).unwrap().clone();
    let root_id: [u8; 8] = rng.gen();
    let mut blocks = vec![resource_block(
        &root_service,
        vec![span(
            &trace_id,
            &root_id,
            None,
            &format!("{} /api/v1/{}", pick(rng, METHODS), pick(rng, RESOURCES)),
            now_micros,
            rng.gen_range(20_000..200_000),
            false,
        )],
    )];

    for _ in 0..rng.gen_range(1..=3) {
        let child_service = services.choose(rng).unwrap().clone();
        let child_id: [u8; 8] = rng.gen();
        let failed = rng.gen_bool(0.1);
        let mut spans = vec![span(
            &trace_id,
            &child_id,
            Some(&root_id),
            &format!("{} /api/v1/{}", pick(rng, METHODS), pick(rng, RESOURCES)),
            now_micros + rng.gen_range(1_000..10_000),
            rng.gen_range(5_000..50_000),
            failed,
        )];

        // Occasionally one more level below the child.
        if rng.gen_bool(0.3) {
            let leaf_id: [u8; 8] = rng.gen();
            spans.push(span(
                &trace_id,
                &leaf_id,
                Some(&child_id),
                &format!("{} /api/v1/{}", pick(rng, METHODS), pick(rng, RESOURCES)),
                now_micros + rng.gen_range(10_000..20_000),
                rng.gen_range(1_000..20_000),
                false,
            ));
        }
        blocks.push(resource_block(&child_service, spans));
    }

    TracesData {
        resource_spans: blocks,
    }
    .encode_to_vec()
}

fn resource_block(service: &str, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(Resource {
            attributes: vec![KeyValue {
                key: "service.name".into(),
                value: Some(AnyValue {
                    value: Some(any_value::Value::StringValue(service.to_string())),
                }),
            }],
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            spans,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn span(
    trace_id: &[u8],
    span_id: &[u8],
    parent: Option<&[u8]>,
    name: &str,
    start_micros: u64,
    duration_micros: u64,
    failed: bool,
) -> Span {
    let mut attributes = Vec::new();
    if failed {
        attributes.push(KeyValue {
            key: "error".into(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue("upstream timeout".into())),
            }),
        });
    }
    Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.to_vec(),
        parent_span_id: parent.map(|p| p.to_vec()).unwrap_or_default(),
        name: name.to_string(),
        kind: 2,
        start_time_unix_nano: start_micros * 1000,
        end_time_unix_nano: (start_micros + duration_micros) * 1000,
        attributes,
        ..Default::default()
    }
}

fn generate_http_log(rng: &mut impl Rng, services: &[String]) -> HttpLogEntry {
    let status_code = *pick(rng, STATUS_CODES);
    HttpLogEntry {
        service_name: services.choose(rng).unwrap().clone(),
        method: pick(rng, METHODS).to_string(),
        uri_path: format!("/api/v1/{}", pick(rng, RESOURCES)),
        host: "shop.example.com".into(),
        remote_ip: format!("10.0.{}.{}", rng.gen_range(0..255), rng.gen_range(1..255)),
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36".into(),
        referer: String::new(),
        request_id: uuid::Uuid::new_v4().to_string(),
        start_time: chrono::Utc::now().timestamp(),
        start_time_date: String::new(),
        duration: rng.gen_range(50..5000),
        status_code,
        error_message: if status_code >= 500 {
            "internal error".into()
        } else {
            String::new()
        },
    }
}

fn pick<'a, T>(rng: &mut impl Rng, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}
