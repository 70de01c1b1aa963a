//! HTTP access-log ingest lane.

use chrono::{TimeZone, Utc};
use tracing::warn;

use crate::metrics::Metrics;
use crate::model::HttpLogEntry;
use crate::store::EventStore;

/// Operational endpoints whose access logs are noise.
const IGNORED_PATHS: &[&str] = &["/-/ready", "/metrics"];

/// Parses one JSON log message and appends it to the event store. Probe
/// endpoints are skipped silently; malformed JSON is dropped with a counter
/// increment.
pub fn handle_log_message(payload: &[u8], store: &dyn EventStore, metrics: &Metrics) {
    let mut entry: HttpLogEntry = match serde_json::from_slice(payload) {
        Ok(entry) => entry,
        Err(e) => {
            metrics.log_decode_errors.inc();
            warn!("dropping log message: {e}");
            return;
        }
    };

    if IGNORED_PATHS.contains(&entry.uri_path.as_str()) {
        return;
    }

    entry.start_time_date = day_key(entry.start_time);

    match store.append_http_log(&entry) {
        Ok(()) => metrics.log_entries.inc(),
        Err(e) => {
            metrics.sink_errors.inc();
            warn!(service = %entry.service_name, "log append failed: {e}");
        }
    }
}

/// `YYYYMMDD` key of a unix-seconds timestamp, UTC.
fn day_key(start_unix_secs: i64) -> String {
    Utc.timestamp_opt(start_unix_secs, 0)
        .single()
        .map(|t| t.format("%Y%m%d").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn entry_json(uri_path: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "service_name": "checkout",
            "method": "POST",
            "uri_path": uri_path,
            "start_time": 1_700_000_000,
            "duration": 12,
            "status_code": 200,
        }))
        .unwrap()
    }

    #[test]
    fn accepted_entry_is_stamped_and_stored() {
        let store = MemoryStore::new();
        let metrics = Metrics::new();

        handle_log_message(&entry_json("/checkout"), &store, &metrics);

        let logs = store.http_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].service_name, "checkout");
        // 2023-11-14T22:13:20Z
        assert_eq!(logs[0].start_time_date, "20231114");
        assert_eq!(metrics.log_entries.get(), 1);
    }

    #[test]
    fn probe_endpoints_are_skipped() {
        let store = MemoryStore::new();
        let metrics = Metrics::new();

        handle_log_message(&entry_json("/-/ready"), &store, &metrics);
        handle_log_message(&entry_json("/metrics"), &store, &metrics);

        assert!(store.http_logs().is_empty());
        assert_eq!(metrics.log_entries.get(), 0);
        assert_eq!(metrics.log_decode_errors.get(), 0);
    }

    #[test]
    fn malformed_json_is_dropped_and_counted() {
        let store = MemoryStore::new();
        let metrics = Metrics::new();

        handle_log_message(b"{not json", &store, &metrics);

        assert!(store.http_logs().is_empty());
        assert_eq!(metrics.log_decode_errors.get(), 1);
    }
}
