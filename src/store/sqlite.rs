//! SQLite-backed catalogue and event store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::model::{
    HopEvent, HopRecord, HttpLogEntry, OperationRecord, PathEvent, PathRecord, StoredSpan,
};
use crate::store::{CatalogueStore, EventStore, SinkError};

/// Single-connection SQLite store serving both sink traits.
///
/// Catalogue tables use `INSERT OR IGNORE` under their content-addressed
/// primary keys, so redelivered traces and operational re-replays converge
/// without duplicate rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS path_id (
                path_id INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS operation (
                op_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                service TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hop (
                hop_id TEXT PRIMARY KEY,
                path_id INTEGER NOT NULL,
                caller_service TEXT NOT NULL,
                caller_operation TEXT NOT NULL,
                called_service TEXT NOT NULL,
                called_operation TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS path (
                path_id INTEGER PRIMARY KEY,
                created_at_millis INTEGER NOT NULL,
                longest_chain INTEGER NOT NULL,
                longest_error_chain INTEGER NOT NULL,
                operations TEXT NOT NULL,
                hops TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS path_event (
                event_id TEXT PRIMARY KEY,
                path_id INTEGER NOT NULL,
                trace_id TEXT NOT NULL,
                timestamp_millis INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hop_event (
                event_id TEXT PRIMARY KEY,
                hop_id TEXT NOT NULL,
                timestamp_millis INTEGER NOT NULL,
                duration_micros INTEGER NOT NULL,
                has_error INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS span (
                event_id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                span_id TEXT NOT NULL,
                parent_span_id TEXT NOT NULL,
                service TEXT NOT NULL,
                operation TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_unix_micros INTEGER NOT NULL,
                duration_micros INTEGER NOT NULL,
                attributes TEXT NOT NULL,
                has_error INTEGER NOT NULL,
                error_text TEXT NOT NULL,
                path_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS http_log_entry (
                request_id TEXT,
                service_name TEXT NOT NULL,
                method TEXT NOT NULL,
                uri_path TEXT NOT NULL,
                host TEXT NOT NULL,
                remote_ip TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                referer TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                start_time_date TEXT NOT NULL,
                duration INTEGER NOT NULL,
                status_code INTEGER NOT NULL,
                error_message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_hop_path ON hop(path_id);
            CREATE INDEX IF NOT EXISTS idx_path_event_path ON path_event(path_id);
            CREATE INDEX IF NOT EXISTS idx_hop_event_hop ON hop_event(hop_id);
            CREATE INDEX IF NOT EXISTS idx_span_trace ON span(trace_id);
            CREATE INDEX IF NOT EXISTS idx_span_path ON span(path_id);
            CREATE INDEX IF NOT EXISTS idx_http_log_date ON http_log_entry(start_time_date);
            "#,
        )?;

        Ok(())
    }
}

impl CatalogueStore for SqliteStore {
    fn load_path_ids(&self) -> Result<Vec<u32>, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        let mut stmt = conn.prepare("SELECT path_id FROM path_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, u32>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn insert_path_id(&self, path_id: u32) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            "INSERT OR IGNORE INTO path_id (path_id) VALUES (?1)",
            params![path_id],
        )?;
        Ok(())
    }

    fn upsert_operation(&self, operation: &OperationRecord) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            "INSERT OR IGNORE INTO operation (op_id, name, service) VALUES (?1, ?2, ?3)",
            params![operation.op_id, operation.name, operation.service],
        )?;
        Ok(())
    }

    fn upsert_hop(&self, hop: &HopRecord) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            r#"INSERT OR IGNORE INTO hop
               (hop_id, path_id, caller_service, caller_operation, called_service, called_operation)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                hop.hop_id,
                hop.path_id,
                hop.caller_service,
                hop.caller_operation,
                hop.called_service,
                hop.called_operation,
            ],
        )?;
        Ok(())
    }

    fn upsert_path(&self, path: &PathRecord) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            r#"INSERT OR IGNORE INTO path
               (path_id, created_at_millis, longest_chain, longest_error_chain, operations, hops)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                path.path_id,
                path.created_at_millis,
                path.longest_chain,
                path.longest_error_chain,
                serde_json::to_string(&path.operations)?,
                serde_json::to_string(&path.hops)?,
            ],
        )?;
        Ok(())
    }
}

impl EventStore for SqliteStore {
    fn append_path_event(&self, event: &PathEvent) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            r#"INSERT INTO path_event (event_id, path_id, trace_id, timestamp_millis)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                event.event_id,
                event.path_id,
                event.trace_id,
                event.timestamp_millis
            ],
        )?;
        Ok(())
    }

    fn append_hop_event(&self, event: &HopEvent) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            r#"INSERT INTO hop_event (event_id, hop_id, timestamp_millis, duration_micros, has_error)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                event.event_id,
                event.hop_id,
                event.timestamp_millis,
                event.duration_micros,
                event.has_error,
            ],
        )?;
        Ok(())
    }

    fn append_span(&self, span: &StoredSpan) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            r#"INSERT INTO span
               (event_id, trace_id, span_id, parent_span_id, service, operation, kind,
                start_unix_micros, duration_micros, attributes, has_error, error_text, path_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                span.event_id,
                span.trace_id,
                span.span_id,
                span.parent_span_id,
                span.service,
                span.operation,
                span.kind.as_str(),
                span.start_unix_micros,
                span.duration_micros,
                serde_json::to_string(&span.attributes)?,
                span.has_error,
                span.error_text,
                span.path_id,
            ],
        )?;
        Ok(())
    }

    fn append_http_log(&self, entry: &HttpLogEntry) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Lock)?;
        conn.execute(
            r#"INSERT INTO http_log_entry
               (request_id, service_name, method, uri_path, host, remote_ip, user_agent,
                referer, start_time, start_time_date, duration, status_code, error_message)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                entry.request_id,
                entry.service_name,
                entry.method,
                entry.uri_path,
                entry.host,
                entry.remote_ip,
                entry.user_agent,
                entry.referer,
                entry.start_time,
                entry.start_time_date,
                entry.duration,
                entry.status_code,
                entry.error_message,
            ],
        )?;
        Ok(())
    }
}
