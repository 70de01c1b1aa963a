//! Persistence sinks.
//!
//! The pipeline writes to two logical stores: the catalogue (immutable
//! path/operation/hop shape records under content-addressed keys) and the
//! event store (append-only per-trace occurrence records). Both are opaque
//! to the core; implementations only need idempotent upsert on the
//! catalogue keys.

pub mod memory;
pub mod sqlite;

use thiserror::Error;

use crate::model::{
    HopEvent, HopRecord, HttpLogEntry, OperationRecord, PathEvent, PathRecord, StoredSpan,
};

/// Errors from sink operations. Treated as transient: logged and counted,
/// never retried within a processing turn.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("lock poisoned")]
    Lock,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Catalogue of unique call-graph shapes. Upserts are idempotent under the
/// record's content-addressed primary key.
pub trait CatalogueStore: Send + Sync {
    /// All path ids ever materialised; read once at startup to warm the
    /// in-process cache.
    fn load_path_ids(&self) -> Result<Vec<u32>, SinkError>;

    fn insert_path_id(&self, path_id: u32) -> Result<(), SinkError>;

    fn upsert_operation(&self, operation: &OperationRecord) -> Result<(), SinkError>;

    fn upsert_hop(&self, hop: &HopRecord) -> Result<(), SinkError>;

    fn upsert_path(&self, path: &PathRecord) -> Result<(), SinkError>;
}

/// Append-only store for per-trace events and flattened spans.
pub trait EventStore: Send + Sync {
    fn append_path_event(&self, event: &PathEvent) -> Result<(), SinkError>;

    fn append_hop_event(&self, event: &HopEvent) -> Result<(), SinkError>;

    fn append_span(&self, span: &StoredSpan) -> Result<(), SinkError>;

    fn append_http_log(&self, entry: &HttpLogEntry) -> Result<(), SinkError>;
}
