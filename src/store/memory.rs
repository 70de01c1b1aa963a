//! In-memory sinks, used by the test suite and `--dry-run` style setups.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::model::{
    HopEvent, HopRecord, HttpLogEntry, OperationRecord, PathEvent, PathRecord, StoredSpan,
};
use crate::store::{CatalogueStore, EventStore, SinkError};

/// Catalogue and event store over plain maps/vectors. Upsert semantics match
/// the SQLite sink: catalogue keys are first-write-wins, events append.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    path_ids: Vec<u32>,
    operations: BTreeMap<String, OperationRecord>,
    hops: BTreeMap<String, HopRecord>,
    paths: BTreeMap<u32, PathRecord>,
    path_events: Vec<PathEvent>,
    hop_events: Vec<HopEvent>,
    spans: Vec<StoredSpan>,
    http_logs: Vec<HttpLogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.inner.lock().unwrap().operations.values().cloned().collect()
    }

    pub fn hops(&self) -> Vec<HopRecord> {
        self.inner.lock().unwrap().hops.values().cloned().collect()
    }

    pub fn paths(&self) -> Vec<PathRecord> {
        self.inner.lock().unwrap().paths.values().cloned().collect()
    }

    pub fn path_events(&self) -> Vec<PathEvent> {
        self.inner.lock().unwrap().path_events.clone()
    }

    pub fn hop_events(&self) -> Vec<HopEvent> {
        self.inner.lock().unwrap().hop_events.clone()
    }

    pub fn spans(&self) -> Vec<StoredSpan> {
        self.inner.lock().unwrap().spans.clone()
    }

    pub fn http_logs(&self) -> Vec<HttpLogEntry> {
        self.inner.lock().unwrap().http_logs.clone()
    }
}

impl CatalogueStore for MemoryStore {
    fn load_path_ids(&self) -> Result<Vec<u32>, SinkError> {
        Ok(self.inner.lock().map_err(|_| SinkError::Lock)?.path_ids.clone())
    }

    fn insert_path_id(&self, path_id: u32) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().map_err(|_| SinkError::Lock)?;
        if !inner.path_ids.contains(&path_id) {
            inner.path_ids.push(path_id);
        }
        Ok(())
    }

    fn upsert_operation(&self, operation: &OperationRecord) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().map_err(|_| SinkError::Lock)?;
        inner
            .operations
            .entry(operation.op_id.clone())
            .or_insert_with(|| operation.clone());
        Ok(())
    }

    fn upsert_hop(&self, hop: &HopRecord) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().map_err(|_| SinkError::Lock)?;
        inner
            .hops
            .entry(hop.hop_id.clone())
            .or_insert_with(|| hop.clone());
        Ok(())
    }

    fn upsert_path(&self, path: &PathRecord) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().map_err(|_| SinkError::Lock)?;
        inner
            .paths
            .entry(path.path_id)
            .or_insert_with(|| path.clone());
        Ok(())
    }
}

impl EventStore for MemoryStore {
    fn append_path_event(&self, event: &PathEvent) -> Result<(), SinkError> {
        self.inner
            .lock()
            .map_err(|_| SinkError::Lock)?
            .path_events
            .push(event.clone());
        Ok(())
    }

    fn append_hop_event(&self, event: &HopEvent) -> Result<(), SinkError> {
        self.inner
            .lock()
            .map_err(|_| SinkError::Lock)?
            .hop_events
            .push(event.clone());
        Ok(())
    }

    fn append_span(&self, span: &StoredSpan) -> Result<(), SinkError> {
        self.inner
            .lock()
            .map_err(|_| SinkError::Lock)?
            .spans
            .push(span.clone());
        Ok(())
    }

    fn append_http_log(&self, entry: &HttpLogEntry) -> Result<(), SinkError> {
        self.inner
            .lock()
            .map_err(|_| SinkError::Lock)?
            .http_logs
            .push(entry.clone());
        Ok(())
    }
}
