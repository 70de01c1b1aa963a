//! First-sight catalogue materialisation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::graph::CallGraph;
use crate::model::{HopRecord, OperationRecord, PathHop, PathRecord};
use crate::path;
use crate::store::{CatalogueStore, SinkError};

/// Long-lived service owning the set of already-materialised path ids.
///
/// The set is process-local and append-only; in multi-process deployments
/// the idempotent upserts keep the catalogue store itself consistent.
pub struct Catalogue {
    store: Arc<dyn CatalogueStore>,
    known_path_ids: Mutex<HashSet<u32>>,
}

impl Catalogue {
    /// Creates the catalogue and warms `known_path_ids` from the store.
    pub fn bootstrap(store: Arc<dyn CatalogueStore>) -> Result<Self, SinkError> {
        let known: HashSet<u32> = store.load_path_ids()?.into_iter().collect();
        info!(paths = known.len(), "catalogue bootstrap complete");
        Ok(Catalogue {
            store,
            known_path_ids: Mutex::new(known),
        })
    }

    pub fn is_known(&self, path_id: u32) -> bool {
        self.known_path_ids.lock().unwrap().contains(&path_id)
    }

    /// Materialises the path, operation and hop records for a graph on first
    /// observation of its path id. Returns `true` when the path was newly
    /// created, `false` when it was already known and the call was a no-op.
    ///
    /// On a sink failure the id is deliberately NOT marked known, so a later
    /// trace with the same shape retries the materialisation; the upserts
    /// make that retry converge.
    pub fn observe(&self, graph: &CallGraph, path_id: u32) -> Result<bool, SinkError> {
        if self.is_known(path_id) {
            return Ok(false);
        }

        let record = self.materialise(graph, path_id)?;
        self.store.upsert_path(&record)?;
        self.store.insert_path_id(path_id)?;

        self.known_path_ids.lock().unwrap().insert(path_id);
        debug!(
            path_id,
            operations = record.operations.len(),
            hops = record.hops.len(),
            "path created"
        );
        Ok(true)
    }

    /// Walks the graph depth-first from the root (guarded by a visited set
    /// over span ids), upserting an `Operation` per node and a `Hop` per
    /// parent→child edge while accumulating the path's member lists in
    /// pre-order.
    fn materialise(&self, graph: &CallGraph, path_id: u32) -> Result<PathRecord, SinkError> {
        let mut record = PathRecord {
            path_id,
            created_at_millis: graph.span(graph.root()).start_unix_millis(),
            longest_chain: path::longest_chain(graph),
            longest_error_chain: path::longest_error_chain(graph),
            operations: Vec::new(),
            hops: Vec::new(),
        };

        let mut visited: HashSet<&str> = HashSet::with_capacity(graph.len());
        self.visit(graph, graph.root(), path_id, &mut visited, &mut record)?;
        Ok(record)
    }

    fn visit<'g>(
        &self,
        graph: &'g CallGraph,
        id: crate::graph::NodeId,
        path_id: u32,
        visited: &mut HashSet<&'g str>,
        record: &mut PathRecord,
    ) -> Result<(), SinkError> {
        let span = graph.span(id);
        if !visited.insert(span.span_id.as_str()) {
            return Ok(());
        }

        let op_id = path::operation_id(&span.service, &span.operation);
        if !record.operations.iter().any(|op| op.op_id == op_id) {
            let operation = OperationRecord {
                op_id: op_id.clone(),
                name: span.operation.clone(),
                service: span.service.clone(),
            };
            self.store.upsert_operation(&operation)?;
            record.operations.push(operation);
        }

        for &child in graph.children(id) {
            let child_span = graph.span(child);
            let hop_id = path::hop_id(span, child_span, path_id);
            self.store.upsert_hop(&HopRecord {
                hop_id: hop_id.clone(),
                path_id,
                caller_service: span.service.clone(),
                caller_operation: span.operation.clone(),
                called_service: child_span.service.clone(),
                called_operation: child_span.operation.clone(),
            })?;
            record.hops.push(PathHop {
                hop_id,
                source_op_id: op_id.clone(),
                target_op_id: path::operation_id(&child_span.service, &child_span.operation),
            });
            self.visit(graph, child, path_id, visited, record)?;
        }
        Ok(())
    }
}
