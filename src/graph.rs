//! Call-graph assembly from a trace bundle.

use std::collections::HashMap;

use crate::error::BrokenTrace;
use crate::model::{SpanRecord, TraceBundle};

/// Index of a node within its `CallGraph` arena.
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub span: SpanRecord,
    pub children: Vec<NodeId>,
}

/// The reconstructed call graph of one trace: a tree rooted at the single
/// span with no parent, children ordered by arrival.
#[derive(Debug, Clone)]
pub struct CallGraph {
    nodes: Vec<GraphNode>,
    root: NodeId,
}

impl CallGraph {
    /// Assembles a graph from a bundle, two-pass.
    ///
    /// Pass one creates one node per span and indexes them by span id; pass
    /// two resolves every non-root span's parent and appends the child in
    /// arrival order. Fails when no root exists, more than one root exists,
    /// a parent id does not resolve within the bundle, or the parent edges
    /// contain a cycle.
    pub fn from_bundle(bundle: &TraceBundle) -> Result<Self, BrokenTrace> {
        let mut nodes: Vec<GraphNode> = Vec::with_capacity(bundle.spans.len());
        let mut by_span_id: HashMap<&str, NodeId> = HashMap::with_capacity(bundle.spans.len());

        for span in &bundle.spans {
            by_span_id.insert(span.span_id.as_str(), nodes.len());
            nodes.push(GraphNode {
                span: span.clone(),
                children: Vec::new(),
            });
        }

        let roots: Vec<NodeId> = (0..nodes.len())
            .filter(|&id| nodes[id].span.is_root())
            .collect();
        let root = match roots.as_slice() {
            [] => return Err(BrokenTrace::NoRoot),
            [root] => *root,
            many => return Err(BrokenTrace::MultipleRoots(many.len())),
        };

        for id in 0..nodes.len() {
            if id == root {
                continue;
            }
            let parent_span_id = nodes[id].span.parent_span_id.clone();
            match by_span_id.get(parent_span_id.as_str()) {
                Some(&parent) => nodes[parent].children.push(id),
                None => {
                    return Err(BrokenTrace::MissingParent {
                        span_id: nodes[id].span.span_id.clone(),
                        parent_span_id,
                    })
                }
            }
        }

        let graph = CallGraph { nodes, root };

        // Every parent resolved and exactly one root exists, so any node not
        // reachable from the root sits on a parent cycle.
        if graph.reachable_from_root() != graph.nodes.len() {
            return Err(BrokenTrace::Cycle);
        }

        Ok(graph)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn span(&self, id: NodeId) -> &SpanRecord {
        &self.nodes[id].span
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent→child edges in depth-first pre-order from the root.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            for &child in self.nodes[id].children.iter().rev() {
                edges.push((id, child));
                stack.push(child);
            }
        }
        edges
    }

    fn reachable_from_root(&self) -> usize {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        seen[self.root] = true;
        let mut count = 0;
        while let Some(id) = stack.pop() {
            count += 1;
            for &child in &self.nodes[id].children {
                if !seen[child] {
                    seen[child] = true;
                    stack.push(child);
                }
            }
        }
        count
    }
}
