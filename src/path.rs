//! Path identity: the stable hash of a call-graph shape and the derived
//! content-addressed keys.

use crate::graph::{CallGraph, NodeId};
use crate::model::SpanRecord;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over the UTF-8 bytes of `s`, 32-bit.
pub fn fnv1a_32(s: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Computes the 32-bit path id of a call graph.
///
/// `pathid(node, level) = fnv1a(service) + fnv1a(operation) + level*31
/// + Σ pathid(child, level+1)`, all additions wrapping. The children fold is
/// commutative, so span arrival order never changes the id, while the level
/// term keeps a stretched chain distinct from a fanned graph over the same
/// node set. The arithmetic is wire-compatible with existing catalogues and
/// must not change.
pub fn path_id(graph: &CallGraph) -> u32 {
    node_hash(graph, graph.root(), 0)
}

fn node_hash(graph: &CallGraph, id: NodeId, level: u32) -> u32 {
    let span = graph.span(id);
    let mut hash = fnv1a_32(&span.service)
        .wrapping_add(fnv1a_32(&span.operation))
        .wrapping_add(level.wrapping_mul(31));
    for &child in graph.children(id) {
        hash = hash.wrapping_add(node_hash(graph, child, level + 1));
    }
    hash
}

/// Number of edges on the longest root-to-leaf path.
pub fn longest_chain(graph: &CallGraph) -> u32 {
    depth(graph, graph.root())
}

fn depth(graph: &CallGraph, id: NodeId) -> u32 {
    graph
        .children(id)
        .iter()
        .map(|&child| depth(graph, child) + 1)
        .max()
        .unwrap_or(0)
}

/// Like `longest_chain`, but an edge only counts when its child span carries
/// an error.
pub fn longest_error_chain(graph: &CallGraph) -> u32 {
    error_depth(graph, graph.root())
}

fn error_depth(graph: &CallGraph, id: NodeId) -> u32 {
    graph
        .children(id)
        .iter()
        .map(|&child| {
            let edge = u32::from(graph.span(child).has_error());
            error_depth(graph, child) + edge
        })
        .max()
        .unwrap_or(0)
}

/// Content-addressed operation key: `upper(service + "_" + operation)`.
pub fn operation_id(service: &str, operation: &str) -> String {
    format!("{}_{}", service, operation).to_uppercase()
}

/// Content-addressed hop key for a parent→child edge under one path.
pub fn hop_id(parent: &SpanRecord, child: &SpanRecord, path_id: u32) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        parent.service, parent.operation, child.service, child.operation, path_id
    )
    .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testutil::{bundle, error_span, span};
    use crate::graph::CallGraph;

    fn graph(spans: Vec<crate::model::SpanRecord>) -> CallGraph {
        CallGraph::from_bundle(&bundle(spans)).unwrap()
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        // Standard FNV-1a test vectors.
        assert_eq!(fnv1a_32(""), 0x811c9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9cf968);
    }

    #[test]
    fn path_id_ignores_child_order() {
        let g1 = graph(vec![
            span("a", "", "checkout", "POST /checkout"),
            span("b", "a", "order", "POST /orders"),
            span("c", "a", "stock", "GET /stock"),
        ]);
        let g2 = graph(vec![
            span("a", "", "checkout", "POST /checkout"),
            span("c", "a", "stock", "GET /stock"),
            span("b", "a", "order", "POST /orders"),
        ]);
        assert_eq!(path_id(&g1), path_id(&g2));
    }

    #[test]
    fn path_id_is_depth_sensitive() {
        // Same node labels, chain vs fan.
        let chain = graph(vec![
            span("a", "", "s1", "op1"),
            span("b", "a", "s2", "op2"),
            span("c", "b", "s3", "op3"),
        ]);
        let fan = graph(vec![
            span("a", "", "s1", "op1"),
            span("b", "a", "s2", "op2"),
            span("c", "a", "s3", "op3"),
        ]);
        assert_ne!(path_id(&chain), path_id(&fan));
    }

    #[test]
    fn path_id_changes_when_labels_swap() {
        let g1 = graph(vec![
            span("a", "", "checkout", "POST /checkout"),
            span("b", "a", "order", "POST /orders"),
        ]);
        let g2 = graph(vec![
            span("a", "", "order", "POST /orders"),
            span("b", "a", "checkout", "POST /checkout"),
        ]);
        assert_ne!(path_id(&g1), path_id(&g2));
    }

    #[test]
    fn path_id_matches_hand_computed_value() {
        let g = graph(vec![
            span("a", "", "checkout", "POST /checkout"),
            span("b", "a", "order", "POST /orders"),
        ]);
        let expected = fnv1a_32("checkout")
            .wrapping_add(fnv1a_32("POST /checkout"))
            .wrapping_add(
                fnv1a_32("order")
                    .wrapping_add(fnv1a_32("POST /orders"))
                    .wrapping_add(31),
            );
        assert_eq!(path_id(&g), expected);
    }

    #[test]
    fn single_node_path_id_is_well_defined() {
        let g = graph(vec![span("a", "", "svc", "op")]);
        assert_eq!(
            path_id(&g),
            fnv1a_32("svc").wrapping_add(fnv1a_32("op"))
        );
    }

    #[test]
    fn longest_chain_counts_edges() {
        let g = graph(vec![
            span("a", "", "s", "1"),
            span("b", "a", "s", "2"),
            span("c", "b", "s", "3"),
            span("d", "a", "s", "4"),
        ]);
        assert_eq!(longest_chain(&g), 2);
        assert_eq!(longest_chain(&graph(vec![span("a", "", "s", "1")])), 0);
    }

    #[test]
    fn longest_error_chain_counts_only_error_edges() {
        // root -> err -> ok -> err: two error edges on the longest path.
        let g = graph(vec![
            span("a", "", "s", "1"),
            error_span("b", "a", "s", "2"),
            span("c", "b", "s", "3"),
            error_span("d", "c", "s", "4"),
        ]);
        assert_eq!(longest_chain(&g), 3);
        assert_eq!(longest_error_chain(&g), 2);

        let clean = graph(vec![span("a", "", "s", "1"), span("b", "a", "s", "2")]);
        assert_eq!(longest_error_chain(&clean), 0);
    }

    #[test]
    fn key_derivation_uppercases_with_separators() {
        assert_eq!(
            operation_id("checkout", "POST /checkout"),
            "CHECKOUT_POST /CHECKOUT"
        );
        let parent = span("a", "", "checkout", "POST /checkout");
        let child = span("b", "a", "order", "POST /orders");
        assert_eq!(
            hop_id(&parent, &child, 42),
            "CHECKOUT_POST /CHECKOUT_ORDER_POST /ORDERS_42"
        );
    }
}
