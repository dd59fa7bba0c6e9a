use crate::node::{GlueGraph, GlueNode, GlueRef, GlueType, ScalarValue};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tether_common::SessionId;

/// Visitor pattern for traversing a glue graph
///
/// Default implementations walk everything reachable. Each node is entered
/// at most once per traversal, so cycles are safe. Override specific
/// visit_* methods to act on nodes.
pub trait Visitor: Sized {
    fn visit_ref(&mut self, cx: &mut Traversal<'_>, value: &GlueRef) {
        walk_ref(self, cx, value);
    }

    fn visit_node(&mut self, cx: &mut Traversal<'_>, node: &GlueNode) {
        walk_node(self, cx, node);
    }

    fn visit_scalar(&mut self, _scalar: &ScalarValue) {
        // Leaf, no children to walk
    }

    fn visit_date(&mut self, _date: &DateTime<Utc>) {
        // Leaf, no children to walk
    }
}

/// Traversal state: the graph and the ids already entered
pub struct Traversal<'g> {
    graph: &'g GlueGraph,
    seen: HashSet<SessionId>,
}

impl<'g> Traversal<'g> {
    pub fn new(graph: &'g GlueGraph) -> Self {
        Self {
            graph,
            seen: HashSet::new(),
        }
    }

    pub fn graph(&self) -> &'g GlueGraph {
        self.graph
    }

    pub fn into_seen(self) -> HashSet<SessionId> {
        self.seen
    }
}

pub fn walk_ref<V: Visitor>(visitor: &mut V, cx: &mut Traversal<'_>, value: &GlueRef) {
    match value {
        GlueRef::Value(scalar) => visitor.visit_scalar(scalar),
        GlueRef::Date(date) => visitor.visit_date(date),
        GlueRef::Node(id) => {
            if !cx.seen.insert(*id) {
                return;
            }
            let graph = cx.graph;
            if let Some(node) = graph.get(*id) {
                visitor.visit_node(cx, node);
            }
        }
    }
}

pub fn walk_node<V: Visitor>(visitor: &mut V, cx: &mut Traversal<'_>, node: &GlueNode) {
    for child in node.children() {
        visitor.visit_ref(cx, child);
    }
}

struct Reachable;

impl Visitor for Reachable {}

/// Every session id reachable from `root`, `root` included
pub fn reachable(graph: &GlueGraph, root: &GlueRef) -> HashSet<SessionId> {
    let mut cx = Traversal::new(graph);
    Reachable.visit_ref(&mut cx, root);
    cx.into_seen()
}

/// Node and leaf counts per glue type
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub counts: HashMap<GlueType, usize>,
}

impl GraphStats {
    pub fn collect(graph: &GlueGraph, root: &GlueRef) -> Self {
        let mut stats = GraphStats::default();
        let mut cx = Traversal::new(graph);
        stats.visit_ref(&mut cx, root);
        stats
    }

    pub fn count(&self, glue_type: GlueType) -> usize {
        self.counts.get(&glue_type).copied().unwrap_or(0)
    }
}

impl Visitor for GraphStats {
    fn visit_node(&mut self, cx: &mut Traversal<'_>, node: &GlueNode) {
        *self.counts.entry(node.glue_type()).or_default() += 1;
        walk_node(self, cx, node);
    }

    fn visit_scalar(&mut self, _scalar: &ScalarValue) {
        *self.counts.entry(GlueType::Scalar).or_default() += 1;
    }

    fn visit_date(&mut self, _date: &DateTime<Utc>) {
        *self.counts.entry(GlueType::Date).or_default() += 1;
    }
}
