//! The dataflow graph of one shell pipeline.
//!
//! ```text
//!   #f0[fd:0] ──▶ n1 cat ──▶ #f2 ──▶ n3 grep x ──▶ #f4[fd:1]
//!   (input: no producer)                           (output: no consumer)
//! ```
//!
//! Nodes and edges live in id-keyed maps. Each edge entry records its
//! producer and consumer inside this graph; an edge with no producer is a
//! graph input and one with no consumer is a graph output. Iteration is in
//! ascending id order, which keeps every traversal built on top of this
//! type reproducible.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fid::{Fid, FileId};
use crate::node::{Node, NodeId};

/// Result type for graph operations.
pub type IrResult<T> = Result<T, IrError>;

/// Structural errors in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("unknown edge {0}")]
    UnknownEdge(FileId),
    #[error("edge {0} already exists")]
    DuplicateEdge(FileId),
    #[error("edge {edge} already produced by {existing}, cannot also be produced by {node}")]
    DuplicateProducer {
        edge: FileId,
        existing: NodeId,
        node: NodeId,
    },
    #[error("edge {edge} already consumed by {existing}, cannot also be consumed by {node}")]
    DuplicateConsumer {
        edge: FileId,
        existing: NodeId,
        node: NodeId,
    },
    #[error("edge {0} is still wired to a node")]
    EdgeInUse(FileId),
    #[error("node {node} references edge {edge} inconsistently")]
    DanglingReference { node: NodeId, edge: FileId },
    #[error("graph contains a cycle through {0} node(s)")]
    Cycle(usize),
}

/// An edge and its wiring within one graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEntry {
    pub fid: Fid,
    /// Producing node, if it lives in this graph.
    pub from: Option<NodeId>,
    /// Consuming node, if it lives in this graph.
    pub to: Option<NodeId>,
}

/// A dataflow graph. Equality is structural: same nodes, same wiring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ir {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<FileId, EdgeEntry>,
}

impl Ir {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get_edge(&self, id: FileId) -> Option<&EdgeEntry> {
        self.edges.get(&id)
    }

    pub fn contains_edge(&self, id: FileId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn get_fid(&self, id: FileId) -> Option<&Fid> {
        self.edges.get(&id).map(|e| &e.fid)
    }

    pub fn all_fids(&self) -> impl Iterator<Item = &Fid> {
        self.edges.values().map(|e| &e.fid)
    }

    /// Edges with no producer in this graph.
    pub fn input_fids(&self) -> impl Iterator<Item = &Fid> {
        self.edges
            .values()
            .filter(|e| e.from.is_none())
            .map(|e| &e.fid)
    }

    /// Edges with no consumer in this graph.
    pub fn output_fids(&self) -> impl Iterator<Item = &Fid> {
        self.edges
            .values()
            .filter(|e| e.to.is_none())
            .map(|e| &e.fid)
    }

    fn require_node(&self, id: NodeId) -> IrResult<&Node> {
        self.nodes.get(&id).ok_or(IrError::UnknownNode(id))
    }

    fn fids_of(&self, ids: &[FileId]) -> IrResult<Vec<Fid>> {
        ids.iter()
            .map(|id| self.get_fid(*id).cloned().ok_or(IrError::UnknownEdge(*id)))
            .collect()
    }

    /// A node's input edges, in positional order.
    pub fn node_input_fids(&self, id: NodeId) -> IrResult<Vec<Fid>> {
        let node = self.require_node(id)?;
        self.fids_of(node.inputs())
    }

    /// A node's output edges, in positional order.
    pub fn node_output_fids(&self, id: NodeId) -> IrResult<Vec<Fid>> {
        let node = self.require_node(id)?;
        self.fids_of(node.outputs())
    }

    /// In-graph consumers of a node's outputs, in output order, deduplicated.
    pub fn next_nodes(&self, id: NodeId) -> IrResult<Vec<NodeId>> {
        let node = self.require_node(id)?;
        let mut next = Vec::new();
        for fid in node.outputs() {
            if let Some(to) = self.edges.get(fid).and_then(|e| e.to) {
                if !next.contains(&to) {
                    next.push(to);
                }
            }
        }
        Ok(next)
    }

    /// In-graph producers of a node's inputs, in input order, deduplicated.
    pub fn previous_nodes(&self, id: NodeId) -> IrResult<Vec<NodeId>> {
        let node = self.require_node(id)?;
        let mut prev = Vec::new();
        for fid in node.inputs() {
            if let Some(from) = self.edges.get(fid).and_then(|e| e.from) {
                if !prev.contains(&from) {
                    prev.push(from);
                }
            }
        }
        Ok(prev)
    }

    /// Nodes none of whose inputs are produced inside this graph.
    pub fn source_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| {
                node.inputs()
                    .iter()
                    .all(|fid| self.edges.get(fid).and_then(|e| e.from).is_none())
            })
            .map(Node::id)
            .collect()
    }

    /// Nodes none of whose outputs are consumed inside this graph.
    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| {
                node.outputs()
                    .iter()
                    .all(|fid| self.edges.get(fid).and_then(|e| e.to).is_none())
            })
            .map(Node::id)
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════

    /// Add an unwired edge. Existing wiring for the same id is kept.
    pub fn add_edge(&mut self, fid: Fid) {
        self.edges.entry(fid.ident()).or_insert(EdgeEntry {
            fid,
            from: None,
            to: None,
        });
    }

    /// Add an edge consumed by `node` whose producer lives elsewhere.
    pub fn add_to_edge(&mut self, fid: Fid, node: NodeId) {
        let entry = self.edges.entry(fid.ident()).or_insert(EdgeEntry {
            fid,
            from: None,
            to: None,
        });
        entry.to = Some(node);
    }

    /// Add an edge produced by `node`.
    pub fn add_from_edge(&mut self, node: NodeId, fid: Fid) {
        let entry = self.edges.entry(fid.ident()).or_insert(EdgeEntry {
            fid,
            from: None,
            to: None,
        });
        entry.from = Some(node);
    }

    pub fn set_edge_to(&mut self, edge: FileId, node: NodeId) -> IrResult<()> {
        let entry = self.edges.get_mut(&edge).ok_or(IrError::UnknownEdge(edge))?;
        entry.to = Some(node);
        Ok(())
    }

    pub fn set_edge_from(&mut self, edge: FileId, node: NodeId) -> IrResult<()> {
        let entry = self.edges.get_mut(&edge).ok_or(IrError::UnknownEdge(edge))?;
        entry.from = Some(node);
        Ok(())
    }

    /// Insert a node without touching edge wiring.
    ///
    /// Used when the caller wires edges itself (the partitioner copies nodes
    /// between graphs this way). Returns any node previously stored under
    /// the same id.
    pub fn add_node(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id(), node)
    }

    /// Insert a node and wire it to its already-present edges.
    ///
    /// Fails without modifying the graph if an edge is missing or already
    /// has a producer/consumer on the side this node wants.
    pub fn insert_node(&mut self, node: Node) -> IrResult<NodeId> {
        let id = node.id();
        for fid in node.inputs() {
            let entry = self.edges.get(fid).ok_or(IrError::UnknownEdge(*fid))?;
            if let Some(existing) = entry.to {
                return Err(IrError::DuplicateConsumer {
                    edge: *fid,
                    existing,
                    node: id,
                });
            }
        }
        for fid in node.outputs() {
            let entry = self.edges.get(fid).ok_or(IrError::UnknownEdge(*fid))?;
            if let Some(existing) = entry.from {
                return Err(IrError::DuplicateProducer {
                    edge: *fid,
                    existing,
                    node: id,
                });
            }
        }

        for fid in node.inputs() {
            self.set_edge_to(*fid, id)?;
        }
        for fid in node.outputs() {
            self.set_edge_from(*fid, id)?;
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Remove a node, moving it out of this graph.
    ///
    /// Its edges stay behind, unwired on the side the node occupied.
    pub fn remove_node(&mut self, id: NodeId) -> IrResult<Node> {
        let node = self.nodes.remove(&id).ok_or(IrError::UnknownNode(id))?;
        for fid in node.inputs() {
            if let Some(entry) = self.edges.get_mut(fid) {
                if entry.to == Some(id) {
                    entry.to = None;
                }
            }
        }
        for fid in node.outputs() {
            if let Some(entry) = self.edges.get_mut(fid) {
                if entry.from == Some(id) {
                    entry.from = None;
                }
            }
        }
        Ok(node)
    }

    /// Remove an edge that no node is wired to.
    pub fn remove_edge(&mut self, id: FileId) -> IrResult<Fid> {
        let entry = self.edges.get(&id).ok_or(IrError::UnknownEdge(id))?;
        if entry.from.is_some() || entry.to.is_some() {
            return Err(IrError::EdgeInUse(id));
        }
        self.edges
            .remove(&id)
            .map(|e| e.fid)
            .ok_or(IrError::UnknownEdge(id))
    }

    /// Replace edge `old` with `new` everywhere it is referenced.
    ///
    /// The edge entry keeps its producer and consumer; every node that
    /// listed `old` lists `new` in the same position. Either the whole
    /// rename happens or nothing changes.
    pub fn replace_edge(&mut self, old: FileId, new: Fid) -> IrResult<()> {
        let new_id = new.ident();
        if new_id != old && self.edges.contains_key(&new_id) {
            return Err(IrError::DuplicateEdge(new_id));
        }
        let entry = self.edges.remove(&old).ok_or(IrError::UnknownEdge(old))?;

        for node_id in [entry.from, entry.to].into_iter().flatten() {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.rename_edge(old, new_id);
            }
        }
        self.edges.insert(
            new_id,
            EdgeEntry {
                fid: new,
                from: entry.from,
                to: entry.to,
            },
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Whole-graph checks
    // ═══════════════════════════════════════════════════════════════════

    /// Nodes in dependency order (Kahn's algorithm, lowest id first).
    pub fn topo_order(&self) -> IrResult<Vec<NodeId>> {
        let mut in_degree: BTreeMap<NodeId, usize> = BTreeMap::new();
        for id in self.nodes.keys() {
            in_degree.insert(*id, self.previous_nodes(*id)?.len());
        }

        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for next in self.next_nodes(id)? {
                if let Some(d) = in_degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(next);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(IrError::Cycle(self.nodes.len() - order.len()));
        }
        Ok(order)
    }

    /// Check that node edge lists and edge wiring agree, and that the graph
    /// is acyclic.
    pub fn validate(&self) -> IrResult<()> {
        for node in self.nodes.values() {
            for fid in node.inputs() {
                let entry = self.edges.get(fid).ok_or(IrError::UnknownEdge(*fid))?;
                if entry.to != Some(node.id()) {
                    return Err(IrError::DanglingReference {
                        node: node.id(),
                        edge: *fid,
                    });
                }
            }
            for fid in node.outputs() {
                let entry = self.edges.get(fid).ok_or(IrError::UnknownEdge(*fid))?;
                if entry.from != Some(node.id()) {
                    return Err(IrError::DanglingReference {
                        node: node.id(),
                        edge: *fid,
                    });
                }
            }
        }

        for (id, entry) in &self.edges {
            if let Some(from) = entry.from {
                let node = self.require_node(from)?;
                if !node.outputs().contains(id) {
                    return Err(IrError::DanglingReference {
                        node: from,
                        edge: *id,
                    });
                }
            }
            if let Some(to) = entry.to {
                let node = self.require_node(to)?;
                if !node.inputs().contains(id) {
                    return Err(IrError::DanglingReference { node: to, edge: *id });
                }
            }
        }

        self.topo_order().map(|_| ())
    }

    /// Pretty-print the graph for debugging.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "=== Ir ({} nodes, {} edges) ===\n",
            self.nodes.len(),
            self.edges.len()
        );
        let show = |ids: &[FileId]| -> String {
            ids.iter()
                .map(|id| match self.get_fid(*id) {
                    Some(fid) => fid.to_string(),
                    None => format!("{id}?"),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        for node in self.nodes.values() {
            let _ = writeln!(
                out,
                "  {node} <- [{}] -> [{}]",
                show(node.inputs()),
                show(node.outputs())
            );
        }
        out
    }
}
