//! Partitioning an IR into maximal linear segments.
//!
//! The traversal is breadth-first from the graph's source nodes. Each queue
//! entry carries the subgraph that is being grown along that path. A segment
//! closes at a merge point (a node with several inputs), at a branch point
//! (a node whose output does not continue as a single chain), and when the
//! path runs into a node whose other producers have not been visited yet.
//!
//! Subgraphs live in an arena of slots for the duration of the traversal;
//! the boundary map refers to slots and is renumbered to output positions
//! at the end.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dish_types::{FileId, FileIdGen, Ir, NodeId};

use super::DistributeError;

/// The result of partitioning one graph.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Disjoint subgraphs, in the order they were closed.
    pub subgraphs: Vec<Ir>,
    /// The generator, continued past everything the input graph used.
    pub id_gen: FileIdGen,
    /// Edge → indices of the subgraphs that consume it.
    pub boundary: BTreeMap<FileId, Vec<usize>>,
}

/// Split `graph` into disjoint, independently runnable subgraphs.
///
/// Nodes keep their ids; each subgraph holds its own copy of the nodes and
/// edges it contains. When a node is both a merge point and a branch point,
/// the merge check runs first: the incoming segment closes, the node starts
/// a fresh one, and the fresh one closes right after it.
pub fn split_ir(graph: &Ir, id_gen: FileIdGen) -> Result<Partition, DistributeError> {
    let mut splitter = Splitter::new(graph);
    splitter.run()?;
    let partition = splitter.finish(id_gen);
    tracing::debug!(
        nodes = graph.node_count(),
        subgraphs = partition.subgraphs.len(),
        "partitioned graph"
    );
    Ok(partition)
}

struct Splitter<'a> {
    graph: &'a Ir,
    slots: Vec<Ir>,
    /// Slots in closing order.
    closed: Vec<usize>,
    boundary: BTreeMap<FileId, Vec<usize>>,
    visited_edges: BTreeSet<FileId>,
    visited_nodes: BTreeSet<NodeId>,
    queue: VecDeque<(NodeId, usize)>,
}

impl<'a> Splitter<'a> {
    fn new(graph: &'a Ir) -> Self {
        Self {
            graph,
            slots: Vec::new(),
            closed: Vec::new(),
            boundary: BTreeMap::new(),
            visited_edges: graph.input_fids().map(|fid| fid.ident()).collect(),
            visited_nodes: BTreeSet::new(),
            queue: VecDeque::new(),
        }
    }

    fn open(&mut self) -> usize {
        self.slots.push(Ir::new());
        self.slots.len() - 1
    }

    /// Emit a slot's subgraph, unless it is empty or an equal one is
    /// already out.
    fn close(&mut self, slot: usize) {
        let sub = &self.slots[slot];
        if sub.is_empty() {
            return;
        }
        if self.closed.iter().any(|&c| self.slots[c] == *sub) {
            return;
        }
        self.closed.push(slot);
    }

    fn run(&mut self) -> Result<(), DistributeError> {
        for source in self.graph.source_nodes() {
            let slot = self.open();
            self.queue.push_back((source, slot));
        }

        while let Some((node_id, mut slot)) = self.queue.pop_front() {
            let inputs = self.graph.node_input_fids(node_id)?;
            let outputs = self.graph.node_output_fids(node_id)?;

            // Reached before all producers ran; the last producer brings it
            // back around.
            if inputs.iter().any(|fid| !self.visited_edges.contains(&fid.ident())) {
                self.close(slot);
                continue;
            }

            // Merge point: the incoming segment ends here.
            if inputs.len() > 1 && !self.slots[slot].is_empty() {
                self.close(slot);
                slot = self.open();
            }

            if !self.visited_nodes.insert(node_id) {
                continue;
            }

            let node = self
                .graph
                .get_node(node_id)
                .cloned()
                .ok_or(dish_types::IrError::UnknownNode(node_id))?;

            let sub = &mut self.slots[slot];
            for fid in &inputs {
                let ident = fid.ident();
                if sub.contains_edge(ident) {
                    sub.set_edge_to(ident, node_id)?;
                } else {
                    sub.add_to_edge(fid.clone(), node_id);
                }
                self.boundary.entry(ident).or_default().push(slot);
            }
            for fid in &outputs {
                sub.add_from_edge(node_id, fid.clone());
                self.visited_edges.insert(fid.ident());
            }
            sub.add_node(node);

            let next = self.graph.next_nodes(node_id)?;
            let continues = inputs.len() <= 1
                && outputs.len() == 1
                && next.len() == 1
                && !self.boundary.contains_key(&outputs[0].ident());

            if continues {
                self.queue.push_back((next[0], slot));
            } else {
                // Branch point (or end of the line).
                self.close(slot);
                for next_id in next {
                    let fresh = self.open();
                    self.queue.push_back((next_id, fresh));
                }
            }
        }

        // Nothing should be left half-built, but never drop nodes.
        for slot in 0..self.slots.len() {
            if !self.closed.contains(&slot) {
                self.close(slot);
            }
        }
        Ok(())
    }

    fn finish(self, id_gen: FileIdGen) -> Partition {
        let position: BTreeMap<usize, usize> = self
            .closed
            .iter()
            .enumerate()
            .map(|(pos, slot)| (*slot, pos))
            .collect();

        let boundary = self
            .boundary
            .into_iter()
            .map(|(edge, slots)| {
                let positions = slots
                    .iter()
                    .filter_map(|slot| position.get(slot).copied())
                    .collect();
                (edge, positions)
            })
            .collect();

        let mut slots: Vec<Option<Ir>> = self.slots.into_iter().map(Some).collect();
        let subgraphs = self
            .closed
            .iter()
            .filter_map(|slot| slots[*slot].take())
            .collect();

        Partition {
            subgraphs,
            id_gen,
            boundary,
        }
    }
}
