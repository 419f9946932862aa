//! Closing partitioned subgraphs with remote pipes.
//!
//! ```text
//!   coordinator                    worker subgraph
//!   ┌───────────────────┐          ┌──────────────────────────────────┐
//!   │ file ──▶ send:P1 ─┼── tcp ──▶│ recv:P1 ──▶ cmd ──▶ ... ──▶ send:P2
//!   │ stdout ◀─ recv:P2 ◀┼── tcp ──┼──────────────────────────────────┘
//!   └───────────────────┘
//! ```
//!
//! Every output of a subgraph's sink leaves through a send pipe on a fresh
//! port. The matching receive pipe lands in the subgraph that consumes the
//! edge, or in the coordinator when nothing downstream does. Inputs bound to
//! files or descriptors are opened by the coordinator and forwarded the
//! same way.

use std::collections::BTreeSet;

use dish_types::{Direction, Fid, FileId, FileIdGen, Ir, Node, NodeId, Resource};

use super::{DistributeError, Partition, PortAllocator};

/// Address remote pipes bind to when none is configured.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Subgraphs ready to ship to workers, plus the coordinator that runs next
/// to the original shell.
#[derive(Debug, Clone)]
pub struct DistributedGraph {
    pub subgraphs: Vec<Ir>,
    pub coordinator: Ir,
    pub id_gen: FileIdGen,
}

/// Wire every subgraph of `partition` to its neighbours and the coordinator.
pub fn add_remote_pipes(
    partition: Partition,
    ports: &PortAllocator,
    host: &str,
) -> Result<DistributedGraph, DistributeError> {
    let Partition {
        mut subgraphs,
        id_gen,
        boundary,
    } = partition;

    // Edges some subgraph produces; an unproduced input with one of these
    // ids is wired when its producer's sink is processed.
    let produced: BTreeSet<FileId> = subgraphs
        .iter()
        .flat_map(|sub| {
            sub.all_fids()
                .filter(|fid| sub.get_edge(fid.ident()).and_then(|e| e.from).is_some())
                .map(|fid| fid.ident())
                .collect::<Vec<_>>()
        })
        .collect();

    let mut wiring = Wiring {
        id_gen,
        ports,
        host,
        coordinator: Ir::new(),
    };

    for idx in 0..subgraphs.len() {
        let sinks = subgraphs[idx].sink_nodes();
        if sinks.len() != 1 {
            return Err(DistributeError::SinkCount {
                subgraph: idx,
                found: sinks.len(),
            });
        }

        for out_edge in subgraphs[idx].node_output_fids(sinks[0])? {
            let port = wiring.send_from(&mut subgraphs[idx], out_edge.ident())?;

            let delivered = wiring.id_gen.next_bound_file_id(out_edge.resource().clone());
            let delivered_id = delivered.ident();

            let consumer = boundary
                .get(&out_edge.ident())
                .and_then(|consumers| consumers.iter().copied().find(|c| *c != idx))
                .filter(|_| out_edge.is_ephemeral());

            match consumer {
                Some(c) => {
                    let count = subgraphs.len();
                    let target = subgraphs.get_mut(c).ok_or(DistributeError::UnknownSubgraph {
                        edge: out_edge.ident(),
                        subgraph: c,
                        count,
                    })?;
                    target.replace_edge(out_edge.ident(), delivered)?;
                    wiring.receive_into(target, delivered_id, port)?;
                }
                None => {
                    wiring.coordinator.add_edge(delivered);
                    let mut coordinator = std::mem::take(&mut wiring.coordinator);
                    let received = wiring.receive_into(&mut coordinator, delivered_id, port);
                    wiring.coordinator = coordinator;
                    received?;
                }
            }
        }

        wiring.forward_external_inputs(idx, &mut subgraphs[idx], &produced)?;
    }

    tracing::debug!(
        subgraphs = subgraphs.len(),
        coordinator_nodes = wiring.coordinator.node_count(),
        "inserted remote pipes"
    );

    Ok(DistributedGraph {
        subgraphs,
        coordinator: wiring.coordinator,
        id_gen: wiring.id_gen,
    })
}

struct Wiring<'a> {
    id_gen: FileIdGen,
    ports: &'a PortAllocator,
    host: &'a str,
    coordinator: Ir,
}

impl Wiring<'_> {
    fn network_edge(&mut self, port: u16, direction: Direction) -> Fid {
        self.id_gen.next_bound_file_id(Resource::Network {
            host: self.host.to_string(),
            port,
            direction,
        })
    }

    /// Re-route `edge` of `sub` into a new send pipe on a fresh port.
    fn send_from(&mut self, sub: &mut Ir, edge: FileId) -> Result<u16, DistributeError> {
        let port = self.ports.next_port()?;
        let local = self.id_gen.next_ephemeral_file_id();
        let local_id = local.ident();
        sub.replace_edge(edge, local)?;
        self.append_send(sub, local_id, port)?;
        Ok(port)
    }

    /// Append a send pipe reading `local` (already in `sub`) to `port`.
    fn append_send(&mut self, sub: &mut Ir, local: FileId, port: u16) -> Result<NodeId, DistributeError> {
        let wire = self.network_edge(port, Direction::Write);
        let wire_id = wire.ident();
        sub.add_edge(wire);
        let node = Node::remote_pipe(
            self.id_gen.next_node_id(),
            vec![local],
            vec![wire_id],
            self.host,
            port,
            Direction::Write,
        );
        Ok(sub.insert_node(node)?)
    }

    /// Append a receive pipe on `port` producing `local` (already in `sub`).
    fn receive_into(&mut self, sub: &mut Ir, local: FileId, port: u16) -> Result<NodeId, DistributeError> {
        let wire = self.network_edge(port, Direction::Read);
        let wire_id = wire.ident();
        sub.add_edge(wire);
        let node = Node::remote_pipe(
            self.id_gen.next_node_id(),
            vec![local],
            vec![wire_id],
            self.host,
            port,
            Direction::Read,
        );
        Ok(sub.insert_node(node)?)
    }

    /// Have the coordinator open every file or descriptor `sub` reads and
    /// forward it over its own port.
    fn forward_external_inputs(
        &mut self,
        idx: usize,
        sub: &mut Ir,
        produced: &BTreeSet<FileId>,
    ) -> Result<(), DistributeError> {
        let mut entry_edges: Vec<(NodeId, Fid)> = Vec::new();
        for node in sub.nodes() {
            for input in node.inputs() {
                let Some(entry) = sub.get_edge(*input) else {
                    continue;
                };
                if entry.from.is_none() {
                    entry_edges.push((node.id(), entry.fid.clone()));
                }
            }
        }

        for (node_id, in_edge) in entry_edges {
            let is_receive_pipe = sub
                .get_node(node_id)
                .and_then(Node::remote_endpoint)
                .is_some_and(|(_, _, direction)| direction == Direction::Read);
            if is_receive_pipe {
                continue;
            }

            if in_edge.is_external() {
                let port = self.ports.next_port()?;

                let opened = self.id_gen.next_bound_file_id(in_edge.resource().clone());
                let opened_id = opened.ident();
                self.coordinator.add_edge(opened);
                let mut coordinator = std::mem::take(&mut self.coordinator);
                let sent = self.append_send(&mut coordinator, opened_id, port);
                self.coordinator = coordinator;
                sent?;

                let local = self.id_gen.next_ephemeral_file_id();
                let local_id = local.ident();
                sub.replace_edge(in_edge.ident(), local)?;
                self.receive_into(sub, local_id, port)?;

                tracing::debug!(
                    subgraph = idx,
                    node = %node_id,
                    resource = %in_edge.resource(),
                    port,
                    "forwarding external input"
                );
            } else if produced.contains(&in_edge.ident()) {
                // Boundary edge; wired from its producer's side.
                continue;
            } else {
                return Err(DistributeError::UnclassifiedSource {
                    subgraph: idx,
                    node: node_id,
                    edge: in_edge.ident(),
                });
            }
        }
        Ok(())
    }
}
