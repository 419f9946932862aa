//! Splitting one pipeline's IR across machines.
//!
//! ```text
//!        Ir ──▶ split_ir ──▶ Partition ──▶ add_remote_pipes ──▶ DistributedGraph
//!                            ├ subgraphs     (closing order)     ├ subgraphs (send/recv at both ends)
//!                            ├ id_gen                            ├ coordinator
//!                            └ boundary                          └ id_gen
//! ```
//!
//! Both stages are pure and synchronous. The identifier generator is threaded
//! through by value, and ports come from a `PortAllocator` the caller owns.

mod ports;
mod remote;
mod split;

use thiserror::Error;

use dish_types::{FileId, IrError, NodeId};

pub use ports::{PortAllocator, DEFAULT_BASE_PORT};
pub use remote::{add_remote_pipes, DistributedGraph, DEFAULT_HOST};
pub use split::{split_ir, Partition};

/// Errors while partitioning a graph or wiring its remote pipes.
///
/// All of these abort the current compilation only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributeError {
    #[error("subgraph {subgraph} has {found} sink nodes, expected exactly one")]
    SinkCount { subgraph: usize, found: usize },

    #[error(
        "subgraph {subgraph}: input {edge} of {node} is neither an external resource, \
         a boundary edge, nor a remote pipe"
    )]
    UnclassifiedSource {
        subgraph: usize,
        node: NodeId,
        edge: FileId,
    },

    #[error("boundary map sends {edge} to subgraph {subgraph}, but there are only {count}")]
    UnknownSubgraph { edge: FileId, subgraph: usize, count: usize },

    #[error("remote pipe ports exhausted")]
    PortsExhausted,

    #[error(transparent)]
    Ir(#[from] IrError),
}
