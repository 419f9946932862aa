//! Graph nodes: commands and remote pipes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fid::{Direction, FileId};

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a node computes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// An ordinary command: `name args...`.
    Command { name: String, args: Vec<String> },
    /// A transport endpoint replacing a local edge that crosses machines.
    RemotePipe {
        host: String,
        port: u16,
        direction: Direction,
    },
}

/// A unit of computation.
///
/// Edge order is significant: input 0 is stdin, output 0 is stdout, and any
/// further inputs are positional file operands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    inputs: Vec<FileId>,
    outputs: Vec<FileId>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, inputs: Vec<FileId>, outputs: Vec<FileId>) -> Self {
        Self {
            id,
            kind,
            inputs,
            outputs,
        }
    }

    /// A command node.
    pub fn command<I, S>(
        id: NodeId,
        name: impl Into<String>,
        args: I,
        inputs: Vec<FileId>,
        outputs: Vec<FileId>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            id,
            NodeKind::Command {
                name: name.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            inputs,
            outputs,
        )
    }

    /// A remote pipe node.
    ///
    /// A `Write` pipe reads its local edges and sends them to `host:port`;
    /// its remote edges are its outputs. A `Read` pipe is the mirror image.
    pub fn remote_pipe(
        id: NodeId,
        local: Vec<FileId>,
        remote: Vec<FileId>,
        host: impl Into<String>,
        port: u16,
        direction: Direction,
    ) -> Self {
        let kind = NodeKind::RemotePipe {
            host: host.into(),
            port,
            direction,
        };
        match direction {
            Direction::Write => Self::new(id, kind, local, remote),
            Direction::Read => Self::new(id, kind, remote, local),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[FileId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[FileId] {
        &self.outputs
    }

    pub fn is_remote_pipe(&self) -> bool {
        matches!(self.kind, NodeKind::RemotePipe { .. })
    }

    /// The endpoint and direction, if this node is a remote pipe.
    pub fn remote_endpoint(&self) -> Option<(&str, u16, Direction)> {
        match &self.kind {
            NodeKind::RemotePipe {
                host,
                port,
                direction,
            } => Some((host.as_str(), *port, *direction)),
            NodeKind::Command { .. } => None,
        }
    }

    /// Edges on this machine's side of a remote pipe.
    pub fn local_edges(&self) -> &[FileId] {
        match self.remote_endpoint() {
            Some((_, _, Direction::Read)) => &self.outputs,
            _ => &self.inputs,
        }
    }

    /// Edges on the network side of a remote pipe.
    pub fn remote_edges(&self) -> &[FileId] {
        match self.remote_endpoint() {
            Some((_, _, Direction::Read)) => &self.inputs,
            _ => &self.outputs,
        }
    }

    /// Rename an edge in both edge lists.
    pub(crate) fn rename_edge(&mut self, old: FileId, new: FileId) {
        for fid in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            if *fid == old {
                *fid = new;
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Command { name, args } => {
                write!(f, "{} {}", self.id, name)?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
            }
            NodeKind::RemotePipe {
                host,
                port,
                direction,
            } => write!(f, "{} remote-{direction} {host}:{port}", self.id)?,
        }
        Ok(())
    }
}
