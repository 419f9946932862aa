//! Edge identity and resource bindings.
//!
//! Every data channel in a graph is a `Fid`: a `FileId` handed out by the
//! `FileIdGen` plus the `Resource` the channel is bound to. Fresh ids start
//! `Unbound`; the translator binds graph inputs and outputs to paths or
//! descriptors, and remote pipe insertion binds the far side of a
//! transport to a network endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Unique identifier for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#f{}", self.0)
    }
}

/// Which way bytes move through a remote pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Listen on the port, accept one connection, read until end-of-stream.
    Read,
    /// Dial the port once, write everything, close.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// What a channel is physically backed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    /// In-memory only. Must be materialized as a local pipe or a remote
    /// transport before the graph can run standalone.
    Unbound,
    /// A file on the local filesystem.
    Path { path: String },
    /// An inherited file descriptor (stdin=0, stdout=1, stderr=2).
    Descriptor { fd: i32 },
    /// The far side of a remote pipe.
    Network {
        host: String,
        port: u16,
        direction: Direction,
    },
}

impl Resource {
    /// Convenience constructor for a path binding.
    pub fn path(path: impl Into<String>) -> Self {
        Resource::Path { path: path.into() }
    }

    /// Convenience constructor for a descriptor binding.
    pub fn descriptor(fd: i32) -> Self {
        Resource::Descriptor { fd }
    }

    /// Standard input.
    pub fn stdin() -> Self {
        Resource::Descriptor { fd: 0 }
    }

    /// Standard output.
    pub fn stdout() -> Self {
        Resource::Descriptor { fd: 1 }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Unbound => write!(f, "unbound"),
            Resource::Path { path } => write!(f, "file:{path}"),
            Resource::Descriptor { fd } => write!(f, "fd:{fd}"),
            Resource::Network {
                host,
                port,
                direction,
            } => write!(f, "tcp:{host}:{port}({direction})"),
        }
    }
}

/// A data channel: identity plus resource binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fid {
    ident: FileId,
    resource: Resource,
}

impl Fid {
    /// Create an fid with an explicit binding.
    pub fn new(ident: FileId, resource: Resource) -> Self {
        Self { ident, resource }
    }

    pub fn ident(&self) -> FileId {
        self.ident
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn set_resource(&mut self, resource: Resource) {
        self.resource = resource;
    }

    /// Builder-style binding, for constructing graphs in one expression.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// True if the channel has no physical backing yet.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.resource, Resource::Unbound)
    }

    pub fn has_file_resource(&self) -> bool {
        matches!(self.resource, Resource::Path { .. })
    }

    pub fn has_file_descriptor_resource(&self) -> bool {
        matches!(self.resource, Resource::Descriptor { .. })
    }

    /// True for channels the coordinator must open on the original machine:
    /// files and inherited descriptors.
    pub fn is_external(&self) -> bool {
        self.has_file_resource() || self.has_file_descriptor_resource()
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.ident, self.resource)
    }
}

/// Monotonic identifier generator.
///
/// One generator covers both edge and node identifiers, so every id in a
/// pipeline's graphs is unique. It is threaded by value through partitioning
/// and remote pipe insertion; there is no global instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdGen {
    next: u64,
}

impl FileIdGen {
    /// Start a generator at zero.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Start a generator past every id already used by `ir`.
    pub fn continuing(ir: &crate::ir::Ir) -> Self {
        let max_edge = ir.all_fids().map(|fid| fid.ident().0).max();
        let max_node = ir.node_ids().map(|id| id.0).max();
        let next = match max_edge.max(max_node) {
            Some(max) => max + 1,
            None => 0,
        };
        Self { next }
    }

    fn bump(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// A fresh ephemeral fid, only ever materialized as a pipe.
    pub fn next_ephemeral_file_id(&mut self) -> Fid {
        Fid::new(FileId(self.bump()), Resource::Unbound)
    }

    /// A fresh fid already bound to `resource`.
    pub fn next_bound_file_id(&mut self, resource: Resource) -> Fid {
        Fid::new(FileId(self.bump()), resource)
    }

    pub fn next_node_id(&mut self) -> NodeId {
        NodeId(self.bump())
    }

    /// The id the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for FileIdGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic_across_kinds() {
        let mut gen = FileIdGen::new();
        let a = gen.next_ephemeral_file_id();
        let n = gen.next_node_id();
        let b = gen.next_ephemeral_file_id();
        assert_eq!(a.ident(), FileId(0));
        assert_eq!(n, NodeId(1));
        assert_eq!(b.ident(), FileId(2));
        assert_eq!(gen.peek(), 3);
    }

    #[test]
    fn test_fresh_fids_are_unbound() {
        let mut gen = FileIdGen::new();
        assert!(gen.next_ephemeral_file_id().is_ephemeral());
        assert!(!gen.next_bound_file_id(Resource::stdin()).is_ephemeral());
    }

    #[test]
    fn test_resource_classification() {
        let mut gen = FileIdGen::new();
        let file = gen.next_bound_file_id(Resource::path("in.txt"));
        let fd = gen.next_bound_file_id(Resource::stdout());
        let net = gen.next_bound_file_id(Resource::Network {
            host: "10.0.0.2".into(),
            port: 58000,
            direction: Direction::Read,
        });

        assert!(file.is_external() && file.has_file_resource());
        assert!(fd.is_external() && fd.has_file_descriptor_resource());
        assert!(!net.is_external());
        assert!(!net.is_ephemeral());
    }

    #[test]
    fn test_display() {
        let fid = Fid::new(FileId(7), Resource::path("/tmp/x"));
        assert_eq!(fid.to_string(), "#f7[file:/tmp/x]");
        assert_eq!(Resource::descriptor(1).to_string(), "fd:1");
    }
}
