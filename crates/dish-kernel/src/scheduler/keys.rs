//! Conflict keys: what a pipeline reads and writes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use dish_types::{Fid, FileId, Ir, Resource};

/// A resource two pipelines can collide on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictKey {
    Path(String),
    Descriptor(i32),
    /// Anything without a file or descriptor binding, keyed by edge id.
    EdgeId(FileId),
}

impl ConflictKey {
    pub fn of(fid: &Fid) -> Self {
        match fid.resource() {
            Resource::Path { path } => ConflictKey::Path(path.clone()),
            Resource::Descriptor { fd } => ConflictKey::Descriptor(*fd),
            Resource::Unbound | Resource::Network { .. } => ConflictKey::EdgeId(fid.ident()),
        }
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKey::Path(p) => write!(f, "{p}"),
            ConflictKey::Descriptor(fd) => write!(f, "fd{fd}"),
            ConflictKey::EdgeId(id) => write!(f, "{id}"),
        }
    }
}

/// The read and write sets of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineKeys {
    pub inputs: BTreeSet<ConflictKey>,
    pub outputs: BTreeSet<ConflictKey>,
}

/// Keys for a pipeline's graph inputs and outputs.
pub fn derive_keys(ir: &Ir) -> PipelineKeys {
    PipelineKeys {
        inputs: ir.input_fids().map(ConflictKey::of).collect(),
        outputs: ir.output_fids().map(ConflictKey::of).collect(),
    }
}

/// Keys held by running pipelines, counted so that one pipeline exiting
/// does not release a key another one still holds.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    counts: BTreeMap<ConflictKey, usize>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a ConflictKey>) {
        for key in keys {
            *self.counts.entry(key.clone()).or_insert(0) += 1;
        }
    }

    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a ConflictKey>) {
        for key in keys {
            if let Some(count) = self.counts.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(key);
                }
            }
        }
    }

    pub fn contains(&self, key: &ConflictKey) -> bool {
        self.counts.contains_key(key)
    }

    /// First key of `keys` held here, if any.
    pub fn first_shared<'a>(&self, keys: impl IntoIterator<Item = &'a ConflictKey>) -> Option<&'a ConflictKey> {
        keys.into_iter().find(|key| self.contains(key))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}

/// The key a new pipeline would collide on, given what is running.
///
/// Reading or writing something another pipeline writes conflicts, as does
/// writing something another pipeline reads. Concurrent readers are fine.
pub fn find_conflict<'a>(new: &'a PipelineKeys, running_in: &KeySet, running_out: &KeySet) -> Option<&'a ConflictKey> {
    running_out
        .first_shared(new.inputs.iter().chain(new.outputs.iter()))
        .or_else(|| running_in.first_shared(new.outputs.iter()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dish_types::{FileIdGen, Node};

    fn keys(inputs: &[&str], outputs: &[&str]) -> PipelineKeys {
        PipelineKeys {
            inputs: inputs.iter().map(|p| ConflictKey::Path(p.to_string())).collect(),
            outputs: outputs.iter().map(|p| ConflictKey::Path(p.to_string())).collect(),
        }
    }

    #[test]
    fn test_derive_keys_from_boundary_edges() {
        let mut gen = FileIdGen::new();
        let mut ir = Ir::new();
        let input = gen.next_bound_file_id(Resource::path("x"));
        let mid = gen.next_ephemeral_file_id();
        let out = gen.next_bound_file_id(Resource::stdout());
        let dangling = gen.next_ephemeral_file_id();
        let (i, m, o, d) = (input.ident(), mid.ident(), out.ident(), dangling.ident());
        ir.add_edge(input);
        ir.add_edge(mid);
        ir.add_edge(out);
        ir.add_edge(dangling);
        ir.insert_node(Node::command(gen.next_node_id(), "cat", Vec::<String>::new(), vec![i], vec![m]))
            .unwrap();
        ir.insert_node(Node::command(gen.next_node_id(), "tee", Vec::<String>::new(), vec![m], vec![o, d]))
            .unwrap();

        let keys = derive_keys(&ir);
        assert_eq!(keys.inputs, BTreeSet::from([ConflictKey::Path("x".into())]));
        assert_eq!(
            keys.outputs,
            BTreeSet::from([ConflictKey::Descriptor(1), ConflictKey::EdgeId(d)])
        );
    }

    #[test]
    fn test_counted_release() {
        let a = keys(&[], &["out"]);
        let mut set = KeySet::new();
        set.add_all(&a.outputs);
        set.add_all(&a.outputs);
        set.remove_all(&a.outputs);
        assert!(set.contains(&ConflictKey::Path("out".into())));
        set.remove_all(&a.outputs);
        assert!(set.is_empty());
        // Removing again is harmless.
        set.remove_all(&a.outputs);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_conflict_rules() {
        let mut running_in = KeySet::new();
        let mut running_out = KeySet::new();
        let p1 = keys(&["x"], &["y"]);
        running_in.add_all(&p1.inputs);
        running_out.add_all(&p1.outputs);

        // Shared reader: fine.
        assert_eq!(find_conflict(&keys(&["x"], &["z"]), &running_in, &running_out), None);
        // Reads what P1 writes.
        assert_eq!(
            find_conflict(&keys(&["y"], &["z"]), &running_in, &running_out),
            Some(&ConflictKey::Path("y".into()))
        );
        // Writes what P1 writes.
        assert!(find_conflict(&keys(&[], &["y"]), &running_in, &running_out).is_some());
        // Writes what P1 reads.
        assert_eq!(
            find_conflict(&keys(&[], &["x"]), &running_in, &running_out),
            Some(&ConflictKey::Path("x".into()))
        );
    }
}
