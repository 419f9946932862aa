//! Partitioning and remote pipe insertion over whole pipelines.

use std::collections::{BTreeMap, BTreeSet};

use rstest::rstest;

use dish_kernel::distribute::{add_remote_pipes, split_ir, DistributedGraph, PortAllocator, DEFAULT_HOST};
use dish_types::{Direction, FileId, FileIdGen, Ir, Node, NodeId, Resource};

// ═══════════════════════════════════════════════════════════════════════════
// Pipelines
// ═══════════════════════════════════════════════════════════════════════════

struct Builder {
    gen: FileIdGen,
    ir: Ir,
}

impl Builder {
    fn new() -> Self {
        Self {
            gen: FileIdGen::new(),
            ir: Ir::new(),
        }
    }

    fn edge(&mut self, resource: Resource) -> FileId {
        let fid = self.gen.next_bound_file_id(resource);
        let id = fid.ident();
        self.ir.add_edge(fid);
        id
    }

    fn pipe(&mut self) -> FileId {
        self.edge(Resource::Unbound)
    }

    fn cmd(&mut self, name: &str, inputs: &[FileId], outputs: &[FileId]) -> NodeId {
        let id = self.gen.next_node_id();
        self.ir
            .insert_node(Node::command(id, name, Vec::<String>::new(), inputs.to_vec(), outputs.to_vec()))
            .unwrap();
        id
    }

    fn finish(self) -> Ir {
        self.ir.validate().unwrap();
        self.ir
    }
}

/// cat in.txt | grep x | sort
fn linear() -> Ir {
    let mut b = Builder::new();
    let input = b.edge(Resource::path("in.txt"));
    let (p1, p2) = (b.pipe(), b.pipe());
    let out = b.edge(Resource::stdout());
    b.cmd("cat", &[input], &[p1]);
    b.cmd("grep", &[p1], &[p2]);
    b.cmd("sort", &[p2], &[out]);
    b.finish()
}

/// comm <(sort a) <(sort b) > out
fn fan_in() -> Ir {
    let mut b = Builder::new();
    let (a, bb) = (b.edge(Resource::path("a")), b.edge(Resource::path("b")));
    let (l, r) = (b.pipe(), b.pipe());
    let out = b.edge(Resource::path("out"));
    b.cmd("sort", &[a], &[l]);
    b.cmd("sort", &[bb], &[r]);
    b.cmd("comm", &[l, r], &[out]);
    b.finish()
}

/// cat in | tee >(wc > o1) | sort > o2
fn fan_out() -> Ir {
    let mut b = Builder::new();
    let input = b.edge(Resource::path("in"));
    let (m, x, y) = (b.pipe(), b.pipe(), b.pipe());
    let (o1, o2) = (b.edge(Resource::path("o1")), b.edge(Resource::path("o2")));
    b.cmd("cat", &[input], &[m]);
    b.cmd("tee", &[m], &[x, y]);
    b.cmd("wc", &[x], &[o1]);
    b.cmd("sort", &[y], &[o2]);
    b.finish()
}

/// cat in | tee, both branches filtered, then merged by comm.
fn diamond() -> Ir {
    let mut b = Builder::new();
    let input = b.edge(Resource::stdin());
    let (m, x, y, gx, sy) = (b.pipe(), b.pipe(), b.pipe(), b.pipe(), b.pipe());
    let out = b.edge(Resource::stdout());
    b.cmd("cat", &[input], &[m]);
    b.cmd("tee", &[m], &[x, y]);
    b.cmd("grep", &[x], &[gx]);
    b.cmd("sed", &[y], &[sy]);
    b.cmd("comm", &[gx, sy], &[out]);
    b.finish()
}

/// seq 10 | sort -n > out
fn generator() -> Ir {
    let mut b = Builder::new();
    let p = b.pipe();
    let out = b.edge(Resource::path("out"));
    b.cmd("seq", &[], &[p]);
    b.cmd("sort", &[p], &[out]);
    b.finish()
}

/// comm <(cat a | grep x | sed y) <(sort b) > out, with either branch
/// declared first.
fn uneven_fan_in(long_first: bool) -> Ir {
    let mut b = Builder::new();
    let (a, bb) = (b.edge(Resource::path("a")), b.edge(Resource::path("b")));
    let (p1, p2, l, r) = (b.pipe(), b.pipe(), b.pipe(), b.pipe());
    let out = b.edge(Resource::path("out"));
    if long_first {
        b.cmd("cat", &[a], &[p1]);
        b.cmd("grep", &[p1], &[p2]);
        b.cmd("sed", &[p2], &[l]);
        b.cmd("sort", &[bb], &[r]);
    } else {
        b.cmd("sort", &[bb], &[r]);
        b.cmd("cat", &[a], &[p1]);
        b.cmd("grep", &[p1], &[p2]);
        b.cmd("sed", &[p2], &[l]);
    }
    b.cmd("comm", &[l, r], &[out]);
    b.finish()
}

fn all_shapes() -> Vec<(&'static str, Ir)> {
    vec![
        ("linear", linear()),
        ("fan_in", fan_in()),
        ("fan_out", fan_out()),
        ("diamond", diamond()),
        ("generator", generator()),
        ("uneven_long_first", uneven_fan_in(true)),
        ("uneven_short_first", uneven_fan_in(false)),
    ]
}

fn distribute(ir: &Ir) -> DistributedGraph {
    let partition = split_ir(ir, FileIdGen::continuing(ir)).unwrap();
    add_remote_pipes(partition, &PortAllocator::default(), DEFAULT_HOST).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// Partitioning
// ═══════════════════════════════════════════════════════════════════════════

#[rstest]
#[case::linear(linear(), 1)]
#[case::fan_in(fan_in(), 3)]
#[case::fan_out(fan_out(), 3)]
#[case::diamond(diamond(), 4)]
#[case::generator(generator(), 1)]
#[case::uneven_long_first(uneven_fan_in(true), 3)]
#[case::uneven_short_first(uneven_fan_in(false), 3)]
fn test_segment_count(#[case] ir: Ir, #[case] expected: usize) {
    let partition = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
    assert_eq!(partition.subgraphs.len(), expected);
}

#[test]
fn test_every_node_in_exactly_one_subgraph() {
    for (name, ir) in all_shapes() {
        let partition = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
        let mut seen: BTreeMap<NodeId, usize> = BTreeMap::new();
        for sub in &partition.subgraphs {
            for id in sub.node_ids() {
                *seen.entry(id).or_default() += 1;
            }
        }
        let expected: BTreeMap<NodeId, usize> = ir.node_ids().map(|id| (id, 1)).collect();
        assert_eq!(seen, expected, "{name}");
    }
}

#[test]
fn test_merging_subgraphs_restores_the_graph() {
    for (name, ir) in all_shapes() {
        let partition = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
        let mut merged = Ir::new();
        for fid in ir.all_fids() {
            merged.add_edge(fid.clone());
        }
        for sub in &partition.subgraphs {
            for node in sub.nodes() {
                merged.insert_node(node.clone()).unwrap();
            }
        }
        assert_eq!(merged, ir, "{name}");
    }
}

#[test]
fn test_boundary_names_the_consuming_subgraph() {
    for (name, ir) in all_shapes() {
        let partition = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
        for (edge, consumers) in &partition.boundary {
            for &idx in consumers {
                let sub = &partition.subgraphs[idx];
                let consumer = sub.get_edge(*edge).and_then(|e| e.to);
                assert!(consumer.is_some(), "{name}: {edge} not consumed in subgraph {idx}");
            }
        }
    }
}

#[test]
fn test_partitioning_is_deterministic() {
    for (name, ir) in all_shapes() {
        let first = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
        let second = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
        assert_eq!(first.subgraphs, second.subgraphs, "{name}");
        assert_eq!(first.boundary, second.boundary, "{name}");

        let a = distribute(&ir);
        let b = distribute(&ir);
        assert_eq!(a.subgraphs, b.subgraphs, "{name}");
        assert_eq!(a.coordinator, b.coordinator, "{name}");
    }
}

#[test]
fn test_fan_in_groups() {
    let ir = fan_in();
    let partition = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
    let names: Vec<Vec<String>> = partition
        .subgraphs
        .iter()
        .map(|sub| sub.nodes().map(|n| n.to_string()).collect())
        .collect();
    // Both sorts close before the merge; comm stands alone.
    assert_eq!(names[1].len(), 1);
    assert!(names[1][0].ends_with("comm"));
}

#[rstest]
#[case::long_first(true)]
#[case::short_first(false)]
fn test_uneven_branches_close_before_the_merge(#[case] long_first: bool) {
    let ir = uneven_fan_in(long_first);
    let partition = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
    let sizes: Vec<usize> = partition.subgraphs.iter().map(Ir::node_count).collect();
    assert_eq!(sizes, [1, 3, 1]);

    // The short branch closes while the long one is still walking; comm waits
    // for both and lands in its own subgraph.
    let merge = &partition.subgraphs[2];
    assert!(merge.nodes().all(|n| n.to_string().ends_with("comm")), "{}", merge.dump());
    for name in ["sed", "sort"] {
        let producer = ir.nodes().find(|n| n.to_string().ends_with(name)).unwrap();
        let edge = producer.outputs()[0];
        assert_eq!(partition.boundary.get(&edge), Some(&vec![2]), "{name}");
    }

    let again = split_ir(&ir, FileIdGen::continuing(&ir)).unwrap();
    assert_eq!(again.subgraphs, partition.subgraphs);
    assert_eq!(again.boundary, partition.boundary);
}

// ═══════════════════════════════════════════════════════════════════════════
// Remote pipes
// ═══════════════════════════════════════════════════════════════════════════

fn pipes(graphs: &[&Ir], direction: Direction) -> Vec<(String, u16)> {
    let mut out = Vec::new();
    for g in graphs {
        for node in g.nodes() {
            if let Some((host, port, d)) = node.remote_endpoint() {
                if d == direction {
                    out.push((host.to_string(), port));
                }
            }
        }
    }
    out
}

/// Output edges of the single sink of each subgraph, before pipes go in.
fn sink_widths(ir: &Ir) -> Vec<usize> {
    let partition = split_ir(ir, FileIdGen::continuing(ir)).unwrap();
    partition
        .subgraphs
        .iter()
        .map(|sub| {
            let sinks = sub.sink_nodes();
            assert_eq!(sinks.len(), 1, "{}", sub.dump());
            sub.get_node(sinks[0]).unwrap().outputs().len()
        })
        .collect()
}

#[test]
fn test_every_sink_is_a_send_pipe() {
    for (name, ir) in all_shapes() {
        let widths = sink_widths(&ir);
        let dist = distribute(&ir);
        assert_eq!(dist.subgraphs.len(), widths.len(), "{name}");
        for (idx, sub) in dist.subgraphs.iter().enumerate() {
            sub.validate().unwrap();
            let sinks = sub.sink_nodes();
            // One send pipe per output edge of the old sink, so one sink
            // whenever that sink had a single output.
            assert_eq!(sinks.len(), widths[idx], "{name}: subgraph {idx}");
            if widths[idx] == 1 {
                assert_eq!(sinks.len(), 1, "{name}: subgraph {idx}");
            }
            for sink in sinks {
                let endpoint = sub.get_node(sink).and_then(Node::remote_endpoint);
                assert!(
                    matches!(endpoint, Some((_, _, Direction::Write))),
                    "{name}: subgraph {idx} sink {sink} is not a send pipe"
                );
            }
        }
        dist.coordinator.validate().unwrap();
    }
}

#[test]
fn test_send_and_receive_pipes_pair_up() {
    for (name, ir) in all_shapes() {
        let dist = distribute(&ir);
        let mut graphs: Vec<&Ir> = dist.subgraphs.iter().collect();
        graphs.push(&dist.coordinator);

        let sends = pipes(&graphs, Direction::Write);
        let recvs = pipes(&graphs, Direction::Read);
        let send_set: BTreeSet<_> = sends.iter().cloned().collect();
        let recv_set: BTreeSet<_> = recvs.iter().cloned().collect();
        assert_eq!(send_set.len(), sends.len(), "{name}: port reused by two senders");
        assert_eq!(recv_set.len(), recvs.len(), "{name}: port reused by two receivers");
        assert_eq!(send_set, recv_set, "{name}");
    }
}

#[test]
fn test_multi_output_sink_gets_one_send_pipe_per_output() {
    let ir = fan_out();
    let dist = distribute(&ir);
    let counts: Vec<usize> = dist.subgraphs.iter().map(|sub| sub.sink_nodes().len()).collect();
    // cat | tee ends in tee with two outputs; wc and sort have one each.
    assert_eq!(counts, [2, 1, 1]);
    for sink in dist.subgraphs[0].sink_nodes() {
        let endpoint = dist.subgraphs[0].get_node(sink).and_then(Node::remote_endpoint);
        assert!(matches!(endpoint, Some((_, _, Direction::Write))));
    }
}

#[test]
fn test_single_output_sink_leaves_one_sink() {
    let ir = linear();
    let dist = distribute(&ir);
    assert_eq!(dist.subgraphs.len(), 1);
    assert_eq!(dist.subgraphs[0].sink_nodes().len(), 1);
}

#[test]
fn test_commands_stay_off_the_coordinator() {
    for (name, ir) in all_shapes() {
        let dist = distribute(&ir);
        assert!(
            dist.coordinator.nodes().all(Node::is_remote_pipe),
            "{name}: coordinator runs a command"
        );
        let external: Vec<&Resource> = dist
            .coordinator
            .all_fids()
            .filter(|fid| fid.is_external())
            .map(|fid| fid.resource())
            .collect();
        let original: Vec<&Resource> = ir
            .input_fids()
            .chain(ir.output_fids())
            .map(|fid| fid.resource())
            .collect();
        for resource in original {
            assert!(external.contains(&resource), "{name}: {resource} not opened by coordinator");
        }
    }
}

// Tracing data through the pipes back to where it came from.

#[derive(Debug, PartialEq, Eq)]
enum Origin {
    Node(NodeId),
    External(Resource),
}

struct Network<'a> {
    graphs: Vec<&'a Ir>,
    /// port → (graph index, node id)
    senders: BTreeMap<u16, (usize, NodeId)>,
    receivers: BTreeMap<u16, (usize, NodeId)>,
}

impl<'a> Network<'a> {
    fn new(dist: &'a DistributedGraph) -> Self {
        let mut graphs: Vec<&Ir> = dist.subgraphs.iter().collect();
        graphs.push(&dist.coordinator);
        let mut senders = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for (g, ir) in graphs.iter().enumerate() {
            for node in ir.nodes() {
                match node.remote_endpoint() {
                    Some((_, port, Direction::Write)) => {
                        senders.insert(port, (g, node.id()));
                    }
                    Some((_, port, Direction::Read)) => {
                        receivers.insert(port, (g, node.id()));
                    }
                    None => {}
                }
            }
        }
        Self {
            graphs,
            senders,
            receivers,
        }
    }

    fn find(&self, id: NodeId) -> (usize, &'a Node) {
        self.graphs
            .iter()
            .enumerate()
            .find_map(|(g, ir)| ir.get_node(id).map(|n| (g, n)))
            .expect("node present")
    }

    fn producer(&self, g: usize, edge: FileId) -> Origin {
        let entry = self.graphs[g].get_edge(edge).expect("edge present");
        let Some(from) = entry.from else {
            return Origin::External(entry.fid.resource().clone());
        };
        let node = self.graphs[g].get_node(from).expect("producer present");
        match node.remote_endpoint() {
            Some((_, port, Direction::Read)) => {
                let (sg, sid) = self.senders[&port];
                let send = self.graphs[sg].get_node(sid).expect("sender present");
                self.producer(sg, send.local_edges()[0])
            }
            _ => Origin::Node(from),
        }
    }

    fn consumer(&self, g: usize, edge: FileId) -> Origin {
        let entry = self.graphs[g].get_edge(edge).expect("edge present");
        let Some(to) = entry.to else {
            return Origin::External(entry.fid.resource().clone());
        };
        let node = self.graphs[g].get_node(to).expect("consumer present");
        match node.remote_endpoint() {
            Some((_, port, Direction::Write)) => {
                let (rg, rid) = self.receivers[&port];
                let recv = self.graphs[rg].get_node(rid).expect("receiver present");
                self.consumer(rg, recv.local_edges()[0])
            }
            _ => Origin::Node(to),
        }
    }
}

fn original_producer(ir: &Ir, edge: FileId) -> Origin {
    let entry = ir.get_edge(edge).unwrap();
    match entry.from {
        Some(n) => Origin::Node(n),
        None => Origin::External(entry.fid.resource().clone()),
    }
}

fn original_consumer(ir: &Ir, edge: FileId) -> Origin {
    let entry = ir.get_edge(edge).unwrap();
    match entry.to {
        Some(n) => Origin::Node(n),
        None => Origin::External(entry.fid.resource().clone()),
    }
}

#[test]
fn test_collapsing_pipe_pairs_restores_adjacency() {
    for (name, ir) in all_shapes() {
        let dist = distribute(&ir);
        let net = Network::new(&dist);

        for node in ir.nodes() {
            let (g, moved) = net.find(node.id());
            assert_eq!(moved.kind(), node.kind(), "{name}");
            for (pos, (orig, now)) in node.inputs().iter().zip(moved.inputs()).enumerate() {
                assert_eq!(
                    net.producer(g, *now),
                    original_producer(&ir, *orig),
                    "{name}: {} input {pos}",
                    node.id()
                );
            }
            for (pos, (orig, now)) in node.outputs().iter().zip(moved.outputs()).enumerate() {
                assert_eq!(
                    net.consumer(g, *now),
                    original_consumer(&ir, *orig),
                    "{name}: {} output {pos}",
                    node.id()
                );
            }
        }
    }
}
