//! Partitioning of the graph into independently allocated subgraphs.
//!
//! Every node belongs to exactly one subgraph at all times. A subgraph's
//! nodes are kept in the order of the global schedule, so any contiguous
//! slice of them is itself a valid execution order. Splitting a subgraph cuts
//! this list in two.
//!
//! Each subgraph also carries a sizing state: the *tile shape* of every
//! value it needs in local memory. Shrinking reduces tile shapes, which
//! models processing the subgraph in several smaller pieces, and resetting
//! restores the shapes from the graph.

use alloc::vec::Vec;

use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use super::interval_allocator::ValueSizeMap;
use crate::ShrinkStrategy;
use crate::graph::{Graph, Node, Value};
use crate::output::{AllocEntry, Subgraph, SubgraphStatus};

/// Current sizing of a single value within a subgraph.
struct ValueTile {
    value: Value,
    shape: SmallVec<[u64; 4]>,
}

struct SubgraphData {
    /// Nodes in execution order.
    nodes: Vec<Node>,

    /// Tile shape of every non-resident value touched by `nodes`, sorted by
    /// value.
    tiles: Vec<ValueTile>,

    /// Peak memory usage of the previous allocation attempt, or 0 if there
    /// was none since the last split or reset.
    prev_peak: u64,

    /// Number of times `shrink` was called since the last split.
    shrinks: u32,

    /// Set once the subgraph has been allocated or abandoned.
    status: Option<SubgraphStatus>,

    /// Final allocations, only for successfully allocated subgraphs.
    entries: Vec<AllocEntry>,
}

pub struct SubgraphManager {
    subgraphs: PrimaryMap<Subgraph, SubgraphData>,

    /// Subgraph containing each node.
    node_subgraph: SecondaryMap<Node, PackedOption<Subgraph>>,

    // Everything below this point is temporary storage used when splitting.
    //
    /// Position of each node in the subgraph being split.
    positions: SecondaryMap<Node, u32>,

    /// `crossing[c]` accumulates the bytes of values that are live across a
    /// cut before position `c`, as a difference array.
    crossing: Vec<i64>,
}

impl SubgraphManager {
    pub fn new() -> Self {
        Self {
            subgraphs: PrimaryMap::new(),
            node_subgraph: SecondaryMap::new(),
            positions: SecondaryMap::new(),
            crossing: Vec::new(),
        }
    }

    /// Resets the partition to a single subgraph containing all of `order`.
    pub fn init(&mut self, graph: &impl Graph, order: &[Node]) {
        self.subgraphs.clear();
        self.node_subgraph.clear();
        if !order.is_empty() {
            self.new_subgraph(graph, order.to_vec());
        }
    }

    fn new_subgraph(&mut self, graph: &impl Graph, nodes: Vec<Node>) -> Subgraph {
        let subgraph = self.subgraphs.next_key();
        for &node in &nodes {
            self.node_subgraph[node] = subgraph.into();
        }
        let tiles = collect_tiles(graph, &nodes);
        self.subgraphs.push(SubgraphData {
            nodes,
            tiles,
            prev_peak: 0,
            shrinks: 0,
            status: None,
            entries: Vec::new(),
        })
    }

    pub fn num_subgraphs(&self) -> usize {
        self.subgraphs.len()
    }

    pub fn subgraphs(&self) -> impl DoubleEndedIterator<Item = Subgraph> + use<> {
        self.subgraphs.keys()
    }

    pub fn nodes(&self, subgraph: Subgraph) -> &[Node] {
        &self.subgraphs[subgraph].nodes
    }

    pub fn node_subgraph(&self, node: Node) -> Option<Subgraph> {
        self.node_subgraph.get(node).and_then(|sg| sg.expand())
    }

    pub fn contains(&self, subgraph: Subgraph, node: Node) -> bool {
        self.node_subgraph(node) == Some(subgraph)
    }

    pub fn status(&self, subgraph: Subgraph) -> Option<SubgraphStatus> {
        self.subgraphs[subgraph].status
    }

    pub fn shrinks(&self, subgraph: Subgraph) -> u32 {
        self.subgraphs[subgraph].shrinks
    }

    pub fn entries(&self, subgraph: Subgraph) -> &[AllocEntry] {
        &self.subgraphs[subgraph].entries
    }

    pub fn prev_peak(&self, subgraph: Subgraph) -> u64 {
        self.subgraphs[subgraph].prev_peak
    }

    pub fn set_prev_peak(&mut self, subgraph: Subgraph, peak: u64) {
        self.subgraphs[subgraph].prev_peak = peak;
    }

    pub fn tile_shape(&self, subgraph: Subgraph, value: Value) -> Option<&[u64]> {
        let tiles = &self.subgraphs[subgraph].tiles;
        let idx = tiles.binary_search_by_key(&value, |tile| tile.value).ok()?;
        Some(&tiles[idx].shape)
    }

    /// Records a successful allocation of the subgraph.
    pub fn finish(&mut self, subgraph: Subgraph, entries: &[AllocEntry], peak: u64) {
        let data = &mut self.subgraphs[subgraph];
        data.entries.clear();
        data.entries.extend_from_slice(entries);
        data.status = Some(SubgraphStatus::Allocated { peak });
    }

    /// Records that the subgraph could not be allocated.
    pub fn fail(&mut self, subgraph: Subgraph, status: SubgraphStatus) {
        debug_assert!(matches!(status, SubgraphStatus::Failed(_)));
        let data = &mut self.subgraphs[subgraph];
        data.entries.clear();
        data.status = Some(status);
    }

    /// Computes the number of bytes each value of the subgraph needs with its
    /// current sizing. Sizes are rounded up to a multiple of `alignment`,
    /// which must not be zero.
    pub fn memory_usage(
        &self,
        subgraph: Subgraph,
        graph: &impl Graph,
        alignment: u64,
        sizes: &mut ValueSizeMap,
    ) {
        sizes.clear();
        for tile in &self.subgraphs[subgraph].tiles {
            let elems: u64 = tile.shape.iter().product();
            let bytes = elems * graph.value_type(tile.value).bytes();
            sizes.insert(tile.value, bytes.next_multiple_of(alignment));
        }
    }

    /// Reduces the tile shapes of the subgraph according to `strategy`.
    ///
    /// Returns whether any shape changed. Once every dimension has been
    /// reduced to 1, further calls have no effect.
    pub fn shrink(&mut self, subgraph: Subgraph, strategy: ShrinkStrategy) -> bool {
        let data = &mut self.subgraphs[subgraph];
        data.shrinks += 1;
        let mut changed = false;
        for tile in &mut data.tiles {
            changed |= strategy.shrink_shape(&mut tile.shape);
        }
        trace!("Shrinking {subgraph} (changed: {changed})");
        changed
    }

    /// Restores the tile shapes of the subgraph to the full value shapes.
    pub fn reset_to_original_size(&mut self, subgraph: Subgraph, graph: &impl Graph) {
        let data = &mut self.subgraphs[subgraph];
        for tile in &mut data.tiles {
            tile.shape.clear();
            tile.shape.extend_from_slice(graph.value_shape(tile.value));
        }
        data.prev_peak = 0;
    }

    /// Splits a subgraph in two, returning the newly created subgraph which
    /// holds the tail of the original's execution order.
    ///
    /// The cut is chosen among the middle half of the nodes to minimize the
    /// bytes of values produced before the cut and consumed after it, since
    /// those have to be stored and reloaded. Ties are broken in favor of the
    /// cut closest to the middle.
    ///
    /// Returns `None` if the subgraph only has a single node.
    pub fn split(&mut self, subgraph: Subgraph, graph: &impl Graph) -> Option<Subgraph> {
        let n = self.subgraphs[subgraph].nodes.len();
        if n < 2 {
            return None;
        }

        let nodes = &self.subgraphs[subgraph].nodes;
        for (pos, &node) in nodes.iter().enumerate() {
            self.positions[node] = pos as u32;
        }
        self.crossing.clear();
        self.crossing.resize(n + 1, 0);
        for (def_pos, &node) in nodes.iter().enumerate() {
            for &value in graph.node_outputs(node) {
                if graph.value_is_resident(value) {
                    continue;
                }
                let last_use = graph
                    .value_users(value)
                    .iter()
                    .filter(|&&user| self.node_subgraph[user].expand() == Some(subgraph))
                    .map(|&user| self.positions[user] as usize)
                    .max();
                let Some(last_use) = last_use else {
                    continue;
                };
                debug_assert!(last_use > def_pos);
                let bytes = graph.value_size(value) as i64;
                self.crossing[def_pos + 1] += bytes;
                self.crossing[last_use + 1] -= bytes;
            }
        }

        let lo = (n / 4).max(1);
        let hi = (3 * n / 4).max(lo).min(n - 1);
        let mut running = 0;
        let mut best: Option<((i64, usize), usize)> = None;
        for cut in 1..=hi {
            running += self.crossing[cut];
            if cut < lo {
                continue;
            }
            let key = (running, (2 * cut).abs_diff(n));
            if best.is_none_or(|(best_key, _)| key < best_key) {
                best = Some((key, cut));
            }
        }
        let ((crossing, _), cut) = best?;

        let tail = self.subgraphs[subgraph].nodes.split_off(cut);
        let tiles = collect_tiles(graph, &self.subgraphs[subgraph].nodes);
        let data = &mut self.subgraphs[subgraph];
        data.tiles = tiles;
        data.prev_peak = 0;
        data.shrinks = 0;
        let new = self.new_subgraph(graph, tail);
        trace!(
            "Split {subgraph} at {cut}/{n} into {subgraph} and {new}, {crossing} bytes crossing"
        );
        Some(new)
    }
}

/// Collects the full-size tiles of every non-resident value read or written
/// by `nodes`.
fn collect_tiles(graph: &impl Graph, nodes: &[Node]) -> Vec<ValueTile> {
    let mut values: Vec<Value> = nodes
        .iter()
        .flat_map(|&node| {
            graph
                .node_inputs(node)
                .iter()
                .chain(graph.node_outputs(node))
        })
        .copied()
        .filter(|&value| !graph.value_is_resident(value))
        .collect();
    values.sort_unstable();
    values.dedup();
    values
        .into_iter()
        .map(|value| ValueTile {
            value,
            shape: SmallVec::from_slice(graph.value_shape(value)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::vec;

    use super::*;
    use crate::debug_utils::GenericGraph;
    use crate::graph::ElemType;

    /// Linear chain of `n` nodes, each producing a `[rows, 16]` f32 tensor.
    fn chain(n: usize, rows: u64) -> (GenericGraph, Vec<Node>) {
        let mut graph = GenericGraph::new();
        let mut prev = graph.add_value("in", ElemType::F32, &[rows, 16]);
        let mut nodes = vec![];
        for i in 0..n {
            let out = graph.add_value(format!("t{i}"), ElemType::F32, &[rows, 16]);
            nodes.push(graph.add_node("relu", &[prev], &[out]));
            prev = out;
        }
        graph.set_output(prev);
        (graph, nodes)
    }

    fn check_partition(manager: &SubgraphManager, graph: &GenericGraph) {
        let mut seen = SecondaryMap::<Node, u32>::new();
        for subgraph in manager.subgraphs() {
            for &node in manager.nodes(subgraph) {
                seen[node] += 1;
                assert_eq!(manager.node_subgraph(node), Some(subgraph));
            }
        }
        for node in graph.nodes() {
            assert_eq!(seen[node], 1, "{node} must be in exactly one subgraph");
        }
    }

    #[test]
    fn memory_usage_excludes_resident_values() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::F32, &[2, 8]);
        let w = graph.add_value("w", ElemType::I8, &[8, 8]);
        let y = graph.add_value("y", ElemType::F16, &[2, 8]);
        graph.set_resident(w);
        let n0 = graph.add_node("matmul", &[x, w], &[y]);

        let mut manager = SubgraphManager::new();
        manager.init(&graph, &[n0]);
        let sg = manager.subgraphs().next().unwrap();
        let mut sizes = ValueSizeMap::default();
        manager.memory_usage(sg, &graph, 1, &mut sizes);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[&x], 64);
        assert_eq!(sizes[&y], 32);

        manager.memory_usage(sg, &graph, 48, &mut sizes);
        assert_eq!(sizes[&x], 96);
        assert_eq!(sizes[&y], 48);
    }

    #[test]
    fn shrink_converges_and_reset_restores() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::U8, &[3, 5]);
        let y = graph.add_value("y", ElemType::U8, &[3, 5]);
        let n0 = graph.add_node("neg", &[x], &[y]);

        let mut manager = SubgraphManager::new();
        manager.init(&graph, &[n0]);
        let sg = manager.subgraphs().next().unwrap();

        let mut sizes = ValueSizeMap::default();
        let mut last = u64::MAX;
        let mut steps = 0;
        while manager.shrink(sg, ShrinkStrategy::HalveOuterDim) {
            manager.memory_usage(sg, &graph, 1, &mut sizes);
            assert!(sizes[&x] <= last);
            last = sizes[&x];
            steps += 1;
            assert!(steps < 16);
        }
        assert_eq!(manager.tile_shape(sg, x), Some(&[1, 1][..]));
        assert!(!manager.shrink(sg, ShrinkStrategy::HalveOuterDim));

        manager.set_prev_peak(sg, 10);
        manager.reset_to_original_size(sg, &graph);
        assert_eq!(manager.tile_shape(sg, x), Some(&[3, 5][..]));
        assert_eq!(manager.prev_peak(sg), 0);
    }

    #[test]
    fn split_single_node_fails() {
        let (graph, nodes) = chain(1, 4);
        let mut manager = SubgraphManager::new();
        manager.init(&graph, &nodes);
        let sg = manager.subgraphs().next().unwrap();
        assert_eq!(manager.split(sg, &graph), None);
    }

    #[test]
    fn split_is_disjoint_and_complete() {
        let (graph, nodes) = chain(7, 4);
        let mut manager = SubgraphManager::new();
        manager.init(&graph, &nodes);
        let mut worklist = vec![manager.subgraphs().next().unwrap()];
        while let Some(sg) = worklist.pop() {
            let before = manager.nodes(sg).to_vec();
            if let Some(new) = manager.split(sg, &graph) {
                let mut after = manager.nodes(sg).to_vec();
                after.extend_from_slice(manager.nodes(new));
                assert_eq!(before, after);
                assert!(!manager.nodes(sg).is_empty());
                assert!(!manager.nodes(new).is_empty());
                check_partition(&manager, &graph);
                worklist.push(sg);
                worklist.push(new);
            }
        }
        assert_eq!(manager.num_subgraphs(), 7);
        check_partition(&manager, &graph);
    }

    #[test]
    fn split_prefers_cheap_cut() {
        // node1 produces a big tensor consumed by node2, and `b` is larger
        // than `c`. Cutting between node2 and node3 carries the least data.
        let mut graph = GenericGraph::new();
        let a = graph.add_value("a", ElemType::F32, &[4]);
        let b = graph.add_value("b", ElemType::F32, &[8]);
        let big = graph.add_value("big", ElemType::F32, &[1024]);
        let c = graph.add_value("c", ElemType::F32, &[4]);
        let d = graph.add_value("d", ElemType::F32, &[4]);
        let n0 = graph.add_node("relu", &[a], &[b]);
        let n1 = graph.add_node("expand", &[b], &[big]);
        let n2 = graph.add_node("reduce", &[big], &[c]);
        let n3 = graph.add_node("relu", &[c], &[d]);

        let mut manager = SubgraphManager::new();
        manager.init(&graph, &[n0, n1, n2, n3]);
        let sg = manager.subgraphs().next().unwrap();
        let new = manager.split(sg, &graph).unwrap();
        assert_eq!(manager.nodes(sg), &[n0, n1, n2]);
        assert_eq!(manager.nodes(new), &[n3]);
        assert_eq!(manager.tile_shape(sg, d), None);
        assert_eq!(manager.tile_shape(new, c), Some(&[4][..]));
    }
}
