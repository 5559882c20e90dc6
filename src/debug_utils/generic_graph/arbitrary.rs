use alloc::vec::Vec;
use alloc::{format, vec};
use core::ops::RangeInclusive;

use arbitrary::{Result, Unstructured};
use smallvec::SmallVec;

use super::GenericGraph;
use crate::graph::{ElemType, Graph, MAX_RANK, Value};
use crate::target::Target;

/// Configuration options for [`GenericGraph::arbitrary_with_config`].
///
/// These are ranges from which a value is arbitrarily chosen when generating a
/// graph.
///
/// It's generally fine to just use `Default::default` for this.
#[derive(Debug, Clone)]
pub struct ArbitraryGraphConfig {
    /// Number of graph inputs, which have no defining node.
    pub inputs: RangeInclusive<usize>,

    /// Number of nodes in the graph.
    pub nodes: RangeInclusive<usize>,

    /// Number of values read by each node.
    pub inputs_per_node: RangeInclusive<usize>,

    /// Number of values written by each node.
    pub outputs_per_node: RangeInclusive<usize>,

    /// Number of dimensions of each value.
    pub rank: RangeInclusive<usize>,

    /// Size of each dimension.
    pub dim: RangeInclusive<u64>,
}

impl Default for ArbitraryGraphConfig {
    fn default() -> Self {
        Self {
            inputs: 1..=4,
            nodes: 0..=30,
            inputs_per_node: 1..=3,
            outputs_per_node: 1..=2,
            rank: 0..=4,
            dim: 1..=64,
        }
    }
}

impl GenericGraph {
    /// Constructs a randomly-generated `GenericGraph`.
    ///
    /// The graph only uses element types that are native to `target` and is
    /// guaranteed to pass validation with it.
    pub fn arbitrary_with_config(
        target: &impl Target,
        u: &mut Unstructured<'_>,
        config: ArbitraryGraphConfig,
    ) -> Result<Self> {
        let types: Vec<ElemType> = ElemType::ALL
            .into_iter()
            .filter(|&ty| target.is_native_tensor_type(ty))
            .collect();
        let mut builder = GraphBuilder {
            u,
            config,
            types,
            graph: GenericGraph::new(),
            available: vec![],
        };

        for _ in 0..builder.u.int_in_range(builder.config.inputs.clone())? {
            let value = builder.gen_value()?;
            if builder.u.ratio(1, 4)? {
                builder.graph.set_resident(value);
            }
            builder.available.push(value);
        }
        for _ in 0..builder.u.int_in_range(builder.config.nodes.clone())? {
            builder.gen_node()?;
        }
        builder.mark_outputs()?;
        builder.shuffle_nodes()
    }
}

struct GraphBuilder<'a, 'b> {
    /// Source of randomness.
    u: &'a mut Unstructured<'b>,

    /// Configuration options
    config: ArbitraryGraphConfig,

    /// Element types allowed by the target.
    types: Vec<ElemType>,

    /// Graph that is being built, with nodes in topological order.
    graph: GenericGraph,

    /// Values which can be used as node inputs.
    available: Vec<Value>,
}

impl GraphBuilder<'_, '_> {
    /// Creates a new value with a random type and shape.
    fn gen_value(&mut self) -> Result<Value> {
        let ty = *self.u.choose(&self.types)?;
        let rank = self.u.int_in_range(self.config.rank.clone())?.min(MAX_RANK);
        let mut shape = SmallVec::<[u64; 4]>::new();
        for _ in 0..rank {
            shape.push(self.u.int_in_range(self.config.dim.clone())?.max(1));
        }
        let name = format!("t{}", self.graph.num_values());
        Ok(self.graph.add_value(name, ty, &shape))
    }

    /// Creates a new node reading previously created values.
    fn gen_node(&mut self) -> Result<()> {
        let mut inputs = vec![];
        for _ in 0..self.u.int_in_range(self.config.inputs_per_node.clone())? {
            let value = *self.u.choose(&self.available)?;
            if !inputs.contains(&value) {
                inputs.push(value);
            }
        }
        let mut outputs = vec![];
        for _ in 0..self.u.int_in_range(self.config.outputs_per_node.clone())?.max(1) {
            outputs.push(self.gen_value()?);
        }
        let kind = *self.u.choose(&["add", "mul", "conv", "relu", "matmul", "concat"])?;
        self.graph.add_node(kind, &inputs, &outputs);
        self.available.extend_from_slice(&outputs);
        Ok(())
    }

    /// Marks every computed value without users as a graph output, as well as
    /// a few others.
    fn mark_outputs(&mut self) -> Result<()> {
        for value in self.graph.values() {
            if self.graph.value_def(value).is_none() {
                continue;
            }
            if self.graph.value_users(value).is_empty() || self.u.ratio(1, 8)? {
                self.graph.set_output(value);
            }
        }
        Ok(())
    }

    /// Rebuilds the graph with nodes in a random order, so that the graph
    /// still has to be scheduled.
    fn shuffle_nodes(self) -> Result<GenericGraph> {
        let Self { u, graph, .. } = self;
        let mut order: Vec<_> = graph.nodes().collect();
        for i in (1..order.len()).rev() {
            let j = u.int_in_range(0..=i)?;
            order.swap(i, j);
        }

        let mut shuffled = GenericGraph::new();
        for value in graph.values() {
            let new = shuffled.add_value(
                graph.value_name(value),
                graph.value_type(value),
                graph.value_shape(value),
            );
            debug_assert_eq!(new, value);
            if graph.value_is_resident(value) {
                shuffled.set_resident(new);
            }
            if graph.value_is_output(value) {
                shuffled.set_output(new);
            }
        }
        for node in order {
            shuffled.add_node(
                graph.node_kind(node),
                graph.node_inputs(node),
                graph.node_outputs(node),
            );
        }
        Ok(shuffled)
    }
}
