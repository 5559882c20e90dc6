//! Generic implementation of a [`Graph`] which can be used for testing the
//! memory allocator.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use cranelift_entity::PrimaryMap;
use cranelift_entity::packed_option::PackedOption;
use smallvec::SmallVec;

use super::DisplayGraph;
use crate::graph::{ElemType, Graph, Node, Value};

#[cfg(feature = "arbitrary")]
mod arbitrary;
#[cfg(feature = "arbitrary")]
pub use arbitrary::ArbitraryGraphConfig;

#[cfg(feature = "parse")]
mod parse;

#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct NodeData {
    kind: String,
    inputs: Vec<Value>,
    outputs: Vec<Value>,
}

#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct ValueData {
    name: String,
    ty: ElemType,
    shape: SmallVec<[u64; 4]>,
    def: PackedOption<Node>,
    users: Vec<Node>,
    is_resident: bool,
    is_output: bool,
}

/// A generic implementation of [`Graph`] which can be built programmatically,
/// constructed from an existing `Graph` or parsed from a text representation.
///
/// This is primarily useful for development and debugging of the memory
/// allocator since it enables working with user-readable and editable forms
/// of the allocator input.
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenericGraph {
    nodes: PrimaryMap<Node, NodeData>,
    values: PrimaryMap<Value, ValueData>,
}

impl fmt::Debug for GenericGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DisplayGraph(self).fmt(f)
    }
}

impl fmt::Display for GenericGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DisplayGraph(self).fmt(f)
    }
}

impl GenericGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new tensor to the graph. It has no defining node until it is
    /// listed as the output of a node.
    pub fn add_value(&mut self, name: impl Into<String>, ty: ElemType, shape: &[u64]) -> Value {
        self.values.push(ValueData {
            name: name.into(),
            ty,
            shape: SmallVec::from_slice(shape),
            def: PackedOption::default(),
            users: Vec::new(),
            is_resident: false,
            is_output: false,
        })
    }

    /// Adds a new node reading `inputs` and writing `outputs`.
    ///
    /// The node becomes the definition of every value in `outputs`.
    pub fn add_node(&mut self, kind: impl Into<String>, inputs: &[Value], outputs: &[Value]) -> Node {
        let node = self.nodes.next_key();
        for &value in inputs {
            let users = &mut self.values[value].users;
            if !users.contains(&node) {
                users.push(node);
            }
        }
        for &value in outputs {
            self.values[value].def = node.into();
        }
        self.nodes.push(NodeData {
            kind: kind.into(),
            inputs: inputs.into(),
            outputs: outputs.into(),
        })
    }

    /// Marks a value as having backend-provided storage.
    pub fn set_resident(&mut self, value: Value) {
        self.values[value].is_resident = true;
    }

    /// Marks a value as an output of the whole graph.
    pub fn set_output(&mut self, value: Value) {
        self.values[value].is_output = true;
    }

    /// Constructs a `GenericGraph` from an existing object which implements
    /// the [`Graph`] trait.
    pub fn from_graph(graph: &impl Graph) -> Self {
        let mut values = PrimaryMap::new();
        let mut nodes = PrimaryMap::new();
        for value in graph.values() {
            values.push(ValueData {
                name: graph.value_name(value).into(),
                ty: graph.value_type(value),
                shape: SmallVec::from_slice(graph.value_shape(value)),
                def: graph.value_def(value).into(),
                users: graph.value_users(value).into(),
                is_resident: graph.value_is_resident(value),
                is_output: graph.value_is_output(value),
            });
        }
        for node in graph.nodes() {
            nodes.push(NodeData {
                kind: graph.node_kind(node).into(),
                inputs: graph.node_inputs(node).into(),
                outputs: graph.node_outputs(node).into(),
            });
        }
        Self { nodes, values }
    }
}

impl Graph for GenericGraph {
    #[inline]
    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    fn node_kind(&self, node: Node) -> &str {
        &self.nodes[node].kind
    }

    #[inline]
    fn node_inputs(&self, node: Node) -> &[Value] {
        &self.nodes[node].inputs
    }

    #[inline]
    fn node_outputs(&self, node: Node) -> &[Value] {
        &self.nodes[node].outputs
    }

    #[inline]
    fn num_values(&self) -> usize {
        self.values.len()
    }

    #[inline]
    fn value_name(&self, value: Value) -> &str {
        &self.values[value].name
    }

    #[inline]
    fn value_type(&self, value: Value) -> ElemType {
        self.values[value].ty
    }

    #[inline]
    fn value_shape(&self, value: Value) -> &[u64] {
        &self.values[value].shape
    }

    #[inline]
    fn value_def(&self, value: Value) -> Option<Node> {
        self.values[value].def.expand()
    }

    #[inline]
    fn value_users(&self, value: Value) -> &[Node] {
        &self.values[value].users
    }

    #[inline]
    fn value_is_resident(&self, value: Value) -> bool {
        self.values[value].is_resident
    }

    #[inline]
    fn value_is_output(&self, value: Value) -> bool {
        self.values[value].is_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_tracks_defs_and_users() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::F32, &[4, 4]);
        let y = graph.add_value("y", ElemType::F32, &[4, 4]);
        let n0 = graph.add_node("mul", &[x, x], &[y]);

        assert_eq!(graph.value_def(x), None);
        assert_eq!(graph.value_def(y), Some(n0));
        assert_eq!(graph.value_users(x), &[n0]);
        assert_eq!(graph.node_inputs(n0), &[x, x]);
        assert_eq!(graph.value_size(y), 64);
    }

    #[test]
    fn from_graph_is_identical() {
        let mut graph = GenericGraph::new();
        let w = graph.add_value("w", ElemType::I8, &[3, 3]);
        let x = graph.add_value("x", ElemType::F16, &[1, 3]);
        let y = graph.add_value("y", ElemType::F16, &[1, 3]);
        graph.set_resident(w);
        graph.set_output(y);
        graph.add_node("matmul", &[x, w], &[y]);

        let copy = GenericGraph::from_graph(&graph);
        assert_eq!(alloc::format!("{copy}"), alloc::format!("{graph}"));
    }
}
