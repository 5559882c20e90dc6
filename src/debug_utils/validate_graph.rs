//! Input graph validation.

use core::fmt;

use anyhow::{Result, bail, ensure};
use cranelift_entity::EntityRef as _;

use crate::graph::{
    Graph, MAX_NODES, MAX_RANK, MAX_VALUE_BYTES, MAX_VALUES, Node, Value, tensor_bytes,
};
use crate::internal::schedule::Scheduler;
use crate::target::Target;

/// Checks `graph` to ensure it satisfies all of the pre-conditions required
/// by the memory allocator.
///
/// This also checks that `target` describes a usable local memory.
pub fn validate_graph(graph: &impl Graph, target: &impl Target) -> Result<()> {
    let ctx = Context { graph, target };
    ctx.check_graph()
}

/// An entity reference.
#[derive(Debug, Clone, Copy)]
enum Entity {
    Node(Node),
    Value(Value),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Entity::Node(x) => x.fmt(f),
            Entity::Value(x) => x.fmt(f),
        }
    }
}

/// State used for validation.
struct Context<'a, G, T> {
    graph: &'a G,
    target: &'a T,
}

impl<G: Graph, T: Target> Context<'_, G, T> {
    /// Check that an entity refers to a valid object.
    fn check_entity(&self, entity: Entity) -> Result<()> {
        let (index, len) = match entity {
            Entity::Node(x) => (x.index(), self.graph.num_nodes()),
            Entity::Value(x) => (x.index(), self.graph.num_values()),
        };
        ensure!(index < len, "{entity}: Invalid entity reference");
        Ok(())
    }

    fn check_graph(&self) -> Result<()> {
        ensure!(
            self.graph.num_nodes() <= MAX_NODES,
            "Too many nodes: {} (max: {MAX_NODES})",
            self.graph.num_nodes()
        );
        ensure!(
            self.graph.num_values() <= MAX_VALUES,
            "Too many values: {} (max: {MAX_VALUES})",
            self.graph.num_values()
        );

        let alignment = self.target.local_memory_alignment();
        ensure!(
            alignment.is_power_of_two(),
            "Local memory alignment {alignment} is not a power of 2"
        );

        for value in self.graph.values() {
            self.check_value(value)?;
        }
        for node in self.graph.nodes() {
            self.check_node(node)?;
        }

        if Scheduler::new().compute(self.graph).is_err() {
            bail!("Graph contains a cycle");
        }
        Ok(())
    }

    fn check_value(&self, value: Value) -> Result<()> {
        let name = self.graph.value_name(value);
        ensure!(
            !name.contains(|c: char| c == '"' || c.is_control()),
            "{value}: Name {name:?} contains invalid characters"
        );

        let ty = self.graph.value_type(value);
        ensure!(
            self.target.is_native_tensor_type(ty),
            "{value}: Element type {ty} is not supported by the target"
        );

        let shape = self.graph.value_shape(value);
        ensure!(
            shape.len() <= MAX_RANK,
            "{value}: Too many dimensions: {} (max: {MAX_RANK})",
            shape.len()
        );
        ensure!(!shape.contains(&0), "{value}: Shape has a zero dimension");
        match tensor_bytes(shape, ty) {
            Some(bytes) if bytes <= MAX_VALUE_BYTES => {}
            _ => bail!("{value}: Tensor is too large (max: {MAX_VALUE_BYTES} bytes)"),
        }

        if let Some(def) = self.graph.value_def(value) {
            self.check_entity(Entity::Node(def))?;
            ensure!(
                !self.graph.value_is_resident(value),
                "{value}: Resident value cannot be produced by {def}"
            );
            ensure!(
                self.graph.node_outputs(def).contains(&value),
                "{value}: Defining node {def} does not list it as an output"
            );
        }

        let users = self.graph.value_users(value);
        for (i, &user) in users.iter().enumerate() {
            self.check_entity(Entity::Node(user))?;
            ensure!(
                !users[..i].contains(&user),
                "{value}: {user} listed multiple times as a user"
            );
            ensure!(
                self.graph.node_inputs(user).contains(&value),
                "{value}: User {user} does not list it as an input"
            );
        }
        Ok(())
    }

    fn check_node(&self, node: Node) -> Result<()> {
        let kind = self.graph.node_kind(node);
        ensure!(
            kind.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                && kind
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')),
            "{node}: Invalid operator name {kind:?}"
        );

        for &value in self.graph.node_inputs(node) {
            self.check_entity(Entity::Value(value))?;
            ensure!(
                self.graph.value_users(value).contains(&node),
                "{node}: Input {value} does not list it as a user"
            );
        }

        let outputs = self.graph.node_outputs(node);
        for (i, &value) in outputs.iter().enumerate() {
            self.check_entity(Entity::Value(value))?;
            ensure!(
                !outputs[..i].contains(&value),
                "{node}: {value} written multiple times"
            );
            ensure!(
                self.graph.value_def(value) == Some(node),
                "{node}: Output {value} is defined by another node"
            );
            ensure!(
                !self.graph.node_inputs(node).contains(&value),
                "{node}: {value} is both an input and an output"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_utils::{GenericGraph, GenericTarget};
    use crate::graph::ElemType;

    fn target() -> GenericTarget {
        GenericTarget::new(1024)
    }

    #[test]
    fn valid_graph() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::F32, &[2, 2]);
        let y = graph.add_value("y", ElemType::F32, &[2, 2]);
        graph.add_node("relu", &[x], &[y]);
        graph.set_output(y);
        validate_graph(&graph, &target()).unwrap();
    }

    #[test]
    fn zero_dimension() {
        let mut graph = GenericGraph::new();
        graph.add_value("x", ElemType::F32, &[2, 0]);
        assert!(validate_graph(&graph, &target()).is_err());
    }

    #[test]
    fn unsupported_type() {
        let mut graph = GenericGraph::new();
        graph.add_value("x", ElemType::I64, &[2]);
        let mut target = target();
        target.supports_i64 = false;
        assert!(validate_graph(&graph, &target).is_err());
    }

    #[test]
    fn multiple_definitions() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::F32, &[2]);
        let y = graph.add_value("y", ElemType::F32, &[2]);
        graph.add_node("relu", &[x], &[y]);
        graph.add_node("relu", &[x], &[y]);
        assert!(validate_graph(&graph, &target()).is_err());
    }

    #[test]
    fn resident_value_with_definition() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::F32, &[2]);
        let y = graph.add_value("y", ElemType::F32, &[2]);
        graph.add_node("relu", &[x], &[y]);
        graph.set_resident(y);
        assert!(validate_graph(&graph, &target()).is_err());
    }

    #[test]
    fn cycle() {
        let mut graph = GenericGraph::new();
        let a = graph.add_value("a", ElemType::F32, &[2]);
        let b = graph.add_value("b", ElemType::F32, &[2]);
        graph.add_node("add", &[b], &[a]);
        graph.add_node("add", &[a], &[b]);
        assert!(validate_graph(&graph, &target()).is_err());
    }

    #[test]
    fn bad_alignment() {
        let graph = GenericGraph::new();
        assert!(validate_graph(&graph, &target().with_alignment(12)).is_err());
    }
}
