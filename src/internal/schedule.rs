//! Linearization of the input graph into an execution order.
//!
//! Live intervals are expressed as positions in this order, so it must be
//! deterministic: among the nodes whose inputs are all available, the one
//! with the lowest index is always scheduled first. A graph whose nodes are
//! already topologically ordered is therefore scheduled in index order.

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Reverse;

use cranelift_entity::SecondaryMap;

use crate::MemAllocError;
use crate::graph::{Graph, Node};

pub struct Scheduler {
    /// Nodes in execution order.
    order: Vec<Node>,

    /// Number of inputs of each node whose defining node has not been
    /// scheduled yet.
    pending: SecondaryMap<Node, u32>,

    /// Nodes ready for scheduling, lowest index first.
    ready: BinaryHeap<Reverse<Node>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            pending: SecondaryMap::new(),
            ready: BinaryHeap::new(),
        }
    }

    /// Execution order computed by the last call to `compute`.
    pub fn order(&self) -> &[Node] {
        &self.order
    }

    /// Computes a topological order of all nodes in `graph`.
    pub fn compute(&mut self, graph: &impl Graph) -> Result<(), MemAllocError> {
        self.order.clear();
        self.pending.clear();
        self.ready.clear();

        for node in graph.nodes() {
            let count = graph
                .node_inputs(node)
                .iter()
                .filter(|&&value| graph.value_def(value).is_some())
                .count();
            self.pending[node] = count as u32;
            if count == 0 {
                self.ready.push(Reverse(node));
            }
        }

        while let Some(Reverse(node)) = self.ready.pop() {
            self.order.push(node);
            for &value in graph.node_outputs(node) {
                for &user in graph.value_users(value) {
                    let uses = graph
                        .node_inputs(user)
                        .iter()
                        .filter(|&&input| input == value)
                        .count() as u32;
                    debug_assert!(self.pending[user] >= uses);
                    self.pending[user] -= uses;
                    if self.pending[user] == 0 && uses != 0 {
                        self.ready.push(Reverse(user));
                    }
                }
            }
        }

        if self.order.len() != graph.num_nodes() {
            trace!(
                "Only {} of {} nodes could be scheduled",
                self.order.len(),
                graph.num_nodes()
            );
            return Err(MemAllocError::CyclicGraph);
        }

        trace!("Schedule: {:?}", self.order);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::debug_utils::GenericGraph;
    use crate::graph::ElemType;

    #[test]
    fn schedules_out_of_order_nodes_topologically() {
        let mut graph = GenericGraph::new();
        let a = graph.add_value("a", ElemType::F32, &[4]);
        let b = graph.add_value("b", ElemType::F32, &[4]);
        let c = graph.add_value("c", ElemType::F32, &[4]);
        // node0 consumes the output of node1.
        let n0 = graph.add_node("relu", &[b], &[c]);
        let n1 = graph.add_node("relu", &[a], &[b]);

        let mut scheduler = Scheduler::new();
        scheduler.compute(&graph).unwrap();
        assert_eq!(scheduler.order(), &[n1, n0]);
    }

    #[test]
    fn independent_nodes_keep_index_order() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("x", ElemType::F32, &[4]);
        let mut nodes = vec![];
        for i in 0..4 {
            let out = graph.add_value(alloc::format!("y{i}"), ElemType::F32, &[4]);
            nodes.push(graph.add_node("neg", &[x], &[out]));
        }

        let mut scheduler = Scheduler::new();
        scheduler.compute(&graph).unwrap();
        assert_eq!(scheduler.order(), &nodes[..]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = GenericGraph::new();
        let a = graph.add_value("a", ElemType::F32, &[4]);
        let b = graph.add_value("b", ElemType::F32, &[4]);
        graph.add_node("add", &[b], &[a]);
        graph.add_node("add", &[a], &[b]);

        let mut scheduler = Scheduler::new();
        assert!(matches!(
            scheduler.compute(&graph),
            Err(MemAllocError::CyclicGraph)
        ));
    }
}
