//! Checker which verifies that the output produced by the memory allocator
//! actually satisfies the constraints of the input graph and target.

use alloc::vec;
use alloc::vec::Vec;

use anyhow::{Result, bail, ensure};
use cranelift_entity::{EntityRef, SecondaryMap};
use hashbrown::{HashMap, HashSet};
use rustc_hash::FxBuildHasher;

use crate::graph::{Graph, Node, Value, tensor_bytes};
use crate::output::{AllocEntry, Output, Subgraph, SubgraphStatus};
use crate::target::Target;

/// Checks that the output of the memory allocator is consistent with its
/// input.
///
/// This verifies that:
/// - every node belongs to exactly one subgraph, and the subgraphs can be
///   executed in some order without violating data dependencies.
/// - in every allocated subgraph, each non-resident value touched by the
///   subgraph is allocated exactly once with a live interval covering all of
///   its uses, and values live at the same time never share memory.
/// - the peak memory usage of every allocated subgraph is below the budget and
///   all allocations are aligned.
///
/// Subgraphs that failed allocation are only checked for the first property.
pub fn check_output<G: Graph, T: Target>(output: &Output<'_, G, T>) -> Result<()> {
    let mut checker = Checker {
        output,
        positions: SecondaryMap::new(),
        touched: HashSet::default(),
        entries: HashMap::default(),
    };
    checker.check_partition()?;
    for subgraph in output.subgraphs() {
        checker.check_subgraph(subgraph)?;
    }
    Ok(())
}

struct Checker<'a, 'b, G, T> {
    output: &'b Output<'a, G, T>,

    /// Position of each node in its subgraph.
    positions: SecondaryMap<Node, u32>,

    /// Non-resident values touched by the current subgraph.
    touched: HashSet<Value, FxBuildHasher>,

    /// Allocation of each value in the current subgraph.
    entries: HashMap<Value, AllocEntry, FxBuildHasher>,
}

impl<G: Graph, T: Target> Checker<'_, '_, G, T> {
    fn check_partition(&mut self) -> Result<()> {
        let graph = self.output.graph();
        let mut seen = SecondaryMap::<Node, bool>::new();
        for subgraph in self.output.subgraphs() {
            let nodes = self.output.subgraph_nodes(subgraph);
            ensure!(!nodes.is_empty(), "{subgraph} is empty");
            for (pos, &node) in nodes.iter().enumerate() {
                ensure!(!seen[node], "{node} appears in multiple subgraphs");
                seen[node] = true;
                ensure!(
                    self.output.node_subgraph(node) == Some(subgraph),
                    "{node} is listed in {subgraph} but mapped to another subgraph"
                );
                self.positions[node] = pos as u32;
            }
        }
        for node in graph.nodes() {
            ensure!(seen[node], "{node} is not in any subgraph");
        }

        // Within a subgraph, values must be defined before they are used.
        // Across subgraphs, the dependencies must form a DAG.
        let mut succs = vec![vec![]; self.output.num_subgraphs()];
        let mut preds = vec![0usize; self.output.num_subgraphs()];
        for value in graph.values() {
            let Some(def) = graph.value_def(value) else {
                continue;
            };
            let def_sg = self.subgraph_of(def)?;
            for &user in graph.value_users(value) {
                let user_sg = self.subgraph_of(user)?;
                if user_sg == def_sg {
                    ensure!(
                        self.positions[def] < self.positions[user],
                        "{value} is used by {user} before being defined by {def}"
                    );
                } else if !succs[def_sg.index()].contains(&user_sg) {
                    succs[def_sg.index()].push(user_sg);
                    preds[user_sg.index()] += 1;
                }
            }
        }
        let mut ready: Vec<Subgraph> = self
            .output
            .subgraphs()
            .filter(|sg| preds[sg.index()] == 0)
            .collect();
        let mut scheduled = 0;
        while let Some(sg) = ready.pop() {
            scheduled += 1;
            for &succ in &succs[sg.index()] {
                preds[succ.index()] -= 1;
                if preds[succ.index()] == 0 {
                    ready.push(succ);
                }
            }
        }
        ensure!(
            scheduled == self.output.num_subgraphs(),
            "Subgraphs have cyclic dependencies"
        );
        Ok(())
    }

    fn subgraph_of(&self, node: Node) -> Result<Subgraph> {
        match self.output.node_subgraph(node) {
            Some(subgraph) => Ok(subgraph),
            None => bail!("{node} is not in any subgraph"),
        }
    }

    fn check_subgraph(&mut self, subgraph: Subgraph) -> Result<()> {
        let peak = match self.output.subgraph_status(subgraph) {
            SubgraphStatus::Allocated { peak } => peak,
            SubgraphStatus::Failed(_) => {
                ensure!(
                    self.output.subgraph_allocations(subgraph).is_empty(),
                    "{subgraph} failed but has allocations"
                );
                return Ok(());
            }
        };
        let graph = self.output.graph();
        let nodes = self.output.subgraph_nodes(subgraph);
        let alignment = self.output.target().local_memory_alignment().max(1);
        ensure!(
            peak < self.output.budget(),
            "{subgraph}: peak {peak} exceeds budget {}",
            self.output.budget()
        );

        self.touched.clear();
        for &node in nodes {
            for &value in graph.node_inputs(node).iter().chain(graph.node_outputs(node)) {
                if !graph.value_is_resident(value) {
                    self.touched.insert(value);
                }
            }
        }

        self.entries.clear();
        let mut max_end = 0;
        for &entry in self.output.subgraph_allocations(subgraph) {
            let value = entry.value();
            ensure!(
                self.touched.contains(&value),
                "{subgraph}: {value} is allocated but not used by the subgraph"
            );
            ensure!(
                self.entries.insert(value, entry).is_none(),
                "{subgraph}: {value} is allocated multiple times"
            );
            ensure!(
                entry.region.start % alignment == 0 && entry.region.size % alignment == 0,
                "{subgraph}: {value} at {} is not aligned to {alignment}",
                entry.region
            );
            let Some(tile) = self.output.value_tile_shape(subgraph, value) else {
                bail!("{subgraph}: {value} has no tile shape");
            };
            let full = graph.value_shape(value);
            ensure!(
                tile.len() == full.len()
                    && tile.iter().zip(full).all(|(&t, &f)| t >= 1 && t <= f),
                "{subgraph}: tile shape of {value} does not fit the value shape"
            );
            let bytes = tensor_bytes(tile, graph.value_type(value)).unwrap_or(u64::MAX);
            ensure!(
                entry.region.size >= bytes,
                "{subgraph}: {value} needs {bytes} bytes but only got {}",
                entry.region.size
            );
            max_end = max_end.max(entry.region.end());
        }
        ensure!(
            max_end == peak,
            "{subgraph}: reported peak {peak} doesn't match allocations ({max_end})"
        );
        for value in &self.touched {
            ensure!(
                self.entries.contains_key(value),
                "{subgraph}: {value} is used but not allocated"
            );
        }

        // Live intervals must cover every access within the subgraph, and
        // values needed later must survive until the end.
        let last = nodes.len() as u32 - 1;
        for (pos, &node) in nodes.iter().enumerate() {
            let pos = pos as u32;
            for &value in graph.node_inputs(node).iter().chain(graph.node_outputs(node)) {
                if let Some(entry) = self.entries.get(&value) {
                    ensure!(
                        entry.interval.start <= pos && pos <= entry.interval.end,
                        "{subgraph}: {value} accessed by {node} outside of its live interval \
                         {}",
                        entry.interval
                    );
                }
            }
        }
        for entry in self.entries.values() {
            let value = entry.value();
            ensure!(
                entry.interval.end <= last,
                "{subgraph}: live interval of {value} extends past the subgraph"
            );
            let escapes = graph.value_is_output(value)
                || graph
                    .value_users(value)
                    .iter()
                    .any(|&user| self.output.node_subgraph(user) != Some(subgraph));
            let defined_here = graph
                .value_def(value)
                .is_some_and(|def| self.output.node_subgraph(def) == Some(subgraph));
            if defined_here && escapes {
                ensure!(
                    entry.interval.end == last,
                    "{subgraph}: {value} is needed after the subgraph but dies early"
                );
            }
        }

        // Values with overlapping lifetimes must not share memory.
        let entries = self.output.subgraph_allocations(subgraph);
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if a.interval.intersects(&b.interval) && a.region.conflicts(b.region) {
                    bail!(
                        "{subgraph}: {} at {} overlaps {} at {} while both are live",
                        a.value(),
                        a.region,
                        b.value(),
                        b.region
                    );
                }
            }
        }
        Ok(())
    }
}
