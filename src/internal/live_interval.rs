//! Live interval computation for a subgraph.
//!
//! Positions are indices into the subgraph's execution order. A value is
//! live from the position of the node defining it (or its first use if it is
//! produced outside the subgraph) until its last use in the subgraph. Values
//! that are defined in the subgraph and still needed afterwards, either as a
//! graph output or by a node of another subgraph, stay live until the last
//! position of the subgraph so they can be written back.

use alloc::vec::Vec;
use core::slice;

use cranelift_entity::SecondaryMap;
use cranelift_entity::packed_option::PackedOption;

use crate::graph::{Graph, Node, Value};
use crate::output::LiveInterval;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct IntervalIndex(u32);
cranelift_entity::entity_impl!(IntervalIndex);

/// Live intervals of all values touched by a subgraph, sorted by start
/// position.
pub struct LiveIntervals {
    intervals: Vec<LiveInterval>,
    index: SecondaryMap<Value, PackedOption<IntervalIndex>>,
}

impl LiveIntervals {
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            index: SecondaryMap::new(),
        }
    }

    /// Computes live intervals for a subgraph consisting of `nodes` in
    /// execution order. `in_subgraph` must return true exactly for the nodes
    /// in `nodes`.
    pub fn compute(
        &mut self,
        graph: &impl Graph,
        nodes: &[Node],
        in_subgraph: impl Fn(Node) -> bool,
    ) {
        self.intervals.clear();
        self.index.clear();

        for (pos, &node) in nodes.iter().enumerate() {
            let pos = pos as u32;
            for &value in graph.node_inputs(node) {
                self.touch(value, pos);
            }
            for &value in graph.node_outputs(node) {
                self.touch(value, pos);
            }
        }

        // Values escaping the subgraph must survive until its end.
        let last = nodes.len().saturating_sub(1) as u32;
        for interval in &mut self.intervals {
            let value = interval.value;
            let defined_here = graph.value_def(value).is_some_and(&in_subgraph);
            if defined_here
                && (graph.value_is_output(value)
                    || graph.value_users(value).iter().any(|&user| !in_subgraph(user)))
            {
                interval.end = last;
            }
        }

        // Stable sort: values starting at the same position keep the order
        // in which they were first seen.
        self.intervals.sort_by_key(|interval| interval.start);
        self.index.clear();
        for (i, interval) in self.intervals.iter().enumerate() {
            self.index[interval.value] = Some(IntervalIndex::from_u32(i as u32)).into();
        }

        if trace_enabled!() {
            trace!("Live intervals:");
            for interval in &self.intervals {
                trace!("- {}: {interval}", interval.value);
            }
        }
    }

    fn touch(&mut self, value: Value, pos: u32) {
        if let Some(idx) = self.index[value].expand() {
            let interval = &mut self.intervals[idx.as_u32() as usize];
            interval.end = interval.end.max(pos);
        } else {
            let idx = IntervalIndex::from_u32(self.intervals.len() as u32);
            self.intervals.push(LiveInterval::new(value, pos, pos));
            self.index[value] = Some(idx).into();
        }
    }

    /// Live interval of `value`, if it is touched by the subgraph.
    pub fn get(&self, value: Value) -> Option<&LiveInterval> {
        let idx = self.index.get(value)?.expand()?;
        Some(&self.intervals[idx.as_u32() as usize])
    }

    /// All intervals in non-decreasing order of their start position.
    pub fn iter(&self) -> slice::Iter<'_, LiveInterval> {
        self.intervals.iter()
    }

    /// Replaces the intervals with an explicit list, in the given order.
    ///
    /// This bypasses liveness analysis and is used when intervals come from
    /// an external source.
    #[cfg(any(test, feature = "fuzzing"))]
    pub fn set(&mut self, intervals: impl IntoIterator<Item = LiveInterval>) {
        self.intervals.clear();
        self.index.clear();
        for interval in intervals {
            let idx = IntervalIndex::from_u32(self.intervals.len() as u32);
            self.index[interval.value] = Some(idx).into();
            self.intervals.push(interval);
        }
    }
}

impl<'a> IntoIterator for &'a LiveIntervals {
    type Item = &'a LiveInterval;
    type IntoIter = slice::Iter<'a, LiveInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
