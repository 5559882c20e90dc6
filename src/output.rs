//! Output of the memory allocator.
//!
//! A successful run of [`MemoryAllocator::allocate_memory`] partitions the
//! graph into one or more [`Subgraph`]s. Each subgraph is either allocated,
//! in which case every non-resident value it touches has been assigned a
//! [`MemRegion`] in local memory, or it failed and holds no allocations.
//!
//! The same value may appear in several subgraphs when it crosses a subgraph
//! boundary: it is then stored back by the subgraph producing it and loaded
//! again by each subgraph consuming it, possibly at different addresses.
//!
//! [`MemoryAllocator::allocate_memory`]: crate::MemoryAllocator::allocate_memory

use core::fmt;

use cranelift_entity::{Keys, entity_impl};

use crate::graph::{Graph, Node, Value};
use crate::target::Target;
use crate::{MemAllocError, MemoryAllocator, Stats};

/// A partition of the input graph which is allocated independently.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subgraph(u32);
entity_impl!(Subgraph, "sg");

/// Range of positions in a subgraph's execution order during which a value
/// must remain resident in local memory.
///
/// Both bounds are inclusive: two intervals that touch at a single position
/// are considered to overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LiveInterval {
    /// Value that is live.
    pub value: Value,

    /// First position at which the value is live.
    pub start: u32,

    /// Last position at which the value is live.
    pub end: u32,
}

impl LiveInterval {
    /// Creates a new `LiveInterval`.
    #[inline]
    #[must_use]
    pub fn new(value: Value, start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Self { value, start, end }
    }

    /// Returns whether two intervals have at least one position in common.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &LiveInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for LiveInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A half-open range of bytes `[start, start + size)` in local memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemRegion {
    /// Address of the first byte of the region.
    pub start: u64,

    /// Number of bytes in the region.
    pub size: u64,
}

impl MemRegion {
    /// Creates a new `MemRegion`.
    #[inline]
    #[must_use]
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// Address one past the last byte of the region.
    #[inline]
    #[must_use]
    pub const fn end(self) -> u64 {
        self.start + self.size
    }

    /// Returns whether the two regions share at least one byte.
    #[inline]
    #[must_use]
    pub const fn conflicts(self, other: MemRegion) -> bool {
        !(self.end() <= other.start || other.end() <= self.start)
    }
}

impl fmt::Display for MemRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Memory assigned to a single value within a subgraph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocEntry {
    /// Bytes assigned to the value.
    pub region: MemRegion,

    /// Live interval of the value in the subgraph's execution order.
    pub interval: LiveInterval,
}

impl AllocEntry {
    /// Value that this entry is for.
    #[inline]
    #[must_use]
    pub fn value(&self) -> Value {
        self.interval.value
    }
}

/// Reason why a subgraph could not be allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AllocFailure {
    /// The subgraph still exceeds the budget after shrinking and cannot be
    /// split any further.
    Unsplittable {
        /// Peak memory usage of the last allocation attempt.
        peak: u64,
    },

    /// A value that needs memory has no live interval. This indicates a
    /// broken input graph.
    MissingLiveInterval(Value),
}

impl fmt::Display for AllocFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            AllocFailure::Unsplittable { peak } => {
                write!(f, "cannot be split further (peak {peak} bytes)")
            }
            AllocFailure::MissingLiveInterval(value) => {
                write!(f, "no live interval for {value}")
            }
        }
    }
}

/// Final state of a subgraph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubgraphStatus {
    /// All values fit in local memory.
    Allocated {
        /// Highest end address over all allocations of the subgraph.
        peak: u64,
    },

    /// The subgraph was abandoned.
    Failed(AllocFailure),
}

/// Result of running the memory allocator on a graph.
pub struct Output<'a, G, T> {
    pub(crate) memalloc: &'a MemoryAllocator,
    pub(crate) graph: &'a G,
    pub(crate) target: &'a T,
    pub(crate) budget: u64,
}

impl<'a, G: Graph, T: Target> Output<'a, G, T> {
    /// Returns the [`Graph`] that was allocated.
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &'a G {
        self.graph
    }

    /// Returns the [`Target`] used for allocation.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &'a T {
        self.target
    }

    /// Local memory budget that every subgraph was allocated against.
    #[inline]
    #[must_use]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Statistics collected during allocation.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &'a Stats {
        &self.memalloc.stats
    }

    /// Number of subgraphs the graph was partitioned into.
    #[inline]
    #[must_use]
    pub fn num_subgraphs(&self) -> usize {
        self.memalloc.subgraphs.num_subgraphs()
    }

    /// Iterator over all the [`Subgraph`]s.
    #[inline]
    #[must_use]
    pub fn subgraphs(&self) -> Keys<Subgraph> {
        Keys::with_len(self.num_subgraphs())
    }

    /// Nodes of a subgraph, in execution order.
    #[inline]
    #[must_use]
    pub fn subgraph_nodes(&self, subgraph: Subgraph) -> &'a [Node] {
        self.memalloc.subgraphs.nodes(subgraph)
    }

    /// Subgraph that a node was assigned to.
    ///
    /// This only returns `None` for nodes that are not part of the graph.
    #[inline]
    #[must_use]
    pub fn node_subgraph(&self, node: Node) -> Option<Subgraph> {
        self.memalloc.subgraphs.node_subgraph(node)
    }

    /// Final status of a subgraph.
    #[inline]
    #[must_use]
    pub fn subgraph_status(&self, subgraph: Subgraph) -> SubgraphStatus {
        self.memalloc
            .subgraphs
            .status(subgraph)
            .expect("subgraph was not processed")
    }

    /// Number of times the sizing of a subgraph was shrunk since the subgraph
    /// was last split.
    #[inline]
    #[must_use]
    pub fn subgraph_shrinks(&self, subgraph: Subgraph) -> u32 {
        self.memalloc.subgraphs.shrinks(subgraph)
    }

    /// Current tile shape of a value within a subgraph.
    ///
    /// This differs from the value's shape in the graph if the subgraph was
    /// shrunk. Returns `None` if the value is not allocated in the subgraph.
    #[inline]
    #[must_use]
    pub fn value_tile_shape(&self, subgraph: Subgraph, value: Value) -> Option<&'a [u64]> {
        self.memalloc.subgraphs.tile_shape(subgraph, value)
    }

    /// Allocations of a subgraph, in allocation order.
    ///
    /// This is empty for subgraphs that failed allocation.
    #[inline]
    #[must_use]
    pub fn subgraph_allocations(&self, subgraph: Subgraph) -> &'a [AllocEntry] {
        self.memalloc.subgraphs.entries(subgraph)
    }

    /// Memory assigned to a value within a subgraph.
    #[must_use]
    pub fn value_region(&self, subgraph: Subgraph, value: Value) -> Option<MemRegion> {
        self.subgraph_allocations(subgraph)
            .iter()
            .find(|entry| entry.value() == value)
            .map(|entry| entry.region)
    }

    /// Returns whether every subgraph was successfully allocated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.subgraphs().all(|subgraph| {
            matches!(
                self.subgraph_status(subgraph),
                SubgraphStatus::Allocated { .. }
            )
        })
    }

    /// Returns an error if any subgraph failed allocation.
    pub fn ensure_complete(&self) -> Result<(), MemAllocError> {
        let count = self
            .subgraphs()
            .filter(|&subgraph| {
                matches!(self.subgraph_status(subgraph), SubgraphStatus::Failed(_))
            })
            .count();
        if count == 0 {
            Ok(())
        } else {
            Err(MemAllocError::UnallocatableSubgraphs { count })
        }
    }
}

impl<G: Graph, T: Target> fmt::Display for Output<'_, G, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for subgraph in self.subgraphs() {
            let nodes = self.subgraph_nodes(subgraph);
            match self.subgraph_status(subgraph) {
                SubgraphStatus::Allocated { peak } => writeln!(
                    f,
                    "{subgraph}: {} nodes, peak {peak} bytes (budget {}), {} shrinks",
                    nodes.len(),
                    self.budget,
                    self.subgraph_shrinks(subgraph),
                )?,
                SubgraphStatus::Failed(failure) => {
                    writeln!(f, "{subgraph}: {} nodes, FAILED: {failure}", nodes.len())?;
                }
            }
            for entry in self.subgraph_allocations(subgraph) {
                writeln!(
                    f,
                    "    {}: \t{}\t(total: {})\t {}",
                    self.graph.value_name(entry.value()),
                    entry.region,
                    entry.region.size,
                    entry.interval,
                )?;
            }
        }
        Ok(())
    }
}
