//! A local memory allocator for tensors, designed to be embedded in a neural
//! network compiler backend.
//!
//! This crate is compatible with `#![no_std]` and only requires `alloc`.
//!
//! # Overview
//!
//! Accelerators typically compute out of a small hardware-local scratch
//! memory. Every intermediate tensor of a computation must be placed in that
//! memory while it is in use. This crate assigns an address to each tensor
//! such that tensors which are alive at the same time never overlap, while
//! tensors with disjoint lifetimes are free to reuse the same bytes.
//!
//! When the whole graph doesn't fit in the memory budget, the allocator
//! reduces the working set in two ways:
//! - *shrinking*: the tiles of all tensors in a subgraph are reduced, which
//!   corresponds to processing the subgraph in several smaller passes.
//! - *splitting*: the subgraph is cut into two subgraphs which are executed
//!   one after the other, with tensors crossing the cut stored back in
//!   between.
//!
//! # Usage
//!
//! You will need to define types which implement 2 traits:
//! - [`Graph`] describes the compute graph. See the [`graph`] module
//!   documentation for details.
//! - [`Target`] describes the local memory of the hardware. See the
//!   [`target`] module documentation for details.
//!
//! The allocator is invoked by creating an instance of [`MemoryAllocator`]
//! and then calling [`MemoryAllocator::allocate_memory`]. This returns an
//! [`Output`] which describes the partitioning of the graph into subgraphs
//! and the memory regions assigned within each of them. See the [`output`]
//! module documentation for details.
//!
//! # Reusing allocations
//!
//! Like most compiler passes, the [`MemoryAllocator`] type keeps its
//! temporary allocations around after a call to
//! [`MemoryAllocator::allocate_memory`] so that it can be run on many graphs
//! without repeatedly going through the system allocator. Drop it to free
//! that memory.
//!
//! # Validation
//!
//! The allocator assumes that its inputs are well-formed. Use
//! [`debug_utils::validate_graph`] to check a graph before allocation and
//! [`debug_utils::check_output`] to verify the result.
//!
//! [`Graph`]: graph::Graph
//! [`Target`]: target::Target

#![no_std]
#![warn(rust_2018_idioms, missing_docs)]
#![allow(
    clippy::too_many_arguments,
    clippy::collapsible_if,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::new_without_default
)]
#![warn(
    clippy::explicit_iter_loop,
    clippy::range_plus_one,
    clippy::map_unwrap_or,
    clippy::cloned_instead_of_copied,
    clippy::semicolon_if_nothing_returned,
    clippy::must_use_candidate,
    clippy::iter_without_into_iter,
    clippy::uninlined_format_args,
    clippy::ignored_unit_patterns
)]

extern crate alloc;
#[cfg(any(feature = "parse", feature = "clap"))]
extern crate std;

#[cfg(feature = "clap")]
use std::{borrow::ToOwned, string::String};

use core::fmt;

use graph::Graph;
use internal::controller::AllocationController;
use internal::interval_allocator::IntervalAllocator;
use internal::live_interval::LiveIntervals;
use internal::schedule::Scheduler;
use internal::subgraph::SubgraphManager;
use output::{Output, SubgraphStatus};
use target::Target;

// Even when trace logging is disabled, the trace macro has a significant
// performance cost so we disable it in release builds.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}
macro_rules! trace_enabled {
    () => {
        cfg!(feature = "trace-log") && ::log::log_enabled!(::log::Level::Trace)
    };
}

// Macro for collecting statistics.
macro_rules! stat {
    ($stats:expr, $field:ident) => {
        $stats.$field += 1
    };
    ($stats:expr, $field:ident, $count:expr) => {
        $stats.$field += $count
    };
}

pub mod debug_utils;
pub mod graph;
pub mod output;
pub mod target;

mod internal;

/// Exposed internal APIs for fuzzing.
#[cfg(feature = "fuzzing")]
pub use internal::{interval_allocator, live_interval};

/// Structure holding persistent memory allocations that can be reused across
/// multiple invocations of the memory allocator.
pub struct MemoryAllocator {
    scheduler: Scheduler,
    live_intervals: LiveIntervals,
    interval_allocator: IntervalAllocator,
    pub(crate) subgraphs: SubgraphManager,
    controller: AllocationController,
    pub(crate) stats: Stats,
}

impl Default for MemoryAllocator {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAllocator {
    /// Creates a new `MemoryAllocator` instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            live_intervals: LiveIntervals::new(),
            interval_allocator: IntervalAllocator::new(),
            subgraphs: SubgraphManager::new(),
            controller: AllocationController::new(),
            stats: Stats::default(),
        }
    }

    /// Runs the memory allocator on the given graph.
    ///
    /// This only returns an error if allocation could not be attempted at
    /// all. Subgraphs that cannot be made to fit the budget are reported as
    /// failed in the [`Output`], see [`Output::ensure_complete`].
    pub fn allocate_memory<'a, G, T>(
        &'a mut self,
        graph: &'a G,
        target: &'a T,
        options: &Options,
    ) -> Result<Output<'a, G, T>, MemAllocError>
    where
        G: Graph,
        T: Target,
    {
        trace!("Input graph:\n{}", debug_utils::DisplayGraph(graph));

        if !(options.shrink_threshold > 0.0 && options.shrink_threshold < 1.0) {
            return Err(MemAllocError::InvalidOptions);
        }
        let Some(budget) = target.local_memory_budget().filter(|&budget| budget != 0) else {
            log::error!("No local memory budget available for the target");
            return Err(MemAllocError::MissingBudget);
        };
        let alignment = target.local_memory_alignment().max(1);

        // Reset stats and gather initial information.
        self.stats = Stats::default();
        stat!(self.stats, nodes, graph.num_nodes());
        stat!(self.stats, values, graph.num_values());

        // Linearize the graph so that live intervals can be expressed as
        // positions in the execution order.
        self.scheduler.compute(graph)?;

        // Start with the whole graph as a single subgraph.
        self.subgraphs.init(graph, self.scheduler.order());

        // Shrink and split subgraphs until they all fit the budget.
        self.controller.run(
            graph,
            &mut self.subgraphs,
            &mut self.live_intervals,
            &mut self.interval_allocator,
            budget,
            alignment,
            options,
            &mut self.stats,
        );
        stat!(self.stats, subgraphs, self.subgraphs.num_subgraphs());

        for subgraph in self.subgraphs.subgraphs() {
            match self.subgraphs.status(subgraph) {
                Some(SubgraphStatus::Allocated { peak }) => log::info!(
                    "{subgraph}: local memory usage {peak} of {budget} bytes ({} nodes)",
                    self.subgraphs.nodes(subgraph).len()
                ),
                Some(SubgraphStatus::Failed(failure)) => {
                    log::warn!("{subgraph}: allocation failed: {failure}");
                }
                None => unreachable!(),
            }
        }

        let output = Output {
            memalloc: self,
            graph,
            target,
            budget,
        };
        trace!("Output:\n{output}");
        trace!("{}", self.stats);
        Ok(output)
    }
}

/// Policy used to reduce the memory requirements of a subgraph when it
/// doesn't fit in the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ShrinkStrategy {
    /// Halve the outermost dimension of each tile that is larger than 1.
    ///
    /// This corresponds to processing a subgraph in several batches and is
    /// the default.
    #[default]
    HalveOuterDim,

    /// Halve the largest dimension of each tile. Ties are broken in favor of
    /// the outermost dimension.
    HalveLargestDim,

    /// Never shrink: subgraphs that don't fit are split immediately.
    None,
}

impl ShrinkStrategy {
    /// Applies one shrinking step to a tile shape, rounding up. Returns
    /// whether the shape changed.
    pub(crate) fn shrink_shape(self, shape: &mut [u64]) -> bool {
        let dim = match self {
            ShrinkStrategy::HalveOuterDim => shape.iter_mut().find(|dim| **dim > 1),
            ShrinkStrategy::HalveLargestDim => shape
                .iter_mut()
                .rev()
                .max_by_key(|dim| **dim)
                .filter(|dim| **dim > 1),
            ShrinkStrategy::None => None,
        };
        match dim {
            Some(dim) => {
                *dim = dim.div_ceil(2);
                true
            }
            None => false,
        }
    }
}

/// Configuration options for the memory allocator.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct Options {
    /// When the peak usage of a subgraph after shrinking is more than this
    /// fraction of the peak before shrinking, shrinking is considered to have
    /// stalled and the subgraph is split instead.
    ///
    /// Must be strictly between 0 and 1.
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 0.9))]
    pub shrink_threshold: f32,

    /// How tiles are reduced when a subgraph doesn't fit.
    #[cfg_attr(
        feature = "clap",
        arg(long, value_enum, default_value_t = ShrinkStrategy::HalveOuterDim)
    )]
    pub shrink_strategy: ShrinkStrategy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shrink_threshold: 0.9,
            shrink_strategy: ShrinkStrategy::default(),
        }
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for ShrinkStrategy {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        u.choose(&[Self::HalveOuterDim, Self::HalveLargestDim, Self::None])
            .copied()
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for Options {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self {
            shrink_threshold: *u.choose(&[0.5, 0.75, 0.9, 0.99])?,
            shrink_strategy: u.arbitrary()?,
        })
    }
}

/// Error returned by the memory allocator.
///
/// This does not cover errors which are returned by the graph validator. If
/// invalid inputs are given then memory allocation may panic or produce
/// garbage results.
#[derive(Debug)]
#[non_exhaustive]
pub enum MemAllocError {
    /// The target did not provide a local memory budget, or the budget is 0.
    MissingBudget,

    /// The graph contains a cycle and cannot be scheduled.
    CyclicGraph,

    /// The allocator options are out of range.
    InvalidOptions,

    /// Some subgraphs could not be allocated within the budget.
    ///
    /// This is only returned by [`Output::ensure_complete`].
    UnallocatableSubgraphs {
        /// Number of failed subgraphs.
        count: usize,
    },
}

impl fmt::Display for MemAllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemAllocError::MissingBudget => {
                write!(f, "target does not provide a local memory budget")
            }
            MemAllocError::CyclicGraph => write!(f, "graph contains a cycle"),
            MemAllocError::InvalidOptions => {
                write!(f, "shrink threshold must be between 0 and 1")
            }
            MemAllocError::UnallocatableSubgraphs { count } => {
                write!(f, "{count} subgraphs do not fit in local memory")
            }
        }
    }
}

impl core::error::Error for MemAllocError {}

/// Statistics collected by the memory allocator.
///
/// This is an opaque type since the set of statistics may vary between
/// different versions of the allocator, even across minor versions.
///
/// The only supported operations on this type are:
/// * Default initialization
/// * Printing with `Debug` or `Display`
#[derive(Debug, Default, Clone)]
pub struct Stats {
    // Stats from input graph.
    nodes: usize,
    values: usize,

    // Stats from the control loop.
    subgraphs: usize,
    splits: usize,
    failed_splits: usize,
    shrinks: usize,
    allocation_attempts: usize,

    // Stats from the final allocation.
    allocated_subgraphs: usize,
    failed_subgraphs: usize,
    allocated_values: usize,
    max_peak: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:#?}")
    }
}
