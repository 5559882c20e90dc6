//! Control loop that fits every subgraph into the local memory budget.
//!
//! Subgraphs are processed from a worklist. Each one is allocated with its
//! current sizing, and if the peak usage doesn't fit the budget it is either
//! shrunk and retried, or split in two when shrinking stops making progress.

use alloc::vec::Vec;

use super::interval_allocator::{IntervalAllocator, ValueSizeMap};
use super::live_interval::LiveIntervals;
use super::subgraph::SubgraphManager;
use crate::graph::Graph;
use crate::output::{AllocFailure, Subgraph, SubgraphStatus};
use crate::{Options, Stats};

pub struct AllocationController {
    /// Subgraphs that still need to be allocated. The last one is processed
    /// first.
    worklist: Vec<Subgraph>,

    /// Memory requirement of each value for the current allocation attempt.
    sizes: ValueSizeMap,
}

impl AllocationController {
    pub fn new() -> Self {
        Self {
            worklist: Vec::new(),
            sizes: ValueSizeMap::default(),
        }
    }

    /// Processes every subgraph until it is either allocated within `budget`
    /// or determined to be impossible to allocate.
    pub fn run(
        &mut self,
        graph: &impl Graph,
        subgraphs: &mut SubgraphManager,
        live_intervals: &mut LiveIntervals,
        allocator: &mut IntervalAllocator,
        budget: u64,
        alignment: u64,
        options: &Options,
        stats: &mut Stats,
    ) {
        self.worklist.clear();
        self.worklist.extend(subgraphs.subgraphs().rev());

        while let Some(subgraph) = self.worklist.pop() {
            self.process(
                subgraph,
                graph,
                subgraphs,
                live_intervals,
                allocator,
                budget,
                alignment,
                options,
                stats,
            );
        }
    }

    fn process(
        &mut self,
        subgraph: Subgraph,
        graph: &impl Graph,
        subgraphs: &mut SubgraphManager,
        live_intervals: &mut LiveIntervals,
        allocator: &mut IntervalAllocator,
        budget: u64,
        alignment: u64,
        options: &Options,
        stats: &mut Stats,
    ) {
        trace!(
            "Processing {subgraph} with {} nodes",
            subgraphs.nodes(subgraph).len()
        );

        // Shrinking only changes sizes, so liveness only needs to be
        // recomputed when the subgraph itself changes.
        let mut intervals_valid = false;
        loop {
            if !intervals_valid {
                live_intervals.compute(graph, subgraphs.nodes(subgraph), |node| {
                    subgraphs.contains(subgraph, node)
                });
                intervals_valid = true;
            }

            subgraphs.memory_usage(subgraph, graph, alignment, &mut self.sizes);
            stat!(stats, allocation_attempts);
            let peak = match allocator.allocate(live_intervals, &self.sizes) {
                Ok(peak) => peak,
                Err(value) => {
                    log::error!(
                        "{subgraph}: no live interval for {}",
                        graph.value_name(value)
                    );
                    subgraphs.fail(
                        subgraph,
                        SubgraphStatus::Failed(AllocFailure::MissingLiveInterval(value)),
                    );
                    stat!(stats, failed_subgraphs);
                    return;
                }
            };
            trace!("{subgraph}: peak {peak} bytes, budget {budget} bytes");

            if peak < budget {
                subgraphs.finish(subgraph, allocator.entries(), peak);
                stat!(stats, allocated_subgraphs);
                stat!(stats, allocated_values, allocator.entries().len());
                if peak > stats.max_peak {
                    stats.max_peak = peak;
                }
                return;
            }

            let prev = subgraphs.prev_peak(subgraph);
            if prev != 0 && peak as f32 / prev as f32 > options.shrink_threshold {
                // Shrinking no longer pays off: undo it and split instead.
                trace!("{subgraph}: shrinking stalled ({prev} -> {peak}), splitting");
                subgraphs.reset_to_original_size(subgraph, graph);
                match subgraphs.split(subgraph, graph) {
                    Some(new) => {
                        stat!(stats, splits);
                        self.worklist.push(new);
                        intervals_valid = false;
                    }
                    None => {
                        log::error!(
                            "{subgraph}: cannot fit {peak} bytes into {budget} bytes and \
                             cannot be split further"
                        );
                        subgraphs.fail(
                            subgraph,
                            SubgraphStatus::Failed(AllocFailure::Unsplittable { peak }),
                        );
                        stat!(stats, failed_splits);
                        stat!(stats, failed_subgraphs);
                        return;
                    }
                }
            } else {
                subgraphs.set_prev_peak(subgraph, peak);
                subgraphs.shrink(subgraph, options.shrink_strategy);
                stat!(stats, shrinks);
            }
        }
    }
}
