//! Assignment of local memory addresses to values based on their liveness.
//!
//! This is a greedy first-fit allocator: values are placed one at a time, in
//! the order of their live interval's start position, at the lowest address
//! that does not overlap any already-placed value whose live interval
//! overlaps its own. Values whose lifetimes are disjoint can therefore share
//! the same bytes.

use alloc::vec::Vec;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::conflicts::find_conflicts;
use super::live_interval::LiveIntervals;
use crate::graph::Value;
use crate::output::{AllocEntry, MemRegion};

/// Number of bytes required by each value that needs local memory.
///
/// Values missing from the map are not allocated.
pub type ValueSizeMap = HashMap<Value, u64, FxBuildHasher>;

pub struct IntervalAllocator {
    /// Allocations made by the last call to `allocate`.
    entries: Vec<AllocEntry>,

    /// Scratch space for regions conflicting with the value being placed.
    conflicts: Vec<MemRegion>,
}

impl IntervalAllocator {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Allocations made by the last successful call to `allocate`.
    pub fn entries(&self) -> &[AllocEntry] {
        &self.entries
    }

    /// Assigns an address to every value in `sizes` and returns the peak
    /// memory usage, i.e. the highest end address of any allocation.
    ///
    /// Values are placed in the order in which `intervals` yields them. Any
    /// allocations from a previous call are discarded.
    ///
    /// Fails with the offending value if a value in `sizes` has no live
    /// interval.
    pub fn allocate(&mut self, intervals: &LiveIntervals, sizes: &ValueSizeMap) -> Result<u64, Value> {
        self.entries.clear();

        if let Some(value) = sizes
            .keys()
            .copied()
            .filter(|&value| intervals.get(value).is_none())
            .min()
        {
            return Err(value);
        }

        let mut peak = 0;
        for interval in intervals {
            let Some(&size) = sizes.get(&interval.value) else {
                continue;
            };
            debug_assert_ne!(size, 0);

            find_conflicts(&self.entries, interval, &mut self.conflicts);

            // Conflicts are sorted by start address. Regions entirely below
            // the candidate can be skipped, and once a region starts at or
            // after the end of the candidate no later region can overlap it.
            let mut start = 0;
            for &region in &self.conflicts {
                let candidate = MemRegion::new(start, size);
                if region.conflicts(candidate) {
                    start = region.end();
                } else if region.start >= candidate.end() {
                    break;
                }
            }

            let region = MemRegion::new(start, size);
            trace!("Allocated {} at {region} live {interval}", interval.value);
            self.entries.push(AllocEntry {
                region,
                interval: *interval,
            });
            peak = peak.max(region.end());
        }

        Ok(peak)
    }
}
