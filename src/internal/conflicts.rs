//! Lookup of the memory regions that a new allocation must avoid.

use alloc::vec::Vec;

use crate::output::{AllocEntry, LiveInterval, MemRegion};

/// Collects into `out` the regions of all `entries` whose live interval
/// overlaps `interval`, sorted by start address.
///
/// The sort is stable so that regions with the same start address keep the
/// order in which they were allocated, which keeps allocation deterministic.
pub fn find_conflicts(entries: &[AllocEntry], interval: &LiveInterval, out: &mut Vec<MemRegion>) {
    out.clear();
    out.extend(
        entries
            .iter()
            .filter(|entry| entry.interval.intersects(interval))
            .map(|entry| entry.region),
    );
    out.sort_by_key(|region| region.start);
}
