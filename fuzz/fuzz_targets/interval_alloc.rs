//! Checks that `IntervalAllocator` never places values with overlapping live
//! intervals in overlapping memory.

#![no_main]

use arbitrary::{Arbitrary, Result, Unstructured};
use libfuzzer_sys::fuzz_target;
use tensoralloc::graph::Value;
use tensoralloc::interval_allocator::{IntervalAllocator, ValueSizeMap};
use tensoralloc::live_interval::LiveIntervals;
use tensoralloc::output::LiveInterval;

#[derive(Debug)]
struct Input {
    /// Size and live interval of each value, sorted by interval start.
    values: Vec<(u64, LiveInterval)>,
}

impl<'a> Arbitrary<'a> for Input {
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
        let mut values = vec![];
        for i in 0..u.int_in_range(0..=64)? {
            let start = u.int_in_range(0..=100)?;
            let end = start + u.int_in_range(0..=20)?;
            let size = u.int_in_range(1..=4096)?;
            values.push((size, LiveInterval::new(Value::from_u32(i), start, end)));
        }
        values.sort_by_key(|(_, interval)| interval.start);
        Ok(Self { values })
    }
}

fuzz_target!(|input: Input| {
    let mut intervals = LiveIntervals::new();
    intervals.set(input.values.iter().map(|&(_, interval)| interval));
    let sizes: ValueSizeMap = input
        .values
        .iter()
        .map(|&(size, interval)| (interval.value, size))
        .collect();

    let mut allocator = IntervalAllocator::new();
    let peak = allocator.allocate(&intervals, &sizes).unwrap();
    let entries = allocator.entries();
    assert_eq!(entries.len(), input.values.len());
    assert_eq!(
        peak,
        entries.iter().map(|e| e.region.end()).max().unwrap_or(0)
    );
    for (i, a) in entries.iter().enumerate() {
        assert_eq!(a.region.size, sizes[&a.value()]);
        for b in &entries[i + 1..] {
            if a.interval.intersects(&b.interval) {
                assert!(!a.region.conflicts(b.region), "{a:?} overlaps {b:?}");
            }
        }
    }
});
