//! Internal implementation details of the allocator that are not part of the
//! public API.

pub(crate) mod conflicts;
pub(crate) mod controller;
pub(crate) mod schedule;
pub(crate) mod subgraph;

// Publicly exposed only for fuzzing.
#[allow(missing_docs)]
pub mod interval_allocator;
#[allow(missing_docs)]
pub mod live_interval;
