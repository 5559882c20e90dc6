//! Utility functions and types for debugging memory allocation.
//!
//! These are not needed for normal compilation, but are useful during
//! development of both the memory allocator itself and users of the memory
//! allocator.

mod checker;
mod display;
mod generic_graph;
mod generic_target;
mod validate_graph;

pub use checker::*;
pub use display::*;
pub use generic_graph::*;
pub use generic_target::*;
pub use validate_graph::*;
