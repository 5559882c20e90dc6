//! The [`Target`] trait which describes the local memory of the hardware.
//!
//! The allocator only needs a small amount of information from the backend:
//! the capacity of the hardware-local scratch memory that tensors are placed
//! in, and the alignment that addresses in that memory must respect.
//!
//! [`Target::is_native_tensor_type`] is not used by the allocator itself but
//! is checked by [`validate_graph`] since a tensor of a type the hardware
//! cannot operate on should never reach memory allocation.
//!
//! [`validate_graph`]: crate::debug_utils::validate_graph

use crate::graph::ElemType;

/// Trait for describing the memory of the target hardware.
pub trait Target {
    /// Size in bytes of the hardware-local memory available for tensors.
    ///
    /// Returning `None` (or a budget of 0) makes memory allocation fail
    /// immediately since no subgraph could ever fit.
    fn local_memory_budget(&self) -> Option<u64>;

    /// Whether the hardware can natively operate on tensors of this type.
    fn is_native_tensor_type(&self, ty: ElemType) -> bool;

    /// Alignment in bytes of every allocation in local memory.
    ///
    /// This must be a power of 2.
    #[inline]
    fn local_memory_alignment(&self) -> u64 {
        1
    }
}
