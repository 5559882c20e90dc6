//! Generic implementation of a [`Target`] which can be used for testing the
//! memory allocator.

use crate::graph::ElemType;
use crate::target::Target;

/// A simple [`Target`] with a configurable local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenericTarget {
    /// Size of the local memory in bytes, if the target has one.
    pub budget: Option<u64>,

    /// Alignment of every allocation in bytes.
    pub alignment: u64,

    /// Whether 64-bit integer tensors are supported. All other element types
    /// are always supported.
    pub supports_i64: bool,
}

impl GenericTarget {
    /// Creates a target with `budget` bytes of local memory and no alignment
    /// requirements.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget: Some(budget),
            alignment: 1,
            supports_i64: true,
        }
    }

    /// Sets the alignment of allocations.
    #[must_use]
    pub fn with_alignment(self, alignment: u64) -> Self {
        Self { alignment, ..self }
    }
}

impl Target for GenericTarget {
    #[inline]
    fn local_memory_budget(&self) -> Option<u64> {
        self.budget
    }

    #[inline]
    fn is_native_tensor_type(&self, ty: ElemType) -> bool {
        ty != ElemType::I64 || self.supports_i64
    }

    #[inline]
    fn local_memory_alignment(&self) -> u64 {
        self.alignment
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for GenericTarget {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self {
            budget: Some(u.int_in_range(1..=1 << 20)?),
            alignment: 1 << u.int_in_range(0u32..=6)?,
            supports_i64: u.arbitrary()?,
        })
    }
}
