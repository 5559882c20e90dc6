//! The [`Graph`] trait which describes the input compute graph.
//!
//! # Nodes and values
//!
//! The allocator operates on a dataflow graph whose operators have already
//! been lowered to the target. Each [`Node`] is opaque to the allocator: it
//! only interacts with memory allocation through the [`Value`]s that it reads
//! ([`Graph::node_inputs`]) and writes ([`Graph::node_outputs`]).
//!
//! A [`Value`] is a single tensor. It is either produced by exactly one node,
//! or it is a graph input with no defining node. Its storage requirement is
//! derived from its element type and its shape, which must already be fully
//! determined (i.e. output shape inference has run before allocation).
//!
//! # Resident values
//!
//! Some values already have storage provided by the backend, for example
//! weights that stay in global memory and are streamed directly by the
//! hardware. These are marked as *resident* with
//! [`Graph::value_is_resident`] and are never assigned local memory.
//!
//! # Graph outputs
//!
//! Values marked with [`Graph::value_is_output`] must be written back once
//! computed. Inside a subgraph they stay live until the end of that
//! subgraph's schedule.
//!
//! Nodes do not need to be in any particular order: the allocator computes a
//! topological order itself. However the graph must be acyclic and every
//! value must be defined at most once.

use core::fmt;

use cranelift_entity::{Keys, entity_impl};

/// Maximum number of nodes.
pub const MAX_NODES: usize = 1 << 28;

/// Maximum number of values.
pub const MAX_VALUES: usize = 1 << 28;

/// Maximum number of dimensions in a value shape.
pub const MAX_RANK: usize = 8;

/// Maximum size in bytes of a single value.
pub const MAX_VALUE_BYTES: u64 = 1 << 48;

/// An operator in the input graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node(u32);
entity_impl!(Node, "node");

/// A tensor in the input graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Value(u32);
entity_impl!(Value, "%");

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum ElemType {
    /// 32-bit IEEE float.
    F32,
    /// 16-bit IEEE float.
    F16,
    /// 16-bit brain float.
    BF16,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Boolean, stored as one byte.
    Bool,
}

impl ElemType {
    /// All element types, in declaration order.
    pub const ALL: [ElemType; 9] = [
        ElemType::F32,
        ElemType::F16,
        ElemType::BF16,
        ElemType::I8,
        ElemType::U8,
        ElemType::I16,
        ElemType::I32,
        ElemType::I64,
        ElemType::Bool,
    ];

    /// Size of a single element in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            ElemType::I8 | ElemType::U8 | ElemType::Bool => 1,
            ElemType::F16 | ElemType::BF16 | ElemType::I16 => 2,
            ElemType::F32 | ElemType::I32 => 4,
            ElemType::I64 => 8,
        }
    }

    /// Name used in the text representation of a graph.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ElemType::F32 => "f32",
            ElemType::F16 => "f16",
            ElemType::BF16 => "bf16",
            ElemType::I8 => "i8",
            ElemType::U8 => "u8",
            ElemType::I16 => "i16",
            ElemType::I32 => "i32",
            ElemType::I64 => "i64",
            ElemType::Bool => "bool",
        }
    }

    /// Inverse of [`ElemType::name`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the number of bytes needed by a tensor with the given shape and
/// element type, or `None` on overflow.
#[must_use]
pub fn tensor_bytes(shape: &[u64], ty: ElemType) -> Option<u64> {
    shape
        .iter()
        .try_fold(ty.bytes(), |acc, &dim| acc.checked_mul(dim))
}

/// Trait for describing the compute graph to allocate.
///
/// See the module-level documentation for the requirements on the graph.
pub trait Graph {
    /// Number of nodes in the graph.
    fn num_nodes(&self) -> usize;

    /// Iterator over all the [`Node`]s in the graph.
    #[inline]
    fn nodes(&self) -> Keys<Node> {
        Keys::with_len(self.num_nodes())
    }

    /// Name of the operator implemented by a node.
    ///
    /// This is only used for debugging output.
    fn node_kind(&self, node: Node) -> &str;

    /// Values read by a node.
    fn node_inputs(&self, node: Node) -> &[Value];

    /// Values written by a node.
    fn node_outputs(&self, node: Node) -> &[Value];

    /// Number of values in the graph.
    fn num_values(&self) -> usize;

    /// Iterator over all the [`Value`]s in the graph.
    #[inline]
    fn values(&self) -> Keys<Value> {
        Keys::with_len(self.num_values())
    }

    /// Human-readable name of a value, used in allocation dumps.
    fn value_name(&self, value: Value) -> &str;

    /// Element type of a value.
    fn value_type(&self, value: Value) -> ElemType;

    /// Shape of a value. Every dimension must be non-zero.
    fn value_shape(&self, value: Value) -> &[u64];

    /// The node defining this value, or `None` for graph inputs.
    fn value_def(&self, value: Value) -> Option<Node>;

    /// Nodes which read this value. Each node must only appear once.
    fn value_users(&self, value: Value) -> &[Node];

    /// Whether the storage for this value is provided by the backend.
    ///
    /// Resident values are never allocated in local memory.
    fn value_is_resident(&self, value: Value) -> bool;

    /// Whether this value is an output of the whole graph.
    fn value_is_output(&self, value: Value) -> bool;

    /// Number of bytes needed to hold the whole value.
    #[inline]
    fn value_size(&self, value: Value) -> u64 {
        tensor_bytes(self.value_shape(value), self.value_type(value)).unwrap_or(u64::MAX)
    }
}
