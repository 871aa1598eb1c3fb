//! Opaque identifiers shared across the crate.
//!
//! Nodes, pins and transient-pool slots are all addressed by typed indices
//! into dense arrays owned by the graph rather than by pointer, so the graph
//! can be torn down and rebuilt every frame without reference-cycle or
//! use-after-free concerns. Node instances and pool slots use
//! [`slotmap`]-backed generational keys (the same crate and discipline the
//! engine already uses for its GL/Vulkan resource pools); pins are addressed
//! relative to their owning node and don't need their own generation since
//! they can't outlive it.

use std::fmt;

use fxhash::FxHasher64;
use std::hash::{Hash, Hasher};

slotmap::new_key_type! {
    /// Identifies one instantiated node in a [`crate::template::GraphTemplate`]
    /// / [`crate::graph::FrameGraph`].
    pub struct NodeIndex;
}

/// Stable identifier for a *node type*, used to look nodes up in the
/// [`crate::registry::NodeRegistry`]. Computed from a human-readable name so
/// that node authors never have to invent and track a numeric id by hand.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeTypeId(pub(crate) u64);

impl NodeTypeId {
    pub fn from_name(name: &str) -> Self {
        let mut hasher = FxHasher64::default();
        name.hash(&mut hasher);
        NodeTypeId(hasher.finish())
    }
}

impl fmt::Debug for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeTypeId({:#018x})", self.0)
    }
}

/// Index of a pin within the fixed pin table of a node *type*. Stable across
/// instances of the same node type, assigned in registration order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PinSlot(pub u16);

impl fmt::Debug for PinSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses one pin instance: a specific slot on a specific node instance.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PinId {
    pub node: NodeIndex,
    pub slot: PinSlot,
}

impl fmt::Debug for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{:?}", self.node, self.slot)
    }
}

impl PinId {
    pub fn new(node: NodeIndex, slot: PinSlot) -> Self {
        PinId { node, slot }
    }
}

slotmap::new_key_type! {
    /// A slot in the image transient pool ([`crate::pool::ImagePool`]).
    pub struct ImageAliasKey;
    /// A slot in the buffer transient pool ([`crate::pool::BufferPool`]).
    pub struct BufferAliasKey;
    /// A checked-out range of the staging ring ([`crate::staging::StagingUploader`]).
    pub struct StagingHandle;
}

/// Hash of a stable resource's `(debug label, descriptor)` pair, used as the
/// key into the persistent table so a resource keeps the same backing object
/// across frames as long as neither its label nor its descriptor changes.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct StableKey(pub(crate) u64);

impl fmt::Debug for StableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StableKey({:#018x})", self.0)
    }
}
