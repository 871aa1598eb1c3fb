//! Node Registry (C1).
//!
//! Maps a stable node identifier to a type-erased constructor, pin layout,
//! and the three lifecycle callbacks. Registration is a one-time, explicit
//! step — no `inventory`/linker-section magic, matching this codebase's
//! general avoidance of global state (see `DESIGN.md`).

use fxhash::FxHashMap;

use crate::build::BuildContext;
use crate::error::RegistryError;
use crate::execute::ExecuteContext;
use crate::init::InitContext;
use crate::pin::PinDescriptor;

pub use crate::ids::NodeTypeId;

/// A node's state, stored type-erased behind `Any` so the registry can hold
/// arbitrarily different node types in one table. The `construct` callback
/// produces a freshly-boxed value for each instantiation; `init` then gets a
/// chance to configure it once before the graph ever calls `build`.
pub type ConstructFn = fn() -> Box<dyn std::any::Any>;
pub type InitFn = fn(&mut dyn std::any::Any, &InitContext<'_>);
pub type BuildFn = fn(&mut dyn std::any::Any, &mut BuildContext<'_>);
pub type ExecuteFn = fn(&dyn std::any::Any, &mut ExecuteContext<'_>);

/// Everything the registry needs to know about a node type.
pub struct NodeDescriptor {
    pub name: &'static str,
    pub pins: Vec<PinDescriptor>,
    pub construct: ConstructFn,
    pub init: InitFn,
    pub build: BuildFn,
    pub execute: ExecuteFn,
}

impl NodeDescriptor {
    pub fn pin_slot(&self, name: &str) -> Option<crate::ids::PinSlot> {
        self.pins.iter().position(|p| p.name == name).map(|i| crate::ids::PinSlot(i as u16))
    }
}

/// Type-erased registry of node types, keyed by [`NodeTypeId`].
#[derive(Default)]
pub struct NodeRegistry {
    nodes: FxHashMap<NodeTypeId, NodeDescriptor>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Registers a node type under `stable_id`. Fails if that id is already
    /// bound — registration is not an upsert.
    pub fn register(&mut self, stable_id: NodeTypeId, descriptor: NodeDescriptor) -> Result<(), RegistryError> {
        if self.nodes.contains_key(&stable_id) {
            return Err(RegistryError { id: stable_id });
        }
        self.nodes.insert(stable_id, descriptor);
        Ok(())
    }

    pub fn find(&self, stable_id: NodeTypeId) -> Option<&NodeDescriptor> {
        self.nodes.get(&stable_id)
    }
}
