//! Build Context (C5).
//!
//! The façade passed to every node's `build` callback, called once per frame
//! in topological order. `build` declares what a node needs — new transient
//! resources, reads/writes against resources it was handed, data outputs,
//! sink contributions, uploads — without touching the device directly; the
//! declarations are recorded into an [`AccessLog`] that the transient pool
//! (C6) and barrier tracker (C7) consume afterwards: a handful of verbs
//! (`access`, `create_image`, `begin_pass`, `push`) backed by a "record now,
//! resolve later" split between declaring a dependency and actually
//! allocating or binding a resource.

use fxhash::FxHashMap;

use crate::error::BuildError;
use crate::ids::PinId;
use crate::ids::NodeIndex;
use crate::pin::{DataPin, PinStorage, ResourcePin, ResourceSlot};
use crate::resource::{BufferAccess, BufferResourceInitializer, ImageAccess, ImageResourceInitializer, PassKind};

/// One declared operation against an image pin, in the order `build()` calls
/// were made across the whole frame.
#[derive(Clone, Debug)]
pub enum ImageOp {
    Create { pin: PinId, init: ImageResourceInitializer },
    /// Binds a resident (externally-owned) image directly, bypassing the
    /// transient pool.
    Acquire { pin: PinId, handle: crate::device::ImageHandle },
    Access { pin: PinId, source: PinId, access: ImageAccess, pass: PassKind },
}

impl ImageOp {
    pub fn pin(&self) -> PinId {
        match self {
            ImageOp::Create { pin, .. } => *pin,
            ImageOp::Acquire { pin, .. } => *pin,
            ImageOp::Access { pin, .. } => *pin,
        }
    }
}

/// One declared operation against a buffer pin.
#[derive(Clone, Debug)]
pub enum BufferOp {
    Create { pin: PinId, init: BufferResourceInitializer },
    Access { pin: PinId, source: PinId, access: BufferAccess, pass: PassKind },
    Upload { pin: PinId, data: Vec<u8> },
}

impl BufferOp {
    pub fn pin(&self) -> PinId {
        match self {
            BufferOp::Create { pin, .. } => *pin,
            BufferOp::Access { pin, .. } => *pin,
            BufferOp::Upload { pin, .. } => *pin,
        }
    }
}

/// Every resource declaration made across one frame's `build()` pass, in
/// call order. Consumed by [`crate::pool`] to materialize resources and by
/// [`crate::barrier`] to compute the barrier schedule.
#[derive(Default)]
pub struct AccessLog {
    pub image_ops: Vec<ImageOp>,
    pub buffer_ops: Vec<BufferOp>,
    /// The pass kind each node declared via `begin_pass`, in planner order.
    pub pass_kinds: FxHashMap<NodeIndex, PassKind>,
}

impl AccessLog {
    pub fn clear(&mut self) {
        self.image_ops.clear();
        self.buffer_ops.clear();
        self.pass_kinds.clear();
    }
}

/// The façade a node's `build` callback runs against.
pub struct BuildContext<'a> {
    node: NodeIndex,
    pass_kind: PassKind,
    storage: &'a mut PinStorage,
    /// Maps a connected input pin to the output pin it's wired from; `None`
    /// for pins the planner hasn't told us about (e.g. this node's own
    /// outputs), in which case accessors operate on the pin itself.
    source_of: &'a FxHashMap<PinId, PinId>,
    log: &'a mut AccessLog,
    errors: &'a mut Vec<BuildError>,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        node: NodeIndex,
        storage: &'a mut PinStorage,
        source_of: &'a FxHashMap<PinId, PinId>,
        log: &'a mut AccessLog,
        errors: &'a mut Vec<BuildError>,
    ) -> Self {
        BuildContext { node, pass_kind: PassKind::default(), storage, source_of, log, errors }
    }

    pub fn node(&self) -> NodeIndex {
        self.node
    }

    fn resolve(&self, local: PinId) -> PinId {
        self.source_of.get(&local).copied().unwrap_or(local)
    }

    fn local(&self, slot: crate::ids::PinSlot) -> PinId {
        PinId::new(self.node, slot)
    }

    /// Declares this node's GPU pass kind, determining the default pipeline
    /// stage for any barriers inserted around it.
    pub fn begin_pass(&mut self, kind: PassKind) {
        self.pass_kind = kind;
        self.log.pass_kinds.insert(self.node, kind);
    }

    /// Marks this node as doing no GPU work of its own (pure data
    /// bookkeeping, e.g. a provider node). Equivalent to `begin_pass(None)`.
    pub fn empty_pass(&mut self) {
        self.begin_pass(PassKind::None);
    }

    /// Reads an input data pin, following the connection to its producer.
    /// Fails with [`BuildError::ResourceWithoutProducer`] if the producing
    /// node's `build` hasn't run yet or never wrote it this frame (the same
    /// guard `access_image`/`access_buffer` apply, kept here too rather than
    /// letting the underlying storage assert panic on a conditional
    /// producer).
    pub fn access<T: 'static>(&mut self, pin: DataPin<T>) -> Result<&T, BuildError> {
        let source = self.resolve(self.local(pin.slot));
        if !self.storage.is_written(source) {
            let id = self.local(pin.slot);
            let err = BuildError::ResourceWithoutProducer { pin: id };
            self.errors.push(err.clone());
            return Err(err);
        }
        Ok(self.storage.read::<T>(source))
    }

    /// Writes this node's own output data pin.
    pub fn set_data<T: 'static>(&mut self, pin: DataPin<T>, value: T) {
        let id = self.local(pin.slot);
        self.storage.write(id, value);
    }

    /// Writes this node's own output pin feeding a downstream sink. Plain
    /// alias of [`Self::set_data`] kept distinct for readability at call
    /// sites — the many-to-one fan-in itself happens in the graph's
    /// post-build propagation step, not here.
    pub fn push<T: 'static>(&mut self, pin: DataPin<T>, value: T) {
        self.set_data(pin, value);
    }

    /// Declares a new transient (or stable, per `init.is_stable`) image
    /// bound to this node's output resource pin.
    pub fn create_image(&mut self, pin: ResourcePin, init: ImageResourceInitializer) {
        let id = self.local(pin.slot);
        if self.storage.is_written(id) {
            self.errors.push(BuildError::ResourceProducedTwice { pin: id });
            return;
        }
        self.storage.write(id, ResourceSlot::Unbound);
        self.log.image_ops.push(ImageOp::Create { pin: id, init });
    }

    /// Binds a resident image (owned outside this frame) directly to this
    /// node's output resource pin, bypassing the transient pool.
    pub fn acquire_image(&mut self, pin: ResourcePin, handle: crate::device::ImageHandle) {
        let id = self.local(pin.slot);
        self.storage.write(id, ResourceSlot::Unbound);
        self.log.image_ops.push(ImageOp::Acquire { pin: id, handle });
    }

    /// Declares an access against an image this node received on an input
    /// resource pin. Fails with [`BuildError::ResourceWithoutProducer`] if
    /// the producing node's `build` never created or acquired it this frame
    /// (legal when a producer's body is conditional).
    pub fn access_image(&mut self, pin: ResourcePin, access: ImageAccess) -> Result<(), BuildError> {
        let id = self.local(pin.slot);
        let source = self.resolve(id);
        if !self.storage.is_written(source) {
            let err = BuildError::ResourceWithoutProducer { pin: id };
            self.errors.push(err.clone());
            return Err(err);
        }
        self.log.image_ops.push(ImageOp::Access { pin: id, source, access, pass: self.pass_kind });
        Ok(())
    }

    pub fn read_only_image(&mut self, pin: ResourcePin) -> Result<(), BuildError> {
        self.access_image(pin, ImageAccess::ShaderRead)
    }

    pub fn read_write_image(&mut self, pin: ResourcePin, access: ImageAccess) -> Result<(), BuildError> {
        debug_assert!(access.is_write(), "read_write_image called with a read-only access");
        self.access_image(pin, access)
    }

    pub fn create_buffer(&mut self, pin: ResourcePin, init: BufferResourceInitializer) {
        let id = self.local(pin.slot);
        if self.storage.is_written(id) {
            self.errors.push(BuildError::ResourceProducedTwice { pin: id });
            return;
        }
        self.storage.write(id, ResourceSlot::Unbound);
        self.log.buffer_ops.push(BufferOp::Create { pin: id, init });
    }

    pub fn access_buffer(&mut self, pin: ResourcePin, access: BufferAccess) -> Result<(), BuildError> {
        let id = self.local(pin.slot);
        let source = self.resolve(id);
        if !self.storage.is_written(source) {
            let err = BuildError::ResourceWithoutProducer { pin: id };
            self.errors.push(err.clone());
            return Err(err);
        }
        self.log.buffer_ops.push(BufferOp::Access { pin: id, source, access, pass: self.pass_kind });
        Ok(())
    }

    /// Queues host data to be staged into a buffer this node created earlier
    /// in the same `build` call.
    pub fn upload(&mut self, pin: ResourcePin, data: Vec<u8>) {
        let id = self.local(pin.slot);
        self.log.buffer_ops.push(BufferOp::Upload { pin: id, data });
    }
}
