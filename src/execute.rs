//! Execute Context (C8).
//!
//! The façade passed to every node's `execute` callback, called once per
//! frame in the same topological order as `build`, after the transient pool
//! has materialized resources and the barrier tracker has emitted the
//! barriers each node's accesses require. `execute` only records commands —
//! it never allocates or declares a new dependency; any attempt to do so
//! isn't even possible through this type's API (it has no `create_*`).

use fxhash::FxHashMap;

use crate::device::{BindingKey, BufferHandle, Command, CommandRecorder, ImageHandle, PipelineCache, PipelineHandle};
use crate::error::ExecuteError;
use crate::ids::{NodeIndex, PinId};
use crate::pin::{DataPin, PinStorage, ResourcePin, SinkPin};

pub struct ExecuteContext<'a> {
    node: NodeIndex,
    storage: &'a PinStorage,
    source_of: &'a FxHashMap<PinId, PinId>,
    resolved_images: &'a FxHashMap<PinId, ImageHandle>,
    resolved_buffers: &'a FxHashMap<PinId, BufferHandle>,
    pipeline_cache: &'a dyn PipelineCache,
    recorder: &'a mut CommandRecorder,
    pipeline_bound: bool,
}

impl<'a> ExecuteContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: NodeIndex,
        storage: &'a PinStorage,
        source_of: &'a FxHashMap<PinId, PinId>,
        resolved_images: &'a FxHashMap<PinId, ImageHandle>,
        resolved_buffers: &'a FxHashMap<PinId, BufferHandle>,
        pipeline_cache: &'a dyn PipelineCache,
        recorder: &'a mut CommandRecorder,
    ) -> Self {
        ExecuteContext {
            node,
            storage,
            source_of,
            resolved_images,
            resolved_buffers,
            pipeline_cache,
            recorder,
            pipeline_bound: false,
        }
    }

    fn local(&self, slot: crate::ids::PinSlot) -> PinId {
        PinId::new(self.node, slot)
    }

    fn resolve(&self, local: PinId) -> PinId {
        self.source_of.get(&local).copied().unwrap_or(local)
    }

    pub fn access<T: 'static>(&self, pin: DataPin<T>) -> &T {
        let source = self.resolve(self.local(pin.slot));
        self.storage.read::<T>(source)
    }

    pub fn sink_values<T: 'static>(&self, pin: SinkPin<T>) -> &[T] {
        self.storage.sink_values::<T>(self.local(pin.slot))
    }

    pub fn image(&self, pin: ResourcePin) -> ImageHandle {
        let source = self.resolve(self.local(pin.slot));
        *self.resolved_images.get(&source).unwrap_or_else(|| panic!("pin {source:?} has no resolved image"))
    }

    pub fn buffer(&self, pin: ResourcePin) -> BufferHandle {
        let source = self.resolve(self.local(pin.slot));
        *self.resolved_buffers.get(&source).unwrap_or_else(|| panic!("pin {source:?} has no resolved buffer"))
    }

    pub fn pipeline_for(&self, shader_ids: &[u64], state_hash: u64) -> Option<PipelineHandle> {
        self.pipeline_cache.pipeline_for(shader_ids, state_hash)
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipeline_bound = true;
        self.recorder.push(Command::BindPipeline(pipeline));
    }

    pub fn bind_resource(&mut self, key: BindingKey, image: Option<ImageHandle>, buffer: Option<BufferHandle>) {
        self.recorder.push(Command::BindResource { key, buffer, image });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), ExecuteError> {
        self.require_pipeline()?;
        self.recorder.push(Command::Dispatch { x, y, z });
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<(), ExecuteError> {
        self.require_pipeline()?;
        self.recorder.push(Command::Draw { vertex_count, instance_count });
        Ok(())
    }

    pub fn trace_rays(&mut self, width: u32, height: u32, depth: u32) -> Result<(), ExecuteError> {
        self.require_pipeline()?;
        self.recorder.push(Command::TraceRays { width, height, depth });
        Ok(())
    }

    pub fn copy_buffer_to_buffer(&mut self, src: BufferHandle, src_offset: u64, dst: BufferHandle, dst_offset: u64, size: u64) {
        self.recorder.push(Command::CopyBufferToBuffer { src, src_offset, dst, dst_offset, size });
    }

    pub fn copy_buffer_to_image(&mut self, src: BufferHandle, src_offset: u64, dst: ImageHandle) {
        self.recorder.push(Command::CopyBufferToImage { src, src_offset, dst });
    }

    /// A missing pipeline is node misuse, not a graph defect: the command is
    /// skipped and logged rather than propagated as a frame-fatal error.
    fn require_pipeline(&self) -> Result<(), ExecuteError> {
        if self.pipeline_bound {
            Ok(())
        } else {
            let err = ExecuteError::MissingPipeline { node: self.node };
            log::warn!("{err}, skipping command");
            Err(err)
        }
    }
}
