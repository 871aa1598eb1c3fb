//! GPU device boundary (C10 — ambient).
//!
//! The narrow abstraction the graph consumes instead of linking against a
//! concrete Vulkan wrapper. The "low-level Vulkan wrapper" (device, queue,
//! swapchain, allocator) lives one layer below this trait and is out of
//! scope for this crate; this module only declares what the graph needs
//! from it, plus an in-memory `mock` implementation the test suite runs
//! against.

use fxhash::FxHashMap;

use crate::barrier::BarrierBatch;
use crate::error::DeviceError;
use crate::ids::NodeIndex;
use crate::resource::PassKind;
use crate::types::{Extent2D, Format};

slotmap::new_key_type! {
    pub struct BufferHandle;
    pub struct ImageHandle;
    pub struct PipelineHandle;
    pub struct SubmitToken;
}

/// The device-level, fully-resolved counterpart of
/// [`crate::resource::BufferResourceInitializer`]: exact size and the final
/// usage union computed once every access in the frame has been declared.
#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: crate::resource::BufferUsage,
    pub debug_label: String,
}

/// The device-level, fully-resolved counterpart of
/// [`crate::resource::ImageResourceInitializer`].
#[derive(Clone, Debug)]
pub struct ImageDesc {
    pub extent: Extent2D,
    pub format: Format,
    pub usage: crate::resource::ImageUsage,
    pub debug_label: String,
}

/// A mapped range of a staging ring the host can memcpy into.
pub struct StagingMapping {
    pub ptr: *mut u8,
    pub len: usize,
}

/// A per-shader-key lookup into bound resources, the "binding table" of
/// §4.8: a flat association from shader-visible string-hash keys to GPU
/// handles, parameterizing one pass's dispatch.
pub type BindingKey = u64;

/// One recorded GPU operation. A `CommandRecorder` is a flat ordered log of
/// these; it plays the role of a `VkCommandBuffer` without committing this
/// crate to any particular backend. Barriers are recorded directly into the
/// stream at the seam the Barrier Tracker computed for them (§4.7 "emitted
/// just before the consuming node's command recording begins").
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Command {
    Barrier(BarrierBatch),
    BeginPass { node: NodeIndex, kind: PassKind },
    EndPass { node: NodeIndex },
    BindPipeline(PipelineHandle),
    BindResource { key: BindingKey, buffer: Option<BufferHandle>, image: Option<ImageHandle> },
    Dispatch { x: u32, y: u32, z: u32 },
    Draw { vertex_count: u32, instance_count: u32 },
    TraceRays { width: u32, height: u32, depth: u32 },
    CopyBufferToBuffer { src: BufferHandle, src_offset: u64, dst: BufferHandle, dst_offset: u64, size: u64 },
    CopyBufferToImage { src: BufferHandle, src_offset: u64, dst: ImageHandle },
}

/// An ordered log of [`Command`]s recorded for one frame, submitted as a
/// unit. Stands in for a `VkCommandBuffer`.
#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct CommandRecorder {
    pub commands: Vec<Command>,
}

impl CommandRecorder {
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}

/// The narrow device surface the frame graph consumes. A real implementation
/// wraps `ash`; the `mock` module below is an in-memory fake used by tests
/// and by the `demos/triangle` example.
pub trait GpuDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError>;
    fn destroy_buffer(&self, handle: BufferHandle);
    fn create_image(&self, desc: &ImageDesc) -> Result<ImageHandle, DeviceError>;
    fn destroy_image(&self, handle: ImageHandle);
    /// Writes `data` directly into a host-visible buffer. Real devices only
    /// permit this for buffers in a host-visible memory type; the mock
    /// device permits it unconditionally since it has no real memory types.
    fn write_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]);
    fn read_buffer(&self, handle: BufferHandle, offset: u64, len: usize) -> Vec<u8>;
    fn submit(&self, recorder: CommandRecorder) -> Result<SubmitToken, DeviceError>;
    /// Blocks until `token`'s submission has completed. The only blocking
    /// point the frame graph itself calls into (§5): waiting on the previous
    /// frame's fence before reusing staging rings and transient pools.
    fn wait(&self, token: SubmitToken);
}

/// Returns opaque pipeline objects from `(shader_ids, pipeline_state)`,
/// mirroring `oblo::vk::pass_manager`. Shader compilation/caching itself is
/// out of scope; this crate only consumes the result.
pub trait PipelineCache {
    fn pipeline_for(&self, shader_ids: &[u64], state_hash: u64) -> Option<PipelineHandle>;
}

/// Supplies "resident textures" — images owned by the asset/resource
/// registry collaborator, not allocated by this frame's transient pool —
/// that nodes may bind by handle.
pub trait ResidentTextures {
    fn resolve(&self, key: u64) -> Option<ImageHandle>;
}

/// In-memory fakes of the three traits above, used by the test suite so it
/// never has to talk to a real driver.
pub mod mock {
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    struct Buffer {
        bytes: Vec<u8>,
    }

    #[derive(Default)]
    pub struct MockDevice {
        buffers: RefCell<slotmap::SlotMap<BufferHandle, Buffer>>,
        images: RefCell<slotmap::SlotMap<ImageHandle, ImageDesc>>,
        next_token: AtomicU64,
        /// Every submitted command stream, for assertions in tests.
        pub submitted: RefCell<Vec<CommandRecorder>>,
    }

    impl MockDevice {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn image_desc(&self, handle: ImageHandle) -> ImageDesc {
            self.images.borrow().get(handle).cloned().expect("unknown image handle")
        }

        pub fn live_buffer_count(&self) -> usize {
            self.buffers.borrow().len()
        }

        pub fn live_image_count(&self) -> usize {
            self.images.borrow().len()
        }
    }

    impl GpuDevice for MockDevice {
        fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
            Ok(self.buffers.borrow_mut().insert(Buffer { bytes: vec![0u8; desc.size as usize] }))
        }

        fn destroy_buffer(&self, handle: BufferHandle) {
            self.buffers.borrow_mut().remove(handle);
        }

        fn create_image(&self, desc: &ImageDesc) -> Result<ImageHandle, DeviceError> {
            Ok(self.images.borrow_mut().insert(desc.clone()))
        }

        fn destroy_image(&self, handle: ImageHandle) {
            self.images.borrow_mut().remove(handle);
        }

        fn write_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]) {
            let mut buffers = self.buffers.borrow_mut();
            let buffer = buffers.get_mut(handle).expect("unknown buffer handle");
            let start = offset as usize;
            let end = start + data.len();
            if end > buffer.bytes.len() {
                buffer.bytes.resize(end, 0);
            }
            buffer.bytes[start..end].copy_from_slice(data);
        }

        fn read_buffer(&self, handle: BufferHandle, offset: u64, len: usize) -> Vec<u8> {
            let buffers = self.buffers.borrow();
            let buffer = buffers.get(handle).expect("unknown buffer handle");
            let start = offset as usize;
            buffer.bytes[start..start + len].to_vec()
        }

        fn submit(&self, recorder: CommandRecorder) -> Result<SubmitToken, DeviceError> {
            self.submitted.borrow_mut().push(recorder);
            let raw = self.next_token.fetch_add(1, Ordering::Relaxed);
            Ok(SubmitToken::from(slotmap::KeyData::from_ffi(raw)))
        }

        fn wait(&self, _token: SubmitToken) {}
    }

    #[derive(Default)]
    pub struct MockPipelineCache {
        pipelines: RefCell<slotmap::SlotMap<PipelineHandle, ()>>,
    }

    impl MockPipelineCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register(&self) -> PipelineHandle {
            self.pipelines.borrow_mut().insert(())
        }
    }

    impl PipelineCache for MockPipelineCache {
        fn pipeline_for(&self, _shader_ids: &[u64], _state_hash: u64) -> Option<PipelineHandle> {
            self.pipelines.borrow().keys().next()
        }
    }

    #[derive(Default)]
    pub struct MockResidentTextures {
        map: FxHashMap<u64, ImageHandle>,
    }

    impl MockResidentTextures {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, key: u64, handle: ImageHandle) {
            self.map.insert(key, handle);
        }
    }

    impl ResidentTextures for MockResidentTextures {
        fn resolve(&self, key: u64) -> Option<ImageHandle> {
            self.map.get(&key).copied()
        }
    }
}
