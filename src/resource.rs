//! Resource descriptors: the data the Transient Pool and Barrier Tracker key
//! off of. Grounded in `oblo::vk::texture_resource_initializer` /
//! `buffer_resource_initializer` (see `original_source`), generalized to the
//! closed usage-flag sets this crate's §3 data model specifies.

use bitflags::bitflags;

use crate::types::{Extent2D, Format};

bitflags! {
    /// Accumulated usage of a transient or stable buffer across a frame. The
    /// Transient Pool's match-key is (size-rounded-up, usage union): a buffer
    /// requested as `STORAGE_WRITE` by one node and `UNIFORM` by another must
    /// be created with the union of both, never silently dropped.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct BufferUsage: u16 {
        const STORAGE_READ   = 1 << 0;
        const STORAGE_WRITE  = 1 << 1;
        const STORAGE_UPLOAD = 1 << 2;
        const DOWNLOAD       = 1 << 3;
        const UNIFORM        = 1 << 4;
        const VERTEX         = 1 << 5;
        const INDEX          = 1 << 6;
        const INDIRECT       = 1 << 7;
    }
}

bitflags! {
    /// Accumulated `VkImageUsageFlags`-equivalent derived from every
    /// [`ImageAccess`] declared against an image in a frame.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct ImageUsage: u16 {
        const SAMPLED                  = 1 << 0;
        const STORAGE                  = 1 << 1;
        const COLOR_ATTACHMENT         = 1 << 2;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        const TRANSFER_SRC             = 1 << 4;
        const TRANSFER_DST             = 1 << 5;
    }
}

/// The role an image is accessed in at one point in the planned order. This
/// is the per-access counterpart of [`ImageUsage`]: a sequence of these over
/// a frame is what the Barrier Tracker turns into layout transitions, and
/// their union (via [`ImageAccess::usage_bits`]) is what the Transient Pool
/// allocates for.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ImageAccess {
    Undefined,
    General,
    ShaderRead,
    ColorAttachment,
    DepthAttachment,
    TransferSrc,
    TransferDst,
    Present,
}

impl ImageAccess {
    pub fn usage_bits(self) -> ImageUsage {
        match self {
            ImageAccess::Undefined => ImageUsage::empty(),
            ImageAccess::General => ImageUsage::STORAGE,
            ImageAccess::ShaderRead => ImageUsage::SAMPLED,
            ImageAccess::ColorAttachment => ImageUsage::COLOR_ATTACHMENT,
            ImageAccess::DepthAttachment => ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            ImageAccess::TransferSrc => ImageUsage::TRANSFER_SRC,
            ImageAccess::TransferDst => ImageUsage::TRANSFER_DST,
            ImageAccess::Present => ImageUsage::empty(),
        }
    }

    /// Whether this access writes the image (governs write/write and
    /// write/read barrier rules in [`crate::barrier`]).
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ImageAccess::ColorAttachment | ImageAccess::DepthAttachment | ImageAccess::TransferDst
        ) || self == ImageAccess::General
    }
}

/// Declares an image transient or stable resource. Mirrors
/// `texture_resource_initializer`: width/height/format plus a stability flag
/// and a debug label used both for diagnostics and, for stable resources, as
/// part of the persistent-table key.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageResourceInitializer {
    pub extent: Extent2D,
    pub format: Format,
    pub is_stable: bool,
    pub debug_label: String,
}

impl ImageResourceInitializer {
    pub fn transient(extent: Extent2D, format: Format, debug_label: impl Into<String>) -> Self {
        ImageResourceInitializer { extent, format, is_stable: false, debug_label: debug_label.into() }
    }

    pub fn stable(extent: Extent2D, format: Format, debug_label: impl Into<String>) -> Self {
        ImageResourceInitializer { extent, format, is_stable: true, debug_label: debug_label.into() }
    }

    /// The fingerprint the Transient Pool groups requests by: `(extent,
    /// format, usage-union)`. Usage isn't known until every access in the
    /// frame has been declared, so the fingerprint is completed by
    /// [`crate::pool::ImagePool`] once `build` has finished for every node.
    pub(crate) fn shape(&self) -> (Extent2D, Format) {
        (self.extent, self.format)
    }
}

/// Declares a buffer transient or stable resource. Mirrors
/// `buffer_resource_initializer`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferResourceInitializer {
    pub size: u64,
    pub is_stable: bool,
    pub debug_label: String,
}

impl BufferResourceInitializer {
    pub fn transient(size: u64, debug_label: impl Into<String>) -> Self {
        BufferResourceInitializer { size, is_stable: false, debug_label: debug_label.into() }
    }

    pub fn stable(size: u64, debug_label: impl Into<String>) -> Self {
        BufferResourceInitializer { size, is_stable: true, debug_label: debug_label.into() }
    }

    /// Size rounded up to the pool's matching granularity, part of the
    /// match-key fingerprint `(size-rounded-up, usage-union)`.
    pub(crate) fn rounded_size(&self) -> u64 {
        const GRANULARITY: u64 = 256;
        (self.size + GRANULARITY - 1) / GRANULARITY * GRANULARITY
    }
}

/// The kind of GPU work a pass records, declared once per node via
/// `BuildContext::begin_pass`. Controls which command-recording operations
/// [`crate::execute::ExecuteContext`] permits and which stage masks the
/// Barrier Tracker assigns to its accesses.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum PassKind {
    /// A build-only node: no commands are recorded, so no barriers are
    /// needed around it beyond what its own accesses otherwise require.
    #[default]
    None,
    Graphics,
    Compute,
    RayTracing,
    Transfer,
}

impl PassKind {
    /// Pipeline stage mask a pass kind implies for its own accesses, absent
    /// a more specific one attached to an individual access record.
    pub fn default_stage(self) -> PipelineStage {
        match self {
            PassKind::None => PipelineStage::TOP_OF_PIPE,
            PassKind::Graphics => PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            PassKind::Compute => PipelineStage::COMPUTE_SHADER,
            PassKind::RayTracing => PipelineStage::RAY_TRACING_SHADER,
            PassKind::Transfer => PipelineStage::TRANSFER,
        }
    }
}

bitflags! {
    /// A reduced `VkPipelineStageFlags`: only the stages this crate's barrier
    /// rules need to distinguish between.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct PipelineStage: u16 {
        const TOP_OF_PIPE              = 1 << 0;
        const TRANSFER                 = 1 << 1;
        const COMPUTE_SHADER           = 1 << 2;
        const RAY_TRACING_SHADER       = 1 << 3;
        const VERTEX_SHADER            = 1 << 4;
        const FRAGMENT_SHADER          = 1 << 5;
        const EARLY_FRAGMENT_TESTS     = 1 << 6;
        const LATE_FRAGMENT_TESTS      = 1 << 7;
        const COLOR_ATTACHMENT_OUTPUT  = 1 << 8;
        const HOST                     = 1 << 9;
        const BOTTOM_OF_PIPE           = 1 << 10;
    }
}

bitflags! {
    /// A reduced `VkAccessFlags`.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct AccessFlags: u16 {
        const SHADER_READ           = 1 << 0;
        const SHADER_WRITE          = 1 << 1;
        const COLOR_ATTACHMENT_READ  = 1 << 2;
        const COLOR_ATTACHMENT_WRITE = 1 << 3;
        const DEPTH_STENCIL_READ    = 1 << 4;
        const DEPTH_STENCIL_WRITE   = 1 << 5;
        const TRANSFER_READ         = 1 << 6;
        const TRANSFER_WRITE        = 1 << 7;
        const UNIFORM_READ          = 1 << 8;
        const MEMORY_READ           = 1 << 9;
        const MEMORY_WRITE          = 1 << 10;
    }
}

impl ImageAccess {
    /// The access mask a barrier needs for this access kind, used by
    /// [`crate::barrier::BarrierTracker`].
    pub fn access_mask(self) -> AccessFlags {
        match self {
            ImageAccess::Undefined => AccessFlags::empty(),
            ImageAccess::General => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            ImageAccess::ShaderRead => AccessFlags::SHADER_READ,
            ImageAccess::ColorAttachment => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            ImageAccess::DepthAttachment => {
                AccessFlags::DEPTH_STENCIL_READ | AccessFlags::DEPTH_STENCIL_WRITE
            }
            ImageAccess::TransferSrc => AccessFlags::TRANSFER_READ,
            ImageAccess::TransferDst => AccessFlags::TRANSFER_WRITE,
            ImageAccess::Present => AccessFlags::MEMORY_READ,
        }
    }

    /// The stage mask a barrier needs for this access kind, absent a more
    /// specific stage supplied by the node (e.g. a shader stage narrower than
    /// "every fragment stage").
    pub fn stage_mask(self, pass_kind: PassKind) -> PipelineStage {
        match self {
            ImageAccess::Undefined => PipelineStage::TOP_OF_PIPE,
            ImageAccess::ColorAttachment => PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            ImageAccess::DepthAttachment => {
                PipelineStage::EARLY_FRAGMENT_TESTS | PipelineStage::LATE_FRAGMENT_TESTS
            }
            ImageAccess::TransferSrc | ImageAccess::TransferDst => PipelineStage::TRANSFER,
            ImageAccess::Present => PipelineStage::BOTTOM_OF_PIPE,
            ImageAccess::General | ImageAccess::ShaderRead => pass_kind.default_stage(),
        }
    }
}

/// Buffer access direction + phase, the buffer-side counterpart of
/// [`ImageAccess`]. Buffers have no layout, only a read/write state.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BufferAccess {
    Read(BufferUsage),
    Write(BufferUsage),
}

impl BufferAccess {
    pub fn usage(self) -> BufferUsage {
        match self {
            BufferAccess::Read(u) | BufferAccess::Write(u) => u,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, BufferAccess::Write(_))
    }

    pub fn access_mask(self) -> AccessFlags {
        match self {
            BufferAccess::Read(u) if u.contains(BufferUsage::UNIFORM) => AccessFlags::UNIFORM_READ,
            BufferAccess::Read(_) => AccessFlags::SHADER_READ,
            BufferAccess::Write(_) => AccessFlags::SHADER_WRITE,
        }
    }

    pub fn stage_mask(self, pass_kind: PassKind) -> PipelineStage {
        if self.usage().contains(BufferUsage::STORAGE_UPLOAD) || self.usage().contains(BufferUsage::DOWNLOAD) {
            PipelineStage::TRANSFER
        } else {
            pass_kind.default_stage()
        }
    }
}
