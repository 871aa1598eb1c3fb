//! Barrier & Layout Tracker (C7).
//!
//! Walks one frame's [`AccessLog`] — already in planner order, since
//! `build()` runs every node in that order and each call only appends to the
//! log — and decides which accesses need a barrier before them: a resource
//! freshly created is implicitly in an undefined layout, so its first real
//! access always needs a transition; after that, a barrier is needed
//! whenever either side of a read/write pair is a write, or an image's
//! access kind (hence implied layout) changes even between two reads.
//! Barriers for everything a node needs are coalesced into one
//! [`BarrierBatch`], recorded right before that node's command stream.

use fxhash::FxHashMap;

use crate::build::{AccessLog, BufferOp, ImageOp};
use crate::device::{BufferHandle, ImageHandle};
use crate::ids::NodeIndex;
use crate::pool::ResolvedResources;
use crate::resource::{AccessFlags, ImageAccess, PipelineStage};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageAccess,
    pub new_layout: ImageAccess,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// Every barrier one node needs recorded immediately before its command
/// stream begins.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct BarrierBatch {
    pub image_barriers: Vec<ImageBarrier>,
    pub buffer_barriers: Vec<BufferBarrier>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }
}

type ImageState = (AccessFlags, PipelineStage, ImageAccess);
type BufferState = (AccessFlags, PipelineStage, bool);

/// Carries the last known layout of every stable resource across frames.
/// Transient handles are deliberately never tracked here: the transient pool
/// reassigns the same handle to unrelated logical resources between frames,
/// so only a resource the pool never aliases away may skip its undefined
/// first-use barrier.
#[derive(Default)]
pub struct StableBarrierState {
    images: FxHashMap<ImageHandle, ImageState>,
    buffers: FxHashMap<BufferHandle, BufferState>,
}

pub struct BarrierTracker;

impl BarrierTracker {
    /// Computes every node's barrier batch for one frame. `log` must be the
    /// same one `build()` populated and `resolved` the pool's materialized
    /// handles for it. `stable_state` carries the layout of stable resources
    /// forward between calls, so a stable resource's first access in a frame
    /// other than its creation frame is treated as a continuation of its
    /// last access rather than a fresh undefined-layout transition.
    pub fn compute(
        log: &AccessLog,
        resolved: &ResolvedResources,
        stable_state: &mut StableBarrierState,
    ) -> FxHashMap<NodeIndex, BarrierBatch> {
        let mut batches: FxHashMap<NodeIndex, BarrierBatch> = FxHashMap::default();

        let mut image_last: FxHashMap<crate::ids::PinId, ImageState> = FxHashMap::default();
        for op in &log.image_ops {
            if let ImageOp::Access { pin, source, access, pass } = op {
                let handle = match resolved.images.get(source) {
                    Some(h) => *h,
                    None => continue,
                };
                let is_stable = resolved.stable_images.contains(&handle);
                let stage = access.stage_mask(*pass);
                let access_mask = access.access_mask();

                let prior = image_last
                    .get(source)
                    .copied()
                    .or_else(|| if is_stable { stable_state.images.get(&handle).copied() } else { None });
                let (src_access, src_stage, old_layout) =
                    prior.unwrap_or((AccessFlags::empty(), PipelineStage::TOP_OF_PIPE, ImageAccess::Undefined));

                let same_read = old_layout == *access && !access.is_write();
                let is_first_use = prior.is_none();
                if is_first_use || !same_read {
                    batches.entry(pin.node).or_default().image_barriers.push(ImageBarrier {
                        image: handle,
                        src_stage,
                        dst_stage: stage,
                        src_access,
                        dst_access: access_mask,
                        old_layout,
                        new_layout: *access,
                    });
                }
                image_last.insert(*source, (access_mask, stage, *access));
                if is_stable {
                    stable_state.images.insert(handle, (access_mask, stage, *access));
                }
            }
        }

        let mut buffer_last: FxHashMap<crate::ids::PinId, BufferState> = FxHashMap::default();
        for op in &log.buffer_ops {
            if let BufferOp::Access { pin, source, access, pass } = op {
                let handle = match resolved.buffers.get(source) {
                    Some(h) => *h,
                    None => continue,
                };
                let is_stable = resolved.stable_buffers.contains(&handle);
                let stage = access.stage_mask(*pass);
                let access_mask = access.access_mask();
                let is_write = access.is_write();

                let prev = prior_buffer_state(&buffer_last, source, is_stable, stable_state, handle);
                let needs_barrier = match prev {
                    None => false,
                    Some((_, _, prev_write)) => prev_write || is_write,
                };
                if needs_barrier {
                    let (src_access, src_stage, _) = prev.expect("needs_barrier implies prev is Some");
                    batches.entry(pin.node).or_default().buffer_barriers.push(BufferBarrier {
                        buffer: handle,
                        src_stage,
                        dst_stage: stage,
                        src_access,
                        dst_access: access_mask,
                    });
                }
                buffer_last.insert(*source, (access_mask, stage, is_write));
                if is_stable {
                    stable_state.buffers.insert(handle, (access_mask, stage, is_write));
                }
            }
        }

        batches
    }
}

fn prior_buffer_state(
    buffer_last: &FxHashMap<crate::ids::PinId, BufferState>,
    source: &crate::ids::PinId,
    is_stable: bool,
    stable_state: &StableBarrierState,
    handle: BufferHandle,
) -> Option<BufferState> {
    buffer_last.get(source).copied().or_else(|| if is_stable { stable_state.buffers.get(&handle).copied() } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::device::GpuDevice;
    use crate::ids::{NodeIndex, PinId, PinSlot};
    use crate::resource::PassKind;
    use fxhash::FxHashSet;
    use slotmap::SlotMap;

    fn pin() -> PinId {
        let mut nodes: SlotMap<NodeIndex, ()> = SlotMap::with_key();
        PinId::new(nodes.insert(()), PinSlot(0))
    }

    fn image_handle(device: &MockDevice) -> ImageHandle {
        device
            .create_image(&crate::device::ImageDesc {
                extent: crate::types::Extent2D::new(4, 4),
                format: crate::types::Format::Rgba8Unorm,
                usage: crate::resource::ImageUsage::empty(),
                debug_label: "t".into(),
            })
            .unwrap()
    }

    fn access_log(pin: PinId, access: ImageAccess) -> AccessLog {
        AccessLog {
            image_ops: vec![ImageOp::Access { pin, source: pin, access, pass: PassKind::Graphics }],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        }
    }

    #[test]
    fn first_use_transitions_from_undefined() {
        let device = MockDevice::new();
        let handle = image_handle(&device);
        let pin = pin();
        let log = access_log(pin, ImageAccess::ColorAttachment);
        let mut resolved = ResolvedResources::default();
        resolved.images.insert(pin, handle);

        let mut stable_state = StableBarrierState::default();
        let batches = BarrierTracker::compute(&log, &resolved, &mut stable_state);

        let barrier = &batches[&pin.node].image_barriers[0];
        assert_eq!(barrier.old_layout, ImageAccess::Undefined);
        assert_eq!(barrier.new_layout, ImageAccess::ColorAttachment);
    }

    #[test]
    fn consecutive_reads_of_the_same_layout_need_no_barrier() {
        let device = MockDevice::new();
        let handle = image_handle(&device);
        let pin = pin();
        let mut resolved = ResolvedResources::default();
        resolved.images.insert(pin, handle);
        let mut stable_state = StableBarrierState::default();

        let log = AccessLog {
            image_ops: vec![
                ImageOp::Access { pin, source: pin, access: ImageAccess::ShaderRead, pass: PassKind::Graphics },
                ImageOp::Access { pin, source: pin, access: ImageAccess::ShaderRead, pass: PassKind::Graphics },
            ],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        };
        let batches = BarrierTracker::compute(&log, &resolved, &mut stable_state);

        // Both accesses land on the same node here, so only the first barrier
        // (the undefined-layout transition) is recorded; a real graph would
        // spread these across two nodes, but the coalescing rule is the same.
        assert_eq!(batches[&pin.node].image_barriers.len(), 1);
    }

    #[test]
    fn write_after_write_always_needs_a_barrier() {
        let device = MockDevice::new();
        let handle = image_handle(&device);
        let pin = pin();
        let mut resolved = ResolvedResources::default();
        resolved.images.insert(pin, handle);
        let mut stable_state = StableBarrierState::default();

        let log = AccessLog {
            image_ops: vec![
                ImageOp::Access { pin, source: pin, access: ImageAccess::ColorAttachment, pass: PassKind::Graphics },
                ImageOp::Access { pin, source: pin, access: ImageAccess::ColorAttachment, pass: PassKind::Graphics },
            ],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        };
        let batches = BarrierTracker::compute(&log, &resolved, &mut stable_state);

        assert_eq!(batches[&pin.node].image_barriers.len(), 2);
    }

    #[test]
    fn stable_resource_carries_its_layout_into_the_next_frame() {
        let device = MockDevice::new();
        let handle = image_handle(&device);
        let mut stable_images = FxHashSet::default();
        stable_images.insert(handle);

        let mut stable_state = StableBarrierState::default();

        let pin_frame1 = pin();
        let mut resolved1 = ResolvedResources::default();
        resolved1.images.insert(pin_frame1, handle);
        resolved1.stable_images = stable_images.clone();
        let log1 = access_log(pin_frame1, ImageAccess::ShaderRead);
        let batches1 = BarrierTracker::compute(&log1, &resolved1, &mut stable_state);
        assert_eq!(batches1[&pin_frame1.node].image_barriers[0].old_layout, ImageAccess::Undefined);

        // A new frame: a fresh pin instance (new node), same underlying stable
        // handle, same access. Without carry-forward this would transition
        // from Undefined again; with it, it's a same-layout read and needs
        // no barrier at all.
        let pin_frame2 = pin();
        let mut resolved2 = ResolvedResources::default();
        resolved2.images.insert(pin_frame2, handle);
        resolved2.stable_images = stable_images;
        let log2 = access_log(pin_frame2, ImageAccess::ShaderRead);
        let batches2 = BarrierTracker::compute(&log2, &resolved2, &mut stable_state);

        assert!(batches2.get(&pin_frame2.node).map(|b| b.is_empty()).unwrap_or(true));
    }
}
