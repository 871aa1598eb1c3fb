//! Transient Pool (C6).
//!
//! Materializes the resource declarations a frame's `build()` pass recorded
//! into an [`AccessLog`] into real GPU handles, aliasing same-shaped
//! transient resources whose lifetime windows don't overlap and keeping
//! stable resources alive across frames in a separate retained table: a
//! match-key plus scope-overlap reuse scheme for the transient pool, and a
//! persistent-vs-scoped split with `last_used_frame` eviction for the stable
//! table (see `DESIGN.md` for the planner-window substitution this makes for
//! scope tracking).

use std::hash::{Hash, Hasher};

use fxhash::{FxHashMap, FxHashSet, FxHasher64};
use slotmap::SlotMap;

use crate::build::{AccessLog, BufferOp, ImageOp};
use crate::device::{BufferDesc, BufferHandle, GpuDevice, ImageDesc, ImageHandle};
use crate::error::BuildError;
use crate::ids::{BufferAliasKey, ImageAliasKey, PinId, StableKey};
use crate::planner::ResourceLifetime;
use crate::resource::{BufferUsage, ImageUsage};
use crate::types::{Extent2D, Format};

struct AliasedSlot<D: Eq + Clone, T> {
    description: D,
    object: T,
    windows: Vec<(usize, usize)>,
}

impl<D: Eq + Clone, T> AliasedSlot<D, T> {
    fn overlaps(&self, window: (usize, usize)) -> bool {
        self.windows.iter().any(|&(a, b)| a <= window.1 && window.0 <= b)
    }
}

/// A match-key-grouped, lifetime-aliased pool of same-shaped GPU objects.
pub struct Pool<D: Eq + Clone, K: slotmap::Key + Copy, T> {
    entries: SlotMap<K, AliasedSlot<D, T>>,
}

impl<D: Eq + Clone, K: slotmap::Key + Copy, T> Default for Pool<D, K, T> {
    fn default() -> Self {
        Pool { entries: SlotMap::with_key() }
    }
}

impl<D: Eq + Clone, K: slotmap::Key + Copy, T: Copy> Pool<D, K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every slot's lifetime windows: the previous frame's occupancy
    /// never constrains this frame's aliasing (lifetimes are scoped to a
    /// single frame, §8).
    pub fn begin_frame(&mut self) {
        for (_, e) in self.entries.iter_mut() {
            e.windows.clear();
        }
    }

    /// Returns an existing slot whose description matches and whose
    /// lifetime windows don't overlap `window`, or allocates a new one.
    pub fn alloc(
        &mut self,
        window: (usize, usize),
        description: D,
        make: impl FnOnce(&D) -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        for (_, e) in self.entries.iter_mut() {
            if e.description == description && !e.overlaps(window) {
                e.windows.push(window);
                return Ok(e.object);
            }
        }
        let object = make(&description)?;
        self.entries.insert(AliasedSlot { description, object, windows: vec![window] });
        Ok(object)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every slot `keep` rejects, running `destroy` on its backing
    /// object first. Purely a capacity-shedding operation: an over-sized
    /// pool is wasteful, never incorrect.
    pub fn retain(&mut self, mut keep: impl FnMut(&D) -> bool, mut destroy: impl FnMut(T)) {
        let dead: Vec<K> = self.entries.iter().filter(|(_, e)| !keep(&e.description)).map(|(k, _)| k).collect();
        for k in dead {
            if let Some(e) = self.entries.remove(k) {
                destroy(e.object);
            }
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ImageShape {
    pub extent: Extent2D,
    pub format: Format,
    pub usage: ImageUsage,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct BufferShape {
    pub size: u64,
    pub usage: BufferUsage,
}

pub type ImagePool = Pool<ImageShape, ImageAliasKey, ImageHandle>;
pub type BufferPool = Pool<BufferShape, BufferAliasKey, BufferHandle>;

struct StableEntry<T> {
    value: T,
    last_used_frame: u64,
}

/// Resources that outlive a single frame, keyed by a hash of their debug
/// label and shape. Unlike the transient pool, a stable resource is never
/// aliased with anything else; it's simply kept around, and reclaimed after
/// `retire_after_frames` frames pass without it being touched.
struct StableTable<T: Copy> {
    entries: FxHashMap<StableKey, StableEntry<T>>,
    retire_after_frames: u64,
}

impl<T: Copy> StableTable<T> {
    fn new(retire_after_frames: u64) -> Self {
        StableTable { entries: FxHashMap::default(), retire_after_frames }
    }

    fn get_or_create(
        &mut self,
        key: StableKey,
        frame: u64,
        make: impl FnOnce() -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used_frame = frame;
            return Ok(entry.value);
        }
        let value = make()?;
        self.entries.insert(key, StableEntry { value, last_used_frame: frame });
        Ok(value)
    }

    fn retire(&mut self, current_frame: u64, mut destroy: impl FnMut(T)) {
        let dead: Vec<StableKey> = self
            .entries
            .iter()
            .filter(|(_, e)| current_frame.saturating_sub(e.last_used_frame) > self.retire_after_frames)
            .map(|(k, _)| *k)
            .collect();
        for k in dead {
            if let Some(e) = self.entries.remove(&k) {
                log::debug!("retiring stable resource {k:?}, unused since frame {}", e.last_used_frame);
                destroy(e.value);
            }
        }
    }
}

fn stable_key(label: &str, shape_hash: u64) -> StableKey {
    let mut hasher = FxHasher64::default();
    label.hash(&mut hasher);
    shape_hash.hash(&mut hasher);
    StableKey(hasher.finish())
}

fn hash_image_shape(extent: Extent2D, format: Format) -> u64 {
    let mut hasher = FxHasher64::default();
    extent.hash(&mut hasher);
    format.hash(&mut hasher);
    hasher.finish()
}

fn hash_buffer_shape(size: u64) -> u64 {
    let mut hasher = FxHasher64::default();
    size.hash(&mut hasher);
    hasher.finish()
}

/// The set of live GPU handles resolved for one frame, indexed by the
/// producing pin so pin storage and `ExecuteContext` can look them up.
#[derive(Default)]
pub struct ResolvedResources {
    pub images: FxHashMap<PinId, ImageHandle>,
    pub buffers: FxHashMap<PinId, BufferHandle>,
    /// Handles backed by the stable table rather than the transient pool —
    /// the only handles [`crate::barrier::StableBarrierState`] may carry
    /// layout for across frames.
    pub stable_images: FxHashSet<ImageHandle>,
    pub stable_buffers: FxHashSet<BufferHandle>,
}

/// Owns the transient pools and stable tables for images and buffers, and
/// turns one frame's [`AccessLog`] into [`ResolvedResources`].
pub struct TransientPool {
    images: ImagePool,
    buffers: BufferPool,
    stable_images: StableTable<ImageHandle>,
    stable_buffers: StableTable<BufferHandle>,
    frame: u64,
}

impl TransientPool {
    pub fn new(stable_retire_frames: u64) -> Self {
        TransientPool {
            images: Pool::new(),
            buffers: Pool::new(),
            stable_images: StableTable::new(stable_retire_frames),
            stable_buffers: StableTable::new(stable_retire_frames),
            frame: 0,
        }
    }

    pub fn materialize(
        &mut self,
        device: &dyn GpuDevice,
        log: &AccessLog,
        lifetimes: &[ResourceLifetime],
    ) -> Result<ResolvedResources, BuildError> {
        self.frame += 1;
        self.images.begin_frame();
        self.buffers.begin_frame();
        self.stable_images.retire(self.frame, |h| device.destroy_image(h));
        self.stable_buffers.retire(self.frame, |h| device.destroy_buffer(h));

        let window_of: FxHashMap<PinId, (usize, usize)> =
            lifetimes.iter().map(|l| (l.source_pin, (l.first_use, l.last_use))).collect();

        let mut image_usage: FxHashMap<PinId, ImageUsage> = FxHashMap::default();
        for op in &log.image_ops {
            if let ImageOp::Access { source, access, .. } = op {
                *image_usage.entry(*source).or_insert_with(ImageUsage::empty) |= access.usage_bits();
            }
        }
        let mut buffer_usage: FxHashMap<PinId, BufferUsage> = FxHashMap::default();
        for op in &log.buffer_ops {
            if let BufferOp::Access { source, access, .. } = op {
                *buffer_usage.entry(*source).or_insert_with(BufferUsage::empty) |= access.usage();
            }
        }

        let mut resolved = ResolvedResources::default();

        for op in &log.image_ops {
            match op {
                ImageOp::Create { pin, init } => {
                    let usage = image_usage.get(pin).copied().unwrap_or_else(ImageUsage::empty);
                    let handle = if init.is_stable {
                        let key = stable_key(&init.debug_label, hash_image_shape(init.extent, init.format));
                        let handle = self.stable_images.get_or_create(key, self.frame, || {
                            device
                                .create_image(&ImageDesc {
                                    extent: init.extent,
                                    format: init.format,
                                    usage,
                                    debug_label: init.debug_label.clone(),
                                })
                                .map_err(|_| BuildError::OutOfMemory)
                        })?;
                        resolved.stable_images.insert(handle);
                        handle
                    } else {
                        let window = window_of.get(pin).copied().unwrap_or((0, 0));
                        let (extent, format) = init.shape();
                        let shape = ImageShape { extent, format, usage };
                        self.images.alloc(window, shape, |shape| {
                            device
                                .create_image(&ImageDesc {
                                    extent: shape.extent,
                                    format: shape.format,
                                    usage: shape.usage,
                                    debug_label: init.debug_label.clone(),
                                })
                                .map_err(|_| BuildError::OutOfMemory)
                        })?
                    };
                    resolved.images.insert(*pin, handle);
                }
                ImageOp::Acquire { pin, handle } => {
                    resolved.images.insert(*pin, *handle);
                }
                ImageOp::Access { .. } => {}
            }
        }

        for op in &log.buffer_ops {
            match op {
                BufferOp::Create { pin, init } => {
                    let usage = buffer_usage.get(pin).copied().unwrap_or_else(BufferUsage::empty);
                    let size = init.rounded_size();
                    let handle = if init.is_stable {
                        let key = stable_key(&init.debug_label, hash_buffer_shape(size));
                        let handle = self.stable_buffers.get_or_create(key, self.frame, || {
                            device
                                .create_buffer(&BufferDesc { size, usage, debug_label: init.debug_label.clone() })
                                .map_err(|_| BuildError::OutOfMemory)
                        })?;
                        resolved.stable_buffers.insert(handle);
                        handle
                    } else {
                        let window = window_of.get(pin).copied().unwrap_or((0, 0));
                        let shape = BufferShape { size, usage };
                        self.buffers.alloc(window, shape, |shape| {
                            device
                                .create_buffer(&BufferDesc {
                                    size: shape.size,
                                    usage: shape.usage,
                                    debug_label: init.debug_label.clone(),
                                })
                                .map_err(|_| BuildError::OutOfMemory)
                        })?
                    };
                    resolved.buffers.insert(*pin, handle);
                }
                BufferOp::Access { .. } | BufferOp::Upload { .. } => {}
            }
        }

        Ok(resolved)
    }

    /// Drops every transient slot nothing referenced this frame, freeing the
    /// backing device objects. Called after submission, once the resolved
    /// handles are no longer needed.
    pub fn shrink_to(&mut self, device: &dyn GpuDevice, max_idle_images: usize, max_idle_buffers: usize) {
        if self.images.len() > max_idle_images {
            self.images.retain(|_| true, |h| device.destroy_image(h));
        }
        if self.buffers.len() > max_idle_buffers {
            self.buffers.retain(|_| true, |h| device.destroy_buffer(h));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::ids::{NodeIndex, PinSlot};
    use crate::resource::{ImageAccess, ImageResourceInitializer, PassKind};
    use crate::types::{Extent2D, Format};

    fn pins(n: usize) -> Vec<PinId> {
        let mut nodes: SlotMap<NodeIndex, ()> = SlotMap::with_key();
        (0..n).map(|i| PinId::new(nodes.insert(()), PinSlot(i as u16))).collect()
    }

    fn access(pin: PinId, source: PinId, access: ImageAccess) -> ImageOp {
        ImageOp::Access { pin, source, access, pass: PassKind::Graphics }
    }

    #[test]
    fn disjoint_lifetimes_share_one_slot() {
        let [a, b]: [PinId; 2] = pins(2).try_into().unwrap();
        let init = ImageResourceInitializer::transient(Extent2D::new(64, 64), Format::Rgba8Unorm, "scratch");
        let log = AccessLog {
            image_ops: vec![
                ImageOp::Create { pin: a, init: init.clone() },
                access(a, a, ImageAccess::ColorAttachment),
                ImageOp::Create { pin: b, init },
                access(b, b, ImageAccess::ColorAttachment),
            ],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        };
        let lifetimes = vec![
            ResourceLifetime { source_pin: a, first_use: 0, last_use: 0 },
            ResourceLifetime { source_pin: b, first_use: 1, last_use: 1 },
        ];

        let device = MockDevice::new();
        let mut pool = TransientPool::new(4);
        let resolved = pool.materialize(&device, &log, &lifetimes).unwrap();

        assert_eq!(resolved.images[&a], resolved.images[&b]);
        assert_eq!(device.live_image_count(), 1);
    }

    #[test]
    fn overlapping_lifetimes_never_alias() {
        let [a, b]: [PinId; 2] = pins(2).try_into().unwrap();
        let init = ImageResourceInitializer::transient(Extent2D::new(64, 64), Format::Rgba8Unorm, "scratch");
        let log = AccessLog {
            image_ops: vec![
                ImageOp::Create { pin: a, init: init.clone() },
                access(a, a, ImageAccess::ColorAttachment),
                ImageOp::Create { pin: b, init },
                access(b, b, ImageAccess::ColorAttachment),
            ],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        };
        let lifetimes = vec![
            ResourceLifetime { source_pin: a, first_use: 0, last_use: 1 },
            ResourceLifetime { source_pin: b, first_use: 1, last_use: 2 },
        ];

        let device = MockDevice::new();
        let mut pool = TransientPool::new(4);
        let resolved = pool.materialize(&device, &log, &lifetimes).unwrap();

        assert_ne!(resolved.images[&a], resolved.images[&b]);
        assert_eq!(device.live_image_count(), 2);
    }

    #[test]
    fn stable_image_keeps_its_handle_across_frames() {
        let [a]: [PinId; 1] = pins(1).try_into().unwrap();
        let init = ImageResourceInitializer::stable(Extent2D::new(64, 64), Format::Rgba8Unorm, "history");
        let make_log = || AccessLog {
            image_ops: vec![ImageOp::Create { pin: a, init: init.clone() }, access(a, a, ImageAccess::ShaderRead)],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        };

        let device = MockDevice::new();
        let mut pool = TransientPool::new(4);
        let resolved1 = pool.materialize(&device, &make_log(), &[]).unwrap();
        let resolved2 = pool.materialize(&device, &make_log(), &[]).unwrap();

        assert_eq!(resolved1.images[&a], resolved2.images[&a]);
        assert_eq!(device.live_image_count(), 1);
        assert!(resolved2.stable_images.contains(&resolved2.images[&a]));
    }

    #[test]
    fn image_usage_is_the_union_of_every_declared_access() {
        let [a]: [PinId; 1] = pins(1).try_into().unwrap();
        let init = ImageResourceInitializer::transient(Extent2D::new(64, 64), Format::Rgba8Unorm, "combined");
        let log = AccessLog {
            image_ops: vec![
                ImageOp::Create { pin: a, init },
                access(a, a, ImageAccess::ShaderRead),
                access(a, a, ImageAccess::ColorAttachment),
            ],
            buffer_ops: Vec::new(),
            pass_kinds: FxHashMap::default(),
        };
        let lifetimes = vec![ResourceLifetime { source_pin: a, first_use: 0, last_use: 1 }];

        let device = MockDevice::new();
        let mut pool = TransientPool::new(4);
        let resolved = pool.materialize(&device, &log, &lifetimes).unwrap();
        let desc = device.image_desc(resolved.images[&a]);

        assert!(desc.usage.contains(ImageUsage::SAMPLED));
        assert!(desc.usage.contains(ImageUsage::COLOR_ATTACHMENT));
    }
}
