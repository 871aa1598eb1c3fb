//! Pin & Storage Model (C3).
//!
//! Pin payloads are stored as raw bytes plus a small vtable-like
//! [`TypeInfo`] record (size, align, drop) rather than as a virtual-
//! inheritance hierarchy: a closed set of three pin kinds — data, resource,
//! sink — share one per-graph byte arena. This is the type erasure the
//! design notes call for, built the way the engine already builds its
//! erased resource pools (`slotmap`-keyed, explicit layout bookkeeping)
//! instead of reaching for `Box<dyn Any>`, which would hide the very
//! layout control this component exists to make explicit.

use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

use fxhash::FxHashMap;

use crate::ids::{ImageAliasKey, BufferAliasKey, NodeIndex, PinId, PinSlot};

/// Whether a pin is an input or an output of its node.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PinDirection {
    In,
    Out,
}

/// The three closed pin kinds the crate supports.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PinKind {
    /// A CPU value, read and written directly.
    Data,
    /// A transient or stable GPU buffer/image handle.
    Resource,
    /// An input that aggregates contributions from many producers as an
    /// unordered multiset.
    Sink,
}

/// A minimal, hand-rolled vtable: enough to store and destroy an arbitrary
/// `'static` type inside a byte arena without knowing it at compile time.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub type_id: TypeId,
    pub layout: Layout,
    pub type_name: &'static str,
    drop_in_place: unsafe fn(*mut u8),
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo").field("type_name", &self.type_name).finish()
    }
}

impl TypeInfo {
    pub fn of<T: 'static>() -> Self {
        unsafe fn drop_fn<T>(ptr: *mut u8) {
            std::ptr::drop_in_place(ptr as *mut T);
        }
        TypeInfo {
            type_id: TypeId::of::<T>(),
            layout: Layout::new::<T>(),
            type_name: std::any::type_name::<T>(),
            drop_in_place: drop_fn::<T>,
        }
    }
}

/// A resource pin's payload: an index into the transient (or stable) table,
/// or `Unbound` before the producing node's `build` has run.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum ResourceSlot {
    #[default]
    Unbound,
    Image(ImageAliasKey),
    Buffer(BufferAliasKey),
}

/// Declared once per node *type* at registration time. The
/// `(node index, slot)` pair that addresses a live instance of this pin is a
/// [`PinId`].
#[derive(Clone, Debug)]
pub struct PinDescriptor {
    pub name: &'static str,
    pub direction: PinDirection,
    pub kind: PinKind,
    pub type_info: TypeInfo,
}

impl PinDescriptor {
    pub fn data<T: 'static>(name: &'static str, direction: PinDirection) -> Self {
        PinDescriptor { name, direction, kind: PinKind::Data, type_info: TypeInfo::of::<T>() }
    }

    pub fn resource(name: &'static str, direction: PinDirection) -> Self {
        PinDescriptor {
            name,
            direction,
            kind: PinKind::Resource,
            type_info: TypeInfo::of::<ResourceSlot>(),
        }
    }

    /// Sink pins are always inputs: they aggregate contributions from
    /// upstream `build` callbacks.
    pub fn sink<T: 'static>(name: &'static str) -> Self {
        PinDescriptor { name, direction: PinDirection::In, kind: PinKind::Sink, type_info: TypeInfo::of::<T>() }
    }
}

/// A typed handle a node type holds as a struct field: carries no runtime
/// state beyond the slot it was assigned at registration, with `T` only
/// present so `BuildContext`/`ExecuteContext` accessors are checked against
/// the type the pin was declared with.
#[derive(Copy, Clone, Debug)]
pub struct DataPin<T> {
    pub slot: PinSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataPin<T> {
    pub fn new(slot: PinSlot) -> Self {
        DataPin { slot, _marker: PhantomData }
    }
}

/// Typed handle for a resource pin (image or buffer, erased behind
/// [`ResourceSlot`] at storage time).
#[derive(Copy, Clone, Debug)]
pub struct ResourcePin {
    pub slot: PinSlot,
}

impl ResourcePin {
    pub fn new(slot: PinSlot) -> Self {
        ResourcePin { slot }
    }
}

/// Typed handle for a sink pin aggregating `T` contributions.
#[derive(Copy, Clone, Debug)]
pub struct SinkPin<T> {
    pub slot: PinSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SinkPin<T> {
    pub fn new(slot: PinSlot) -> Self {
        SinkPin { slot, _marker: PhantomData }
    }
}

/// Raw header for a type-erased growable list, stored inline in the arena
/// for sink pins. The backing allocation lives outside the arena and is
/// owned by the header (freed in [`PinStorage::reset_frame`] /
/// `PinStorage::drop`).
#[derive(Copy, Clone)]
struct ErasedVecHeader {
    ptr: *mut u8,
    len: usize,
    cap: usize,
}

impl Default for ErasedVecHeader {
    fn default() -> Self {
        ErasedVecHeader { ptr: std::ptr::null_mut(), len: 0, cap: 0 }
    }
}

#[derive(Clone, Copy)]
struct SlotMeta {
    offset: usize,
    type_info: TypeInfo,
    kind: PinKind,
    /// Set on resource/data pins behind a stable producer that opts to keep
    /// its value across frame boundaries instead of being reset.
    preserve_across_frames: bool,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Builds a [`PinStorage`] arena by laying out every pin instance's payload
/// with natural alignment, in the order pins are added.
pub struct PinStorageBuilder {
    cursor: usize,
    entries: Vec<(PinId, SlotMeta)>,
}

impl Default for PinStorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PinStorageBuilder {
    pub fn new() -> Self {
        PinStorageBuilder { cursor: 0, entries: Vec::new() }
    }

    pub fn add(&mut self, node: NodeIndex, slot: PinSlot, descriptor: &PinDescriptor, preserve_across_frames: bool) {
        let layout = match descriptor.kind {
            PinKind::Sink => Layout::new::<ErasedVecHeader>(),
            PinKind::Data | PinKind::Resource => descriptor.type_info.layout,
        };
        let offset = align_up(self.cursor, layout.align().max(1));
        self.cursor = offset + layout.size();
        self.entries.push((
            PinId::new(node, slot),
            SlotMeta { offset, type_info: descriptor.type_info, kind: descriptor.kind, preserve_across_frames },
        ));
    }

    pub fn build(self) -> PinStorage {
        let slots: FxHashMap<PinId, SlotMeta> = self.entries.into_iter().collect();
        let written = slots.keys().map(|id| (*id, false)).collect();
        PinStorage { arena: vec![0u8; self.cursor], slots, written }
    }
}

/// The per-graph byte arena backing every pin instance.
pub struct PinStorage {
    arena: Vec<u8>,
    slots: FxHashMap<PinId, SlotMeta>,
    written: FxHashMap<PinId, bool>,
}

impl PinStorage {
    fn meta(&self, id: PinId) -> &SlotMeta {
        self.slots.get(&id).unwrap_or_else(|| panic!("{id:?} has no backing storage slot"))
    }

    fn ptr(&self, offset: usize) -> *const u8 {
        unsafe { self.arena.as_ptr().add(offset) }
    }

    fn ptr_mut(&mut self, offset: usize) -> *mut u8 {
        unsafe { self.arena.as_mut_ptr().add(offset) }
    }

    pub fn is_written(&self, id: PinId) -> bool {
        *self.written.get(&id).unwrap_or(&false)
    }

    /// Reads a data or resource pin. Panics (debug-build safety net) if `T`
    /// doesn't match the registered payload type, or if the pin was never
    /// written this frame.
    pub fn read<T: 'static>(&self, id: PinId) -> &T {
        let meta = *self.meta(id);
        assert_eq!(meta.type_info.type_id, TypeId::of::<T>(), "pin {id:?} type mismatch: expected {}", meta.type_info.type_name);
        assert!(self.is_written(id), "pin {id:?} read before it was written this frame");
        unsafe { &*(self.ptr(meta.offset) as *const T) }
    }

    /// Writes a data or resource pin, dropping any previous value first.
    pub fn write<T: 'static>(&mut self, id: PinId, value: T) {
        let meta = *self.meta(id);
        assert_eq!(meta.type_info.type_id, TypeId::of::<T>(), "pin {id:?} type mismatch: expected {}", meta.type_info.type_name);
        let was_written = self.is_written(id);
        let offset = meta.offset;
        unsafe {
            let ptr = self.ptr_mut(offset) as *mut T;
            if was_written {
                std::ptr::drop_in_place(ptr);
            }
            std::ptr::write(ptr, value);
        }
        self.written.insert(id, true);
    }

    /// Appends a contribution to a sink pin. Aggregation is an unordered
    /// multiset: callers must not rely on push order being observable.
    pub fn sink_push<T: 'static>(&mut self, id: PinId, value: T) {
        let meta = *self.meta(id);
        assert_eq!(meta.kind, PinKind::Sink, "pin {id:?} is not a sink");
        assert_eq!(meta.type_info.type_id, TypeId::of::<T>(), "pin {id:?} type mismatch");
        let elem_layout = Layout::new::<T>();
        unsafe {
            let header = self.ptr_mut(meta.offset) as *mut ErasedVecHeader;
            let mut h = *header;
            if h.len == h.cap {
                let new_cap = if h.cap == 0 { 4 } else { h.cap * 2 };
                let new_layout = Layout::array::<T>(new_cap).expect("sink capacity overflow");
                let new_ptr = if h.ptr.is_null() {
                    std::alloc::alloc(new_layout)
                } else {
                    let old_layout = Layout::array::<T>(h.cap).expect("sink capacity overflow");
                    std::alloc::realloc(h.ptr, old_layout, new_layout.size())
                };
                assert!(!new_ptr.is_null(), "sink allocation failed");
                h.ptr = new_ptr;
                h.cap = new_cap;
            }
            let slot_ptr = (h.ptr as *mut T).add(h.len);
            std::ptr::write(slot_ptr, value);
            h.len += 1;
            *header = h;
            let _ = elem_layout;
        }
        self.written.insert(id, true);
    }

    /// Returns the contributions pushed to a sink this frame, as a slice.
    /// Order reflects push order internally but callers must treat it as an
    /// unordered multiset (§3 invariant).
    pub fn sink_values<T: 'static>(&self, id: PinId) -> &[T] {
        let meta = *self.meta(id);
        assert_eq!(meta.kind, PinKind::Sink, "pin {id:?} is not a sink");
        assert_eq!(meta.type_info.type_id, TypeId::of::<T>(), "pin {id:?} type mismatch");
        unsafe {
            let header = &*(self.ptr(meta.offset) as *const ErasedVecHeader);
            if header.ptr.is_null() {
                &[]
            } else {
                std::slice::from_raw_parts(header.ptr as *const T, header.len)
            }
        }
    }

    /// Copies the raw bytes of an already-written data pin into a sink pin's
    /// backing array, growing it by one element. Used by the per-frame
    /// fan-in propagation step in [`crate::graph`]: sink element types are
    /// always plain-old-data (enforced at registration by requiring `Copy`
    /// in [`PinDescriptor::sink`]'s caller), so a raw byte copy — no
    /// `Clone`/`Drop` involved — is sound.
    pub fn propagate_to_sink(&mut self, from: PinId, to: PinId) {
        let from_meta = *self.meta(from);
        let to_meta = *self.meta(to);
        assert_eq!(to_meta.kind, PinKind::Sink, "pin {to:?} is not a sink");
        assert_eq!(
            from_meta.type_info.type_id, to_meta.type_info.type_id,
            "sink fan-in type mismatch at pin {to:?}"
        );
        assert!(self.is_written(from), "pin {from:?} read before it was written this frame");
        let elem_size = to_meta.type_info.layout.size();
        let elem_align = to_meta.type_info.layout.align();
        unsafe {
            let header = self.ptr_mut(to_meta.offset) as *mut ErasedVecHeader;
            let mut h = *header;
            if h.len == h.cap {
                let new_cap = if h.cap == 0 { 4 } else { h.cap * 2 };
                let new_layout =
                    Layout::from_size_align(elem_size * new_cap, elem_align).expect("sink capacity overflow");
                let new_ptr = if h.ptr.is_null() {
                    std::alloc::alloc(new_layout)
                } else {
                    let old_layout =
                        Layout::from_size_align(elem_size * h.cap, elem_align).expect("sink capacity overflow");
                    std::alloc::realloc(h.ptr, old_layout, new_layout.size())
                };
                assert!(!new_ptr.is_null(), "sink allocation failed");
                h.ptr = new_ptr;
                h.cap = new_cap;
            }
            let dst = h.ptr.add(h.len * elem_size);
            let src = self.ptr(from_meta.offset);
            std::ptr::copy_nonoverlapping(src, dst, elem_size);
            h.len += 1;
            *header = h;
        }
        self.written.insert(to, true);
    }

    /// Resets every pin for the next frame: data/resource pins are dropped
    /// and marked unwritten unless behind a stable producer that opted to
    /// preserve them; sink pins are always cleared (their consumers only
    /// ever see one frame's worth of contributions).
    pub fn reset_frame(&mut self) {
        let ids: Vec<PinId> = self.slots.keys().copied().collect();
        for id in ids {
            let meta = *self.meta(id);
            match meta.kind {
                PinKind::Data | PinKind::Resource => {
                    if meta.preserve_across_frames {
                        continue;
                    }
                    if self.is_written(id) {
                        unsafe {
                            (meta.type_info.drop_in_place)(self.ptr_mut(meta.offset));
                        }
                        self.written.insert(id, false);
                    }
                }
                PinKind::Sink => self.clear_sink(id, meta),
            }
        }
    }

    fn clear_sink(&mut self, id: PinId, meta: SlotMeta) {
        unsafe {
            let header = self.ptr_mut(meta.offset) as *mut ErasedVecHeader;
            let h = *header;
            if !h.ptr.is_null() {
                for i in 0..h.len {
                    (meta.type_info.drop_in_place)(h.ptr.add(i * meta.type_info.layout.size()));
                }
                let layout = Layout::from_size_align(
                    meta.type_info.layout.size() * h.cap,
                    meta.type_info.layout.align(),
                )
                .expect("sink layout");
                std::alloc::dealloc(h.ptr, layout);
            }
            *header = ErasedVecHeader::default();
        }
        self.written.insert(id, false);
    }
}

impl Drop for PinStorage {
    fn drop(&mut self) {
        let ids: Vec<PinId> = self.slots.keys().copied().collect();
        for id in ids {
            let meta = *self.meta(id);
            match meta.kind {
                PinKind::Data | PinKind::Resource => {
                    if self.is_written(id) {
                        unsafe {
                            (meta.type_info.drop_in_place)(self.ptr_mut(meta.offset));
                        }
                    }
                }
                PinKind::Sink => self.clear_sink(id, meta),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn node() -> NodeIndex {
        let mut nodes: slotmap::SlotMap<NodeIndex, ()> = slotmap::SlotMap::with_key();
        nodes.insert(())
    }

    #[test]
    fn sink_push_aggregates_in_push_order() {
        let node = node();
        let mut builder = PinStorageBuilder::new();
        let descriptor = PinDescriptor::sink::<u32>("lights");
        builder.add(node, PinSlot(0), &descriptor, false);
        let mut storage = builder.build();

        let id = PinId::new(node, PinSlot(0));
        storage.sink_push(id, 1u32);
        storage.sink_push(id, 2u32);
        storage.sink_push(id, 3u32);

        assert_eq!(storage.sink_values::<u32>(id), &[1, 2, 3]);
    }

    #[test]
    fn reset_frame_drops_unwritten_is_a_noop_but_clears_written_data() {
        let node = node();
        let mut builder = PinStorageBuilder::new();
        let descriptor = PinDescriptor::data::<Rc<Cell<i32>>>("counter", PinDirection::Out);
        builder.add(node, PinSlot(0), &descriptor, false);
        let mut storage = builder.build();

        let counter = Rc::new(Cell::new(0));
        let id = PinId::new(node, PinSlot(0));
        storage.write(id, counter.clone());
        assert!(storage.is_written(id));

        storage.reset_frame();
        assert!(!storage.is_written(id));
        // The stored clone was dropped by reset_frame, so only our own handle remains.
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn preserve_across_frames_survives_reset() {
        let node = node();
        let mut builder = PinStorageBuilder::new();
        let descriptor = PinDescriptor::data::<u32>("history", PinDirection::Out);
        builder.add(node, PinSlot(0), &descriptor, true);
        let mut storage = builder.build();

        let id = PinId::new(node, PinSlot(0));
        storage.write(id, 42u32);
        storage.reset_frame();

        assert!(storage.is_written(id));
        assert_eq!(*storage.read::<u32>(id), 42);
    }

    #[test]
    fn sink_cleared_every_frame_regardless_of_preserve_flag() {
        let node = node();
        let mut builder = PinStorageBuilder::new();
        let descriptor = PinDescriptor::sink::<u32>("lights");
        builder.add(node, PinSlot(0), &descriptor, true);
        let mut storage = builder.build();

        let id = PinId::new(node, PinSlot(0));
        storage.sink_push(id, 1u32);
        storage.reset_frame();

        assert!(storage.sink_values::<u32>(id).is_empty());
    }
}
