//! Graph runtime (C11).
//!
//! [`FrameGraph`] owns a validated [`GraphTemplate`], its linearized
//! [`Plan`], the live node instances, and the per-frame collaborators
//! (transient pool, staging ring). [`FrameGraph::execute_frame`] is the one
//! entry point a driver calls every frame; it sequences build → sink
//! fan-in → resource materialization → barrier computation → execute →
//! submit, exactly the pipeline described in the data model.

use std::any::Any;

use fxhash::FxHashMap;
use slotmap::SecondaryMap;

use crate::barrier::{BarrierTracker, StableBarrierState};
use crate::build::{AccessLog, BuildContext};
use crate::config::GraphConfig;
use crate::device::{Command, CommandRecorder};
use crate::env::GraphEnv;
use crate::error::{ExecuteError, FrameError, TemplateError};
use crate::execute::ExecuteContext;
use crate::ids::{NodeIndex, PinId, PinSlot};
use crate::init::InitContext;
use crate::pin::{PinKind, PinStorage, PinStorageBuilder};
use crate::planner::{self, Plan};
use crate::pool::TransientPool;
use crate::registry::NodeRegistry;
use crate::staging::StagingUploader;
use crate::template::GraphTemplate;

fn instantiate_nodes(
    template: &GraphTemplate,
    registry: &NodeRegistry,
    env: &GraphEnv<'_>,
) -> SecondaryMap<NodeIndex, Box<dyn Any>> {
    let mut nodes = SecondaryMap::new();
    let init_ctx = InitContext::new(env);
    for &index in template.nodes_in_order() {
        let descriptor = registry.find(template.node_type(index)).expect("template validated against this registry");
        let mut instance = (descriptor.construct)();
        (descriptor.init)(instance.as_mut(), &init_ctx);
        nodes.insert(index, instance);
    }
    nodes
}

fn build_storage(template: &GraphTemplate, registry: &NodeRegistry) -> PinStorage {
    let mut builder = PinStorageBuilder::new();
    for &index in template.nodes_in_order() {
        let descriptor = registry.find(template.node_type(index)).expect("template validated against this registry");
        for (i, pin) in descriptor.pins.iter().enumerate() {
            builder.add(index, PinSlot(i as u16), pin, false);
        }
    }
    builder.build()
}

/// Maps a non-sink input pin to the output pin it's connected from. Sink
/// inputs are deliberately excluded: they may have many producers, so
/// there's no single "source" to redirect an access to — sink reads always
/// address the sink's own storage slot directly.
fn build_source_of(template: &GraphTemplate, registry: &NodeRegistry) -> FxHashMap<PinId, PinId> {
    let mut map = FxHashMap::default();
    for connection in template.connections() {
        let to_descriptor =
            registry.find(template.node_type(connection.to.node)).expect("template validated against this registry");
        let to_pin = &to_descriptor.pins[connection.to.slot.0 as usize];
        if to_pin.kind != PinKind::Sink {
            map.insert(connection.to, connection.from);
        }
    }
    map
}

/// A validated template, instantiated and ready to run frames against.
pub struct FrameGraph<'r> {
    template: GraphTemplate,
    plan: Plan,
    registry: &'r NodeRegistry,
    nodes: SecondaryMap<NodeIndex, Box<dyn Any>>,
    storage: PinStorage,
    source_of: FxHashMap<PinId, PinId>,
    access_log: AccessLog,
    pool: TransientPool,
    staging: StagingUploader,
    stable_barrier_state: StableBarrierState,
    frame_index: u64,
    max_idle_images: usize,
    max_idle_buffers: usize,
}

impl<'r> FrameGraph<'r> {
    pub fn new(
        template: GraphTemplate,
        registry: &'r NodeRegistry,
        env: &GraphEnv<'_>,
        config: &GraphConfig,
    ) -> Result<Self, TemplateError> {
        let plan = planner::plan(&template, registry)?;
        let storage = build_storage(&template, registry);
        let source_of = build_source_of(&template, registry);
        let nodes = instantiate_nodes(&template, registry, env);

        Ok(FrameGraph {
            template,
            plan,
            registry,
            nodes,
            storage,
            source_of,
            access_log: AccessLog::default(),
            pool: TransientPool::new(config.stable_retire_frames),
            staging: StagingUploader::new(config.staging_ring_capacity),
            stable_barrier_state: StableBarrierState::default(),
            frame_index: 0,
            max_idle_images: config.max_idle_images,
            max_idle_buffers: config.max_idle_buffers,
        })
    }

    pub fn template(&self) -> &GraphTemplate {
        &self.template
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Writes an external value directly into a node's input data pin,
    /// bypassing the connection graph — the entry point driver code uses to
    /// feed frame-external state (camera matrices, timing, input events)
    /// into the graph before [`Self::execute_frame`].
    pub fn set_input<T: 'static>(&mut self, node: NodeIndex, slot: PinSlot, value: T) {
        self.storage.write(PinId::new(node, slot), value);
    }

    /// Appends an external contribution directly into a node's sink pin,
    /// bypassing the connection graph.
    pub fn push_sink<T: 'static>(&mut self, node: NodeIndex, slot: PinSlot, value: T) {
        self.storage.sink_push(PinId::new(node, slot), value);
    }

    /// Reads a node's output data pin after a frame has run. Intended for
    /// tests and diagnostics, not for driving the graph itself.
    pub fn output<T: 'static>(&self, node: NodeIndex, slot: PinSlot) -> &T {
        self.storage.read(PinId::new(node, slot))
    }

    /// Reads a node's sink pin contributions after a frame has run.
    pub fn sink_output<T: 'static>(&self, node: NodeIndex, slot: PinSlot) -> &[T] {
        self.storage.sink_values(PinId::new(node, slot))
    }

    pub fn execute_frame(&mut self, env: &GraphEnv<'_>, frame_index: u64) -> Result<(), FrameError> {
        self.storage.reset_frame();
        self.access_log.clear();

        let mut build_errors = Vec::new();
        for &node in &self.plan.order {
            let descriptor =
                self.registry.find(self.template.node_type(node)).expect("template validated against this registry");
            let instance = self.nodes.get_mut(node).expect("every planned node has an instance");
            let mut ctx =
                BuildContext::new(node, &mut self.storage, &self.source_of, &mut self.access_log, &mut build_errors);
            (descriptor.build)(instance.as_mut(), &mut ctx);
        }
        if !build_errors.is_empty() {
            for err in &build_errors {
                log::error!("frame {frame_index} dropped: {err}");
            }
            return Err(FrameError::Build(build_errors));
        }

        for connection in self.template.connections() {
            let to_descriptor = self
                .registry
                .find(self.template.node_type(connection.to.node))
                .expect("template validated against this registry");
            if to_descriptor.pins[connection.to.slot.0 as usize].kind == PinKind::Sink {
                self.storage.propagate_to_sink(connection.from, connection.to);
            }
        }

        let resolved = self.pool.materialize(env.device, &self.access_log, &self.plan.lifetimes).map_err(|e| {
            log::error!("frame {frame_index} dropped: {e}");
            FrameError::Build(vec![e])
        })?;

        for op in &self.access_log.buffer_ops {
            if let crate::build::BufferOp::Upload { pin, data } = op {
                if let Some(handle) = resolved.buffers.get(pin) {
                    let region = self.staging.write(data, 16, frame_index).map_err(|e| {
                        log::error!("frame {frame_index} dropped: {e} (pin {pin:?})");
                        FrameError::Build(vec![e])
                    })?;
                    env.device.write_buffer(*handle, 0, self.staging.read(region));
                }
            }
        }

        let barriers = BarrierTracker::compute(&self.access_log, &resolved, &mut self.stable_barrier_state);

        let mut recorder = CommandRecorder::default();
        for &node in &self.plan.order {
            if let Some(batch) = barriers.get(&node) {
                if !batch.is_empty() {
                    recorder.push(Command::Barrier(batch.clone()));
                }
            }
            let pass_kind = self.access_log.pass_kinds.get(&node).copied().unwrap_or_default();
            recorder.push(Command::BeginPass { node, kind: pass_kind });

            let descriptor =
                self.registry.find(self.template.node_type(node)).expect("template validated against this registry");
            let instance = self.nodes.get(node).expect("every planned node has an instance");
            let mut ctx = ExecuteContext::new(
                node,
                &self.storage,
                &self.source_of,
                &resolved.images,
                &resolved.buffers,
                env.pipeline_cache,
                &mut recorder,
            );
            (descriptor.execute)(instance.as_ref(), &mut ctx);
            recorder.push(Command::EndPass { node });
        }

        let token = env.device.submit(recorder).map_err(|_| {
            log::error!("frame {frame_index} submit failed: device lost");
            FrameError::Execute(ExecuteError::DeviceLost)
        })?;
        env.device.wait(token);
        self.staging.reclaim(frame_index);
        self.pool.shrink_to(env.device, self.max_idle_images, self.max_idle_buffers);

        self.frame_index = frame_index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockDevice, MockPipelineCache, MockResidentTextures};
    use crate::device::{Command, GpuDevice};
    use crate::pin::{PinDescriptor, PinDirection, ResourcePin};
    use crate::registry::{NodeDescriptor, NodeTypeId};
    use crate::resource::{ImageAccess, ImageResourceInitializer};
    use crate::template::{ConnectionSpec, NodeInstantiation};
    use crate::types::{Extent2D, Format};

    struct Producer {
        color: ResourcePin,
        stable: bool,
    }

    fn producer_build(node: &mut Any, ctx: &mut BuildContext<'_>) {
        let node = node.downcast_mut::<Producer>().expect("Producer instance");
        ctx.begin_pass(crate::resource::PassKind::Graphics);
        let init = if node.stable {
            ImageResourceInitializer::stable(Extent2D::new(64, 64), Format::Rgba8Unorm, "history_color")
        } else {
            ImageResourceInitializer::transient(Extent2D::new(64, 64), Format::Rgba8Unorm, "scratch_color")
        };
        ctx.create_image(node.color, init);
        ctx.access_image(node.color, ImageAccess::ColorAttachment).expect("just created");
    }

    fn producer_execute(_node: &Any, _ctx: &mut ExecuteContext<'_>) {}

    struct Present {
        color: ResourcePin,
    }

    fn present_build(node: &mut Any, ctx: &mut BuildContext<'_>) {
        let node = node.downcast_mut::<Present>().expect("Present instance");
        ctx.begin_pass(crate::resource::PassKind::Transfer);
        ctx.access_image(node.color, ImageAccess::TransferSrc).expect("producer ran first");
    }

    fn present_execute(_node: &Any, _ctx: &mut ExecuteContext<'_>) {}

    fn noop_init(_node: &mut Any, _ctx: &InitContext<'_>) {}

    fn construct_transient_producer() -> Box<dyn Any> {
        Box::new(Producer { color: ResourcePin::new(PinSlot(0)), stable: false })
    }

    fn construct_stable_producer() -> Box<dyn Any> {
        Box::new(Producer { color: ResourcePin::new(PinSlot(0)), stable: true })
    }

    fn construct_present() -> Box<dyn Any> {
        Box::new(Present { color: ResourcePin::new(PinSlot(0)) })
    }

    fn build_registry(stable: bool) -> (NodeRegistry, NodeTypeId, NodeTypeId) {
        let mut registry = NodeRegistry::new();
        let producer_id = NodeTypeId::from_name(if stable { "test.stable_producer" } else { "test.producer" });
        let present_id = NodeTypeId::from_name("test.present");

        registry
            .register(
                producer_id,
                NodeDescriptor {
                    name: "Producer",
                    pins: vec![PinDescriptor::resource("color", PinDirection::Out)],
                    construct: if stable { construct_stable_producer } else { construct_transient_producer },
                    init: noop_init,
                    build: producer_build,
                    execute: producer_execute,
                },
            )
            .unwrap();
        registry
            .register(
                present_id,
                NodeDescriptor {
                    name: "Present",
                    pins: vec![PinDescriptor::resource("color", PinDirection::In)],
                    construct: construct_present,
                    init: noop_init,
                    build: present_build,
                    execute: present_execute,
                },
            )
            .unwrap();

        (registry, producer_id, present_id)
    }

    fn build_template(registry: &NodeRegistry, producer_id: NodeTypeId, present_id: NodeTypeId) -> GraphTemplate {
        let nodes = vec![NodeInstantiation::new(producer_id, "producer"), NodeInstantiation::new(present_id, "present")];
        let connections = vec![ConnectionSpec { from_node: 0, from_pin: PinSlot(0), to_node: 1, to_pin: PinSlot(0) }];
        GraphTemplate::build(registry, nodes, connections).unwrap()
    }

    #[test]
    fn triangle_scenario_allocates_one_image_and_runs_in_order() {
        let (registry, producer_id, present_id) = build_registry(false);
        let template = build_template(&registry, producer_id, present_id);

        let device = MockDevice::new();
        let pipeline_cache = MockPipelineCache::new();
        let resident_textures = MockResidentTextures::new();
        let env = GraphEnv { registry: &registry, device: &device, pipeline_cache: &pipeline_cache, resident_textures: &resident_textures };

        let mut graph = FrameGraph::new(template, &registry, &env, &GraphConfig::default()).unwrap();
        let producer = graph.plan().order[0];
        let present = graph.plan().order[1];
        assert!(graph.plan().position_of(producer) < graph.plan().position_of(present));

        graph.execute_frame(&env, 1).unwrap();
        assert_eq!(device.live_image_count(), 1);
    }

    #[test]
    fn identical_graphs_submit_identical_command_streams() {
        let (registry, producer_id, present_id) = build_registry(false);

        let device_a = MockDevice::new();
        let pipeline_cache = MockPipelineCache::new();
        let resident_textures = MockResidentTextures::new();
        let env_a = GraphEnv { registry: &registry, device: &device_a, pipeline_cache: &pipeline_cache, resident_textures: &resident_textures };
        let template_a = build_template(&registry, producer_id, present_id);
        let mut graph_a = FrameGraph::new(template_a, &registry, &env_a, &GraphConfig::default()).unwrap();
        graph_a.execute_frame(&env_a, 1).unwrap();

        let device_b = MockDevice::new();
        let env_b = GraphEnv { registry: &registry, device: &device_b, pipeline_cache: &pipeline_cache, resident_textures: &resident_textures };
        let template_b = build_template(&registry, producer_id, present_id);
        let mut graph_b = FrameGraph::new(template_b, &registry, &env_b, &GraphConfig::default()).unwrap();
        graph_b.execute_frame(&env_b, 1).unwrap();

        assert_eq!(*device_a.submitted.borrow(), *device_b.submitted.borrow());
    }

    #[test]
    fn stable_resource_does_not_re_transition_from_undefined_next_frame() {
        let (registry, producer_id, present_id) = build_registry(true);
        let template = build_template(&registry, producer_id, present_id);

        let device = MockDevice::new();
        let pipeline_cache = MockPipelineCache::new();
        let resident_textures = MockResidentTextures::new();
        let env = GraphEnv { registry: &registry, device: &device, pipeline_cache: &pipeline_cache, resident_textures: &resident_textures };
        let mut graph = FrameGraph::new(template, &registry, &env, &GraphConfig::default()).unwrap();

        graph.execute_frame(&env, 1).unwrap();
        graph.execute_frame(&env, 2).unwrap();

        assert_eq!(device.live_image_count(), 1, "the stable image is never recreated");

        let submitted = device.submitted.borrow();
        let second_frame = &submitted[1];
        let undefined_transitions = second_frame
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::Barrier(batch) => Some(batch),
                _ => None,
            })
            .flat_map(|b| b.image_barriers.iter())
            .filter(|b| b.old_layout == ImageAccess::Undefined)
            .count();
        assert_eq!(undefined_transitions, 0, "a stable resource must carry its layout across frames");
    }

    struct Uploader {
        data: ResourcePin,
        resolved: std::cell::Cell<Option<crate::device::BufferHandle>>,
    }

    fn uploader_build(node: &mut Any, ctx: &mut BuildContext<'_>) {
        let node = node.downcast_mut::<Uploader>().expect("Uploader instance");
        ctx.begin_pass(crate::resource::PassKind::Transfer);
        let init = crate::resource::BufferResourceInitializer::transient(16, "roundtrip_buf");
        ctx.create_buffer(node.data, init);
        ctx.access_buffer(node.data, crate::resource::BufferAccess::Write(crate::resource::BufferUsage::STORAGE_UPLOAD))
            .expect("just created");
        ctx.upload(node.data, b"round-trip bytes".to_vec());
    }

    fn uploader_execute(node: &Any, ctx: &mut ExecuteContext<'_>) {
        let node = node.downcast_ref::<Uploader>().expect("Uploader instance");
        node.resolved.set(Some(ctx.buffer(node.data)));
    }

    fn construct_uploader() -> Box<dyn Any> {
        Box::new(Uploader { data: ResourcePin::new(PinSlot(0)), resolved: std::cell::Cell::new(None) })
    }

    #[test]
    fn uploaded_bytes_are_read_back_unchanged() {
        let mut registry = NodeRegistry::new();
        let uploader_id = NodeTypeId::from_name("test.uploader");
        registry
            .register(
                uploader_id,
                NodeDescriptor {
                    name: "Uploader",
                    pins: vec![PinDescriptor::resource("data", PinDirection::Out)],
                    construct: construct_uploader,
                    init: noop_init,
                    build: uploader_build,
                    execute: uploader_execute,
                },
            )
            .unwrap();

        let nodes = vec![NodeInstantiation::new(uploader_id, "uploader")];
        let template = GraphTemplate::build(&registry, nodes, vec![]).unwrap();

        let device = MockDevice::new();
        let pipeline_cache = MockPipelineCache::new();
        let resident_textures = MockResidentTextures::new();
        let env = GraphEnv { registry: &registry, device: &device, pipeline_cache: &pipeline_cache, resident_textures: &resident_textures };

        let mut graph = FrameGraph::new(template, &registry, &env, &GraphConfig::default()).unwrap();
        graph.execute_frame(&env, 1).unwrap();

        let node = graph.nodes.get(graph.plan().order[0]).unwrap().downcast_ref::<Uploader>().unwrap();
        let handle = node.resolved.get().expect("execute resolved the buffer");
        let read_back = device.read_buffer(handle, 0, b"round-trip bytes".len());
        assert_eq!(read_back, b"round-trip bytes");
    }
}
