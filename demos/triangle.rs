//! S1 Triangle, driven end to end: a `Producer` node writes a color
//! attachment, a `Present` node reads it back as a transfer source. Run with
//! `cargo run --example triangle` to see the planned order, the two barriers
//! the tracker inserts, and the one image the pool allocates.

use std::any::Any;

use oblivion_frame_graph::build::BuildContext;
use oblivion_frame_graph::device::mock::{MockDevice, MockPipelineCache, MockResidentTextures};
use oblivion_frame_graph::env::GraphEnv;
use oblivion_frame_graph::execute::ExecuteContext;
use oblivion_frame_graph::init::InitContext;
use oblivion_frame_graph::pin::{PinDescriptor, PinDirection, ResourcePin};
use oblivion_frame_graph::registry::{NodeDescriptor, NodeRegistry, NodeTypeId};
use oblivion_frame_graph::resource::{ImageAccess, ImageResourceInitializer, PassKind};
use oblivion_frame_graph::template::{ConnectionSpec, GraphTemplate, NodeInstantiation};
use oblivion_frame_graph::types::{Extent2D, Format};
use oblivion_frame_graph::{dot, FrameGraph};

struct Producer {
    color: ResourcePin,
}

impl Default for Producer {
    fn default() -> Self {
        Producer { color: ResourcePin::new(oblivion_frame_graph::ids::PinSlot(0)) }
    }
}

fn producer_build(node: &mut dyn Any, ctx: &mut BuildContext<'_>) {
    let node = node.downcast_mut::<Producer>().expect("Producer instance");
    ctx.begin_pass(PassKind::Graphics);
    ctx.create_image(node.color, ImageResourceInitializer::transient(Extent2D::new(800, 600), Format::Rgba8Unorm, "swapchain_color"));
    ctx.access_image(node.color, ImageAccess::ColorAttachment).expect("just created");
}

fn producer_execute(node: &dyn Any, ctx: &mut ExecuteContext<'_>) {
    let node = node.downcast_ref::<Producer>().expect("Producer instance");
    let _image = ctx.image(node.color);
    // A real node would bind a pipeline and draw here; the mock device only
    // needs the barrier and allocation side of this demo.
}

struct Present {
    color: ResourcePin,
}

impl Default for Present {
    fn default() -> Self {
        Present { color: ResourcePin::new(oblivion_frame_graph::ids::PinSlot(0)) }
    }
}

fn present_build(node: &mut dyn Any, ctx: &mut BuildContext<'_>) {
    let node = node.downcast_mut::<Present>().expect("Present instance");
    ctx.begin_pass(PassKind::Transfer);
    ctx.access_image(node.color, ImageAccess::TransferSrc).expect("producer ran first");
}

fn present_execute(node: &dyn Any, ctx: &mut ExecuteContext<'_>) {
    let node = node.downcast_ref::<Present>().expect("Present instance");
    let _image = ctx.image(node.color);
}

fn noop_init(_node: &mut dyn Any, _ctx: &InitContext<'_>) {}

fn construct_producer() -> Box<dyn Any> {
    Box::<Producer>::default()
}

fn construct_present() -> Box<dyn Any> {
    Box::<Present>::default()
}

fn main() {
    pretty_env_logger::init();

    let mut registry = NodeRegistry::new();
    let producer_id = NodeTypeId::from_name("triangle.producer");
    let present_id = NodeTypeId::from_name("triangle.present");

    registry
        .register(
            producer_id,
            NodeDescriptor {
                name: "Producer",
                pins: vec![PinDescriptor::resource("color", PinDirection::Out)],
                construct: construct_producer,
                init: noop_init,
                build: producer_build,
                execute: producer_execute,
            },
        )
        .expect("first registration of Producer");
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
        .expect("first registration of Present");

    let nodes = vec![
        NodeInstantiation::new(producer_id, "producer"),
        NodeInstantiation::new(present_id, "present"),
    ];
    let connections = vec![ConnectionSpec {
        from_node: 0,
        from_pin: oblivion_frame_graph::ids::PinSlot(0),
        to_node: 1,
        to_pin: oblivion_frame_graph::ids::PinSlot(0),
    }];

    let template = GraphTemplate::build(&registry, nodes, connections).expect("S1 template is valid");

    let device = MockDevice::new();
    let pipeline_cache = MockPipelineCache::new();
    let resident_textures = MockResidentTextures::new();
    let env = GraphEnv { registry: &registry, device: &device, pipeline_cache: &pipeline_cache, resident_textures: &resident_textures };

    let mut graph = FrameGraph::new(template, &registry, &env, &Default::default()).expect("plan is acyclic");

    graph.execute_frame(&env, 1).expect("frame builds and submits cleanly");

    let mut out = String::new();
    dot::write_dot(&mut out, graph.template(), &registry, Some(graph.plan()), None).expect("dot render");
    println!("{out}");
    println!("live images in pool after frame: {}", device.live_image_count());
}
