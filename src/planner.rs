//! Topological Planner (C4).
//!
//! Linearizes a [`GraphTemplate`]'s node instances into one deterministic
//! execution order, and derives each resource pin's lifetime window (the
//! `[first_use, last_use]` span, in that order) the transient pool uses to
//! decide which resources may alias.
//!
//! The template's dependency graph never changes between frames, so a
//! `Plan` is computed once, at [`crate::graph::FrameGraph`] construction, and
//! reused for every frame after that (§8 determinism invariant: the same
//! template always linearizes to the same order).

use petgraph::Direction;

use fxhash::FxHashMap;

use crate::error::TemplateError;
use crate::ids::{NodeIndex, PinId};
use crate::pin::PinKind;
use crate::registry::NodeRegistry;
use crate::template::GraphTemplate;

/// The node span over which a resource pin's binding is live.
#[derive(Copy, Clone, Debug)]
pub struct ResourceLifetime {
    pub source_pin: PinId,
    pub first_use: usize,
    pub last_use: usize,
}

/// A linearized, ready-to-execute template.
pub struct Plan {
    pub order: Vec<NodeIndex>,
    position: FxHashMap<NodeIndex, usize>,
    pub lifetimes: Vec<ResourceLifetime>,
}

impl Plan {
    pub fn position_of(&self, node: NodeIndex) -> usize {
        self.position[&node]
    }
}

/// Kahn's algorithm with the ready set broken by template insertion order,
/// rather than petgraph's default DFS-based toposort, so the result doesn't
/// depend on internal graph storage order — only on what the caller wrote.
pub fn plan(template: &GraphTemplate, registry: &NodeRegistry) -> Result<Plan, TemplateError> {
    let node_priority: FxHashMap<NodeIndex, usize> =
        template.nodes_in_order().iter().enumerate().map(|(i, &n)| (n, i)).collect();

    let graph = &template.dependency_graph;
    let mut graph_index_of: FxHashMap<NodeIndex, petgraph::graph::NodeIndex<u32>> = FxHashMap::default();
    for gi in graph.node_indices() {
        graph_index_of.insert(graph[gi], gi);
    }

    let mut in_degree: FxHashMap<petgraph::graph::NodeIndex<u32>, usize> = FxHashMap::default();
    for gi in graph.node_indices() {
        in_degree.insert(gi, graph.neighbors_directed(gi, Direction::Incoming).count());
    }

    let mut ready: Vec<petgraph::graph::NodeIndex<u32>> =
        in_degree.iter().filter(|&(_, &deg)| deg == 0).map(|(&gi, _)| gi).collect();

    let mut order = Vec::with_capacity(template.node_count());
    let mut position = FxHashMap::default();

    while !ready.is_empty() {
        ready.sort_by_key(|&gi| node_priority[&graph[gi]]);
        let gi = ready.remove(0);
        let node = graph[gi];
        position.insert(node, order.len());
        order.push(node);

        let successors: Vec<_> = graph.neighbors_directed(gi, Direction::Outgoing).collect();
        for succ in successors {
            let deg = in_degree.get_mut(&succ).expect("successor present in in_degree map");
            *deg -= 1;
            if *deg == 0 {
                ready.push(succ);
            }
        }
    }

    if order.len() != template.node_count() {
        return Err(TemplateError::CyclicGraph);
    }

    let lifetimes = resource_lifetimes(template, registry, &position);

    Ok(Plan { order, position, lifetimes })
}

fn resource_lifetimes(
    template: &GraphTemplate,
    registry: &NodeRegistry,
    position: &FxHashMap<NodeIndex, usize>,
) -> Vec<ResourceLifetime> {
    let mut spans: FxHashMap<PinId, (usize, usize)> = FxHashMap::default();

    for connection in template.connections() {
        let to_descriptor = registry.find(template.node_type(connection.to.node)).expect("validated template");
        let to_pin = &to_descriptor.pins[connection.to.slot.0 as usize];
        if to_pin.kind != PinKind::Resource {
            continue;
        }
        let producer_pos = position[&connection.from.node];
        let consumer_pos = position[&connection.to.node];
        spans
            .entry(connection.from)
            .and_modify(|(_, last)| *last = (*last).max(consumer_pos))
            .or_insert((producer_pos, producer_pos.max(consumer_pos)));
    }

    let mut lifetimes: Vec<ResourceLifetime> = spans
        .into_iter()
        .map(|(source_pin, (first_use, last_use))| ResourceLifetime { source_pin, first_use, last_use })
        .collect();
    lifetimes.sort_by_key(|l| (l.first_use, l.source_pin.node, l.source_pin.slot));
    lifetimes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildContext;
    use crate::execute::ExecuteContext;
    use crate::init::InitContext;
    use crate::pin::{PinDescriptor, PinDirection};
    use crate::registry::NodeDescriptor;
    use crate::template::{ConnectionSpec, NodeInstantiation};

    fn noop_construct() -> Box<dyn std::any::Any> {
        Box::new(())
    }
    fn noop_init(_: &mut dyn std::any::Any, _: &InitContext<'_>) {}
    fn noop_build(_: &mut dyn std::any::Any, _: &mut BuildContext<'_>) {}
    fn noop_execute(_: &dyn std::any::Any, _: &mut ExecuteContext<'_>) {}

    fn register(registry: &mut NodeRegistry, name: &'static str) -> crate::ids::NodeTypeId {
        let id = crate::ids::NodeTypeId::from_name(name);
        let pins = vec![
            PinDescriptor::data::<u32>("out", PinDirection::Out),
            PinDescriptor::data::<u32>("in", PinDirection::In),
        ];
        registry
            .register(id, NodeDescriptor { name, pins, construct: noop_construct, init: noop_init, build: noop_build, execute: noop_execute })
            .unwrap();
        id
    }

    #[test]
    fn every_connection_respects_topological_order() {
        let mut registry = NodeRegistry::new();
        let t = register(&mut registry, "node");

        // Instantiated out of dependency order (c, a, b) to make sure the
        // plan reorders by the dependency graph, not by instantiation order.
        let nodes = vec![NodeInstantiation::new(t, "c"), NodeInstantiation::new(t, "a"), NodeInstantiation::new(t, "b")];
        let connections = vec![
            ConnectionSpec { from_node: 1, from_pin: crate::ids::PinSlot(0), to_node: 2, to_pin: crate::ids::PinSlot(1) },
            ConnectionSpec { from_node: 2, from_pin: crate::ids::PinSlot(0), to_node: 0, to_pin: crate::ids::PinSlot(1) },
        ];
        let template = crate::template::GraphTemplate::build(&registry, nodes, connections).unwrap();
        let computed = plan(&template, &registry).unwrap();

        for connection in template.connections() {
            assert!(computed.position_of(connection.from.node) < computed.position_of(connection.to.node));
        }
    }

    #[test]
    fn independent_nodes_keep_instantiation_order() {
        let mut registry = NodeRegistry::new();
        let t = register(&mut registry, "node");

        let nodes = vec![NodeInstantiation::new(t, "first"), NodeInstantiation::new(t, "second")];
        let template = crate::template::GraphTemplate::build(&registry, nodes, vec![]).unwrap();
        let computed = plan(&template, &registry).unwrap();

        let first = template.nodes_in_order()[0];
        let second = template.nodes_in_order()[1];
        assert!(computed.position_of(first) < computed.position_of(second));
    }
}
