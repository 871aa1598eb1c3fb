//! Graph Template (C2).
//!
//! The immutable, validated-once authored description: a set of node
//! instances, their pins, and the connections between pins. Validation
//! happens exactly once, in [`GraphTemplate::build`]; everything downstream
//! (planner, build context, barrier tracker) trusts the template without
//! re-checking it.

use std::collections::HashSet;

use petgraph::graph::DiGraph;
use slotmap::SlotMap;

pub use crate::ids::{NodeIndex, PinSlot};
use crate::ids::{NodeTypeId, PinId};
use crate::error::TemplateError;
use crate::pin::PinDirection;
use crate::registry::NodeRegistry;

/// One requested node instance: which type to construct and a debug name
/// used in logs and the graphviz dump.
#[derive(Clone, Debug)]
pub struct NodeInstantiation {
    pub type_id: NodeTypeId,
    pub debug_name: String,
}

impl NodeInstantiation {
    pub fn new(type_id: NodeTypeId, debug_name: impl Into<String>) -> Self {
        NodeInstantiation { type_id, debug_name: debug_name.into() }
    }
}

/// A requested connection, addressed by position in the `nodes` slice passed
/// to [`GraphTemplate::build`] (node instances don't have a stable index
/// until they've been inserted into the template).
#[derive(Copy, Clone, Debug)]
pub struct ConnectionSpec {
    pub from_node: usize,
    pub from_pin: PinSlot,
    pub to_node: usize,
    pub to_pin: PinSlot,
}

/// A validated connection between two live pin instances.
#[derive(Copy, Clone, Debug)]
pub struct Connection {
    pub from: PinId,
    pub to: PinId,
}

#[derive(Debug)]
pub(crate) struct TemplateNode {
    pub type_id: NodeTypeId,
    pub debug_name: String,
}

/// An immutable, validated graph description. Instantiate it into a live
/// [`crate::graph::FrameGraph`] to actually run frames.
pub struct GraphTemplate {
    pub(crate) nodes: SlotMap<NodeIndex, TemplateNode>,
    /// Insertion order, used for the planner's lexicographic tie-break.
    pub(crate) order: Vec<NodeIndex>,
    pub(crate) connections: Vec<Connection>,
    /// Dependency graph over node instances, built from every connection
    /// (data and resource edges alike), used by both the up-front cycle
    /// check here and by the per-frame planner.
    pub(crate) dependency_graph: DiGraph<NodeIndex, ()>,
}

impl GraphTemplate {
    pub fn build(
        registry: &NodeRegistry,
        nodes: Vec<NodeInstantiation>,
        connections: Vec<ConnectionSpec>,
    ) -> Result<GraphTemplate, TemplateError> {
        let mut slotmap_nodes: SlotMap<NodeIndex, TemplateNode> = SlotMap::with_key();
        let mut order = Vec::with_capacity(nodes.len());
        let mut positions = Vec::with_capacity(nodes.len());

        for instantiation in &nodes {
            if registry.find(instantiation.type_id).is_none() {
                return Err(TemplateError::UnknownNodeType(instantiation.type_id));
            }
            let index = slotmap_nodes.insert(TemplateNode {
                type_id: instantiation.type_id,
                debug_name: instantiation.debug_name.clone(),
            });
            order.push(index);
            positions.push(index);
        }

        let mut validated = Vec::with_capacity(connections.len());
        let mut seen_inputs: HashSet<PinId> = HashSet::new();

        let mut dependency_graph = DiGraph::<NodeIndex, ()>::new();
        let mut graph_node_of: fxhash::FxHashMap<NodeIndex, petgraph::graph::NodeIndex<u32>> =
            fxhash::FxHashMap::default();
        for &index in &order {
            let gi = dependency_graph.add_node(index);
            graph_node_of.insert(index, gi);
        }

        for spec in &connections {
            let from_node = *positions
                .get(spec.from_node)
                .ok_or(TemplateError::UnknownPin { node: NodeIndex::default(), slot: spec.from_pin })?;
            let to_node = *positions
                .get(spec.to_node)
                .ok_or(TemplateError::UnknownPin { node: NodeIndex::default(), slot: spec.to_pin })?;

            let from_descriptor = registry.find(slotmap_nodes[from_node].type_id).unwrap();
            let to_descriptor = registry.find(slotmap_nodes[to_node].type_id).unwrap();

            let from_pin = from_descriptor
                .pins
                .get(spec.from_pin.0 as usize)
                .ok_or(TemplateError::UnknownPin { node: from_node, slot: spec.from_pin })?;
            let to_pin = to_descriptor
                .pins
                .get(spec.to_pin.0 as usize)
                .ok_or(TemplateError::UnknownPin { node: to_node, slot: spec.to_pin })?;

            if from_pin.direction != PinDirection::Out {
                return Err(TemplateError::PinKindMismatch { node: from_node, slot: spec.from_pin });
            }
            if to_pin.direction != PinDirection::In {
                return Err(TemplateError::PinKindMismatch { node: to_node, slot: spec.to_pin });
            }

            let to_id = PinId::new(to_node, spec.to_pin);
            let is_sink = matches!(to_pin.kind, crate::pin::PinKind::Sink);

            if is_sink {
                if from_pin.kind != crate::pin::PinKind::Data {
                    return Err(TemplateError::PinKindMismatch { node: from_node, slot: spec.from_pin });
                }
            } else {
                if from_pin.kind != to_pin.kind {
                    return Err(TemplateError::PinKindMismatch { node: to_node, slot: spec.to_pin });
                }
                if seen_inputs.contains(&to_id) {
                    return Err(TemplateError::DuplicateInput { node: to_node, slot: spec.to_pin });
                }
                seen_inputs.insert(to_id);
            }

            if from_pin.type_info.type_id != to_pin.type_info.type_id {
                return Err(TemplateError::TypeMismatch { node: to_node, slot: spec.to_pin });
            }

            dependency_graph.add_edge(graph_node_of[&from_node], graph_node_of[&to_node], ());

            validated.push(Connection { from: PinId::new(from_node, spec.from_pin), to: to_id });
        }

        if petgraph::algo::toposort(&dependency_graph, None).is_err() {
            return Err(TemplateError::CyclicGraph);
        }

        Ok(GraphTemplate { nodes: slotmap_nodes, order, connections: validated, dependency_graph })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_type(&self, index: NodeIndex) -> NodeTypeId {
        self.nodes[index].type_id
    }

    pub fn node_name(&self, index: NodeIndex) -> &str {
        &self.nodes[index].debug_name
    }

    pub fn nodes_in_order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildContext;
    use crate::execute::ExecuteContext;
    use crate::init::InitContext;
    use crate::pin::{PinDescriptor, PinDirection};
    use crate::registry::NodeDescriptor;

    fn noop_construct() -> Box<dyn std::any::Any> {
        Box::new(())
    }
    fn noop_init(_: &mut dyn std::any::Any, _: &InitContext<'_>) {}
    fn noop_build(_: &mut dyn std::any::Any, _: &mut BuildContext<'_>) {}
    fn noop_execute(_: &dyn std::any::Any, _: &mut ExecuteContext<'_>) {}

    fn register_with_pins(registry: &mut NodeRegistry, name: &'static str, pins: Vec<PinDescriptor>) -> NodeTypeId {
        let id = NodeTypeId::from_name(name);
        registry
            .register(id, NodeDescriptor { name, pins, construct: noop_construct, init: noop_init, build: noop_build, execute: noop_execute })
            .unwrap();
        id
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let registry = NodeRegistry::new();
        let bogus = NodeTypeId::from_name("nothing.registered");
        let err = GraphTemplate::build(&registry, vec![NodeInstantiation::new(bogus, "n")], vec![]).unwrap_err();
        assert_eq!(err, TemplateError::UnknownNodeType(bogus));
    }

    #[test]
    fn connecting_an_input_to_an_input_is_rejected() {
        let mut registry = NodeRegistry::new();
        let a = register_with_pins(&mut registry, "a", vec![PinDescriptor::data::<u32>("x", PinDirection::In)]);
        let b = register_with_pins(&mut registry, "b", vec![PinDescriptor::data::<u32>("y", PinDirection::In)]);

        let nodes = vec![NodeInstantiation::new(a, "a"), NodeInstantiation::new(b, "b")];
        let connections = vec![ConnectionSpec { from_node: 0, from_pin: PinSlot(0), to_node: 1, to_pin: PinSlot(0) }];
        let err = GraphTemplate::build(&registry, nodes, connections).unwrap_err();
        assert!(matches!(err, TemplateError::PinKindMismatch { .. }));
    }

    #[test]
    fn a_second_connection_to_the_same_input_is_rejected() {
        let mut registry = NodeRegistry::new();
        let source = register_with_pins(&mut registry, "source", vec![PinDescriptor::data::<u32>("out", PinDirection::Out)]);
        let sink = register_with_pins(&mut registry, "sink", vec![PinDescriptor::data::<u32>("in", PinDirection::In)]);

        let nodes = vec![NodeInstantiation::new(source, "s1"), NodeInstantiation::new(source, "s2"), NodeInstantiation::new(sink, "t")];
        let connections = vec![
            ConnectionSpec { from_node: 0, from_pin: PinSlot(0), to_node: 2, to_pin: PinSlot(0) },
            ConnectionSpec { from_node: 1, from_pin: PinSlot(0), to_node: 2, to_pin: PinSlot(0) },
        ];
        let err = GraphTemplate::build(&registry, nodes, connections).unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateInput { .. }));
    }

    #[test]
    fn many_producers_may_feed_one_sink() {
        let mut registry = NodeRegistry::new();
        let source = register_with_pins(&mut registry, "source", vec![PinDescriptor::data::<u32>("out", PinDirection::Out)]);
        let sink = register_with_pins(&mut registry, "sink", vec![PinDescriptor::sink::<u32>("in")]);

        let nodes = vec![NodeInstantiation::new(source, "s1"), NodeInstantiation::new(source, "s2"), NodeInstantiation::new(sink, "t")];
        let connections = vec![
            ConnectionSpec { from_node: 0, from_pin: PinSlot(0), to_node: 2, to_pin: PinSlot(0) },
            ConnectionSpec { from_node: 1, from_pin: PinSlot(0), to_node: 2, to_pin: PinSlot(0) },
        ];
        let template = GraphTemplate::build(&registry, nodes, connections).unwrap();
        assert_eq!(template.connections().len(), 2);
    }

    #[test]
    fn mismatched_payload_types_are_rejected() {
        let mut registry = NodeRegistry::new();
        let source = register_with_pins(&mut registry, "source", vec![PinDescriptor::data::<u32>("out", PinDirection::Out)]);
        let sink = register_with_pins(&mut registry, "sink", vec![PinDescriptor::data::<f32>("in", PinDirection::In)]);

        let nodes = vec![NodeInstantiation::new(source, "s"), NodeInstantiation::new(sink, "t")];
        let connections = vec![ConnectionSpec { from_node: 0, from_pin: PinSlot(0), to_node: 1, to_pin: PinSlot(0) }];
        let err = GraphTemplate::build(&registry, nodes, connections).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn a_cycle_is_rejected() {
        let mut registry = NodeRegistry::new();
        let node_type = register_with_pins(
            &mut registry,
            "node",
            vec![PinDescriptor::data::<u32>("out", PinDirection::Out), PinDescriptor::data::<u32>("in", PinDirection::In)],
        );

        let nodes = vec![NodeInstantiation::new(node_type, "a"), NodeInstantiation::new(node_type, "b")];
        let connections = vec![
            ConnectionSpec { from_node: 0, from_pin: PinSlot(0), to_node: 1, to_pin: PinSlot(1) },
            ConnectionSpec { from_node: 1, from_pin: PinSlot(0), to_node: 0, to_pin: PinSlot(1) },
        ];
        let err = GraphTemplate::build(&registry, nodes, connections).unwrap_err();
        assert_eq!(err, TemplateError::CyclicGraph);
    }
}
