//! Diagnostics (C13).
//!
//! Renders a [`GraphTemplate`] and, optionally, one frame's computed
//! [`Plan`] and barrier schedule as Graphviz `dot` source: one node per
//! graph node, one edge per connection, pins distinguished by kind, barrier
//! counts annotated on nodes that needed one. Intended to be piped straight
//! into `dot -Tsvg` by a developer debugging a stuck or surprising graph.

use std::fmt::Write as _;

use fxhash::FxHashMap;

use crate::barrier::BarrierBatch;
use crate::ids::NodeIndex;
use crate::pin::PinKind;
use crate::planner::Plan;
use crate::registry::NodeRegistry;
use crate::template::GraphTemplate;

fn pin_color(kind: PinKind) -> &'static str {
    match kind {
        PinKind::Data => "steelblue",
        PinKind::Resource => "darkorange",
        PinKind::Sink => "seagreen",
    }
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// Writes a graph template (and, if given, its plan and barrier schedule) to
/// `out` as Graphviz `dot` source.
pub fn write_dot(
    out: &mut String,
    template: &GraphTemplate,
    registry: &NodeRegistry,
    plan: Option<&Plan>,
    barriers: Option<&FxHashMap<NodeIndex, BarrierBatch>>,
) -> std::fmt::Result {
    writeln!(out, "digraph frame_graph {{")?;
    writeln!(out, "  rankdir=LR;")?;
    writeln!(out, "  node [shape=box, fontname=\"monospace\"];")?;

    for &node in template.nodes_in_order() {
        let descriptor = registry.find(template.node_type(node)).expect("template validated against this registry");
        let label_name = template.node_name(node);
        let position = plan.map(|p| p.position_of(node));
        let barrier_count = barriers
            .and_then(|b| b.get(&node))
            .map(|b| b.image_barriers.len() + b.buffer_barriers.len())
            .unwrap_or(0);

        let mut label = format!("{label_name}\\n({})", descriptor.name);
        if let Some(pos) = position {
            let _ = write!(label, "\\n#{pos}");
        }
        if barrier_count > 0 {
            let _ = write!(label, "\\n{barrier_count} barrier(s)");
        }
        let color = if barrier_count > 0 { "firebrick" } else { "black" };
        writeln!(out, "  n{} [label=\"{label}\", color={color}];", sanitize(&format!("{node:?}")))?;
    }

    for connection in template.connections() {
        let from_descriptor =
            registry.find(template.node_type(connection.from.node)).expect("template validated against this registry");
        let to_descriptor =
            registry.find(template.node_type(connection.to.node)).expect("template validated against this registry");
        let from_pin = &from_descriptor.pins[connection.from.slot.0 as usize];
        let to_pin = &to_descriptor.pins[connection.to.slot.0 as usize];

        writeln!(
            out,
            "  n{} -> n{} [label=\"{}\", color={}];",
            sanitize(&format!("{:?}", connection.from.node)),
            sanitize(&format!("{:?}", connection.to.node)),
            from_pin.name,
            pin_color(to_pin.kind),
        )?;
    }

    writeln!(out, "}}")?;
    Ok(())
}
