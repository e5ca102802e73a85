use std::collections::HashSet;

use crate::graph::{NodeGraph, NodeId, NodeKind};

/// Shape of the shader network feeding a material output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archetype {
    PurePrincipled,
    PureEmissive,
    /// A tree of mix shaders over principled (and optionally emission) leaves.
    Mixed,
    Invalid,
}

impl Archetype {
    pub fn name(self) -> &'static str {
        match self {
            Archetype::PurePrincipled => "principled",
            Archetype::PureEmissive => "emissive",
            Archetype::Mixed => "mixed",
            Archetype::Invalid => "invalid",
        }
    }
}

/// Node driving the active output's Surface input.
pub fn surface_source(graph: &NodeGraph) -> Option<(NodeId, NodeId)> {
    let output = graph.active_output()?;
    let link = graph.incoming(output, "Surface")?;
    Some((output, link.from))
}

pub fn classify(graph: &NodeGraph) -> Archetype {
    let Some((_, source)) = surface_source(graph) else {
        return Archetype::Invalid;
    };
    let Some(node) = graph.node(source) else {
        return Archetype::Invalid;
    };
    match node.kind {
        NodeKind::PrincipledBsdf => Archetype::PurePrincipled,
        NodeKind::Emission => Archetype::PureEmissive,
        NodeKind::MixShader => classify_mix_tree(graph, source),
        _ => Archetype::Invalid,
    }
}

fn classify_mix_tree(graph: &NodeGraph, root: NodeId) -> Archetype {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![root];
    let mut principled = false;
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(node) = graph.node(id) else {
            return Archetype::Invalid;
        };
        match node.kind {
            NodeKind::PrincipledBsdf => principled = true,
            NodeKind::Emission => {}
            NodeKind::MixShader => {
                for socket in ["Shader A", "Shader B"] {
                    if let Some(link) = graph.incoming(id, socket) {
                        stack.push(link.from);
                    }
                }
            }
            _ => return Archetype::Invalid,
        }
    }
    if principled {
        Archetype::Mixed
    } else {
        Archetype::Invalid
    }
}

/// A connected viewer node anywhere upstream of the output, i.e. between
/// the shaders and the output.
pub fn has_viewer_in_output_path(graph: &NodeGraph) -> bool {
    let Some(output) = graph.active_output() else {
        return false;
    };
    graph
        .upstream_reachable(output)
        .into_iter()
        .any(|id| graph.node(id).is_some_and(|n| n.kind == NodeKind::Viewer) && graph.has_outgoing(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;

    fn graph_with_surface(kind: NodeKind) -> (NodeGraph, NodeId) {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let src = g.add_node(GraphNode::new(kind));
        let socket = match kind {
            NodeKind::PrincipledBsdf => "BSDF",
            NodeKind::Emission => "Emission",
            NodeKind::MixShader => "Shader",
            _ => "Color",
        };
        g.link(src, socket, out, "Surface").unwrap();
        (g, src)
    }

    #[test]
    fn direct_shaders_classify() {
        assert_eq!(classify(&graph_with_surface(NodeKind::PrincipledBsdf).0), Archetype::PurePrincipled);
        assert_eq!(classify(&graph_with_surface(NodeKind::Emission).0), Archetype::PureEmissive);
        assert_eq!(classify(&graph_with_surface(NodeKind::Rgb).0), Archetype::Invalid);
        assert_eq!(classify(&NodeGraph::new()), Archetype::Invalid);
    }

    #[test]
    fn mix_needs_a_principled_leaf() {
        let (mut g, mix) = graph_with_surface(NodeKind::MixShader);
        let e = g.add_node(GraphNode::new(NodeKind::Emission));
        g.link(e, "Emission", mix, "Shader A").unwrap();
        assert_eq!(classify(&g), Archetype::Invalid);
        let p = g.add_node(GraphNode::new(NodeKind::PrincipledBsdf));
        g.link(p, "BSDF", mix, "Shader B").unwrap();
        assert_eq!(classify(&g), Archetype::Mixed);
    }

    #[test]
    fn viewer_between_shader_and_output_is_found() {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let viewer = g.add_node(GraphNode::new(NodeKind::Viewer));
        let p = g.add_node(GraphNode::new(NodeKind::PrincipledBsdf));
        g.link(p, "BSDF", viewer, "Value").unwrap();
        g.link(viewer, "Value", out, "Surface").unwrap();
        assert!(has_viewer_in_output_path(&g));
    }
}
