//! Rewiring a shader graph so one channel reaches the output as emission.

use std::collections::{HashMap, HashSet};

use crate::{
    channel::Channel,
    error::TransformError,
    graph::{GraphNode, NodeGraph, NodeId, NodeKind, SocketValue},
    schema,
};

/// Deepest mix-shader nesting that is resolved before giving up.
pub const MAX_MIX_DEPTH: usize = 64;

const ZERO: SocketValue = SocketValue::Color([0.0, 0.0, 0.0, 1.0]);

struct Ctx<'a> {
    material: &'a str,
    channel: Channel,
}

impl Ctx<'_> {
    fn graph_err(&self, e: anyhow::Error) -> TransformError {
        TransformError::Graph {
            material: self.material.to_string(),
            message: format!("{e:#}"),
        }
    }

    fn socket(&self) -> Result<&'static str, TransformError> {
        self.channel
            .principled_socket()
            .ok_or_else(|| TransformError::InvalidArchetype {
                material: self.material.to_string(),
                channel: self.channel,
            })
    }
}

/// Constant node carrying `value`, and the output socket to read it from.
pub fn constant_node(value: SocketValue) -> (GraphNode, &'static str) {
    match value {
        SocketValue::Float(_) => (
            GraphNode::new(NodeKind::Value)
                .with_input("Value", value)
                .with_label("SB constant"),
            "Value",
        ),
        SocketValue::Color(_) | SocketValue::Vector(_) => (
            GraphNode::new(NodeKind::Rgb)
                .with_input("Color", SocketValue::Color(value.as_rgba()))
                .with_label("SB constant"),
            "Color",
        ),
    }
}

/// Where the channel's value comes from on a principled node. An unconnected
/// socket gets a constant node holding its default, linked in.
fn channel_source(
    graph: &mut NodeGraph,
    bsdf: NodeId,
    ctx: &Ctx<'_>,
) -> Result<(NodeId, String), TransformError> {
    let socket = ctx.socket()?;
    if let Some(link) = graph.incoming(bsdf, socket) {
        return Ok((link.from, link.from_socket.clone()));
    }
    let default = graph.input_default(bsdf, socket).or_else(|| {
        schema::load_default_scheme()
            .ok()
            .and_then(|s| s.input_default(NodeKind::PrincipledBsdf, socket))
    });
    let Some(default) = default else {
        return Err(TransformError::MissingSocket {
            material: ctx.material.to_string(),
            socket: socket.to_string(),
            channel: ctx.channel,
        });
    };
    let (node, out) = constant_node(default);
    let constant = graph.add_node(node);
    graph
        .link(constant, out, bsdf, socket)
        .map_err(|e| ctx.graph_err(e))?;
    Ok((constant, out.to_string()))
}

/// New emission node fed by `source`, wired into the output's Surface.
fn route_to_output(
    graph: &mut NodeGraph,
    output: NodeId,
    source: NodeId,
    source_socket: &str,
    ctx: &Ctx<'_>,
) -> Result<NodeId, TransformError> {
    let emission = graph.add_node(
        GraphNode::new(NodeKind::Emission)
            .with_input("Color", ZERO)
            .with_input("Strength", SocketValue::Float(1.0))
            .with_label(format!("SB {}", ctx.channel)),
    );
    graph
        .link(source, source_socket, emission, "Color")
        .map_err(|e| ctx.graph_err(e))?;
    graph
        .link(emission, "Emission", output, "Surface")
        .map_err(|e| ctx.graph_err(e))?;
    Ok(emission)
}

pub fn isolate_principled(
    graph: &mut NodeGraph,
    output: NodeId,
    bsdf: NodeId,
    material: &str,
    channel: Channel,
) -> Result<NodeId, TransformError> {
    let ctx = Ctx { material, channel };
    let (src, socket) = channel_source(graph, bsdf, &ctx)?;
    route_to_output(graph, output, src, &socket, &ctx)
}

/// An emission-only material contributes nothing to non-emission channels.
pub fn isolate_emissive(graph: &mut NodeGraph, emission: NodeId, channel: Channel) {
    if channel != Channel::Emission {
        if let Some(node) = graph.node_mut(emission) {
            node.muted = true;
        }
    }
}

enum Visit {
    Enter(NodeId, usize),
    Exit(NodeId),
}

/// Build a value-space copy of the mix-shader tree rooted at `root` and
/// route it to the output. Post-order over an explicit stack; mixes shared
/// between branches are mirrored once.
pub fn isolate_mixed(
    graph: &mut NodeGraph,
    output: NodeId,
    root: NodeId,
    material: &str,
    channel: Channel,
) -> Result<NodeId, TransformError> {
    let ctx = Ctx { material, channel };
    let mut mirrors: HashMap<NodeId, NodeId> = HashMap::new();
    let mut sources: HashMap<NodeId, (NodeId, String)> = HashMap::new();
    let mut on_path: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![Visit::Enter(root, 1)];

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(id, depth) => {
                if mirrors.contains_key(&id) {
                    continue;
                }
                if depth > MAX_MIX_DEPTH {
                    return Err(TransformError::TooDeep {
                        material: material.to_string(),
                        limit: MAX_MIX_DEPTH,
                    });
                }
                if !on_path.insert(id) {
                    return Err(TransformError::Cycle {
                        material: material.to_string(),
                    });
                }
                stack.push(Visit::Exit(id));
                for socket in ["Shader A", "Shader B"] {
                    let Some(link) = graph.incoming(id, socket) else {
                        continue;
                    };
                    if graph
                        .node(link.from)
                        .is_some_and(|n| n.kind == NodeKind::MixShader)
                    {
                        if on_path.contains(&link.from) {
                            return Err(TransformError::Cycle {
                                material: material.to_string(),
                            });
                        }
                        stack.push(Visit::Enter(link.from, depth + 1));
                    }
                }
            }
            Visit::Exit(id) => {
                on_path.remove(&id);
                let mirror = mirror_mix(graph, id, &mirrors, &mut sources, &ctx)?;
                mirrors.insert(id, mirror);
            }
        }
    }

    let Some(&top) = mirrors.get(&root) else {
        return Err(TransformError::Graph {
            material: material.to_string(),
            message: format!("mix shader {root} was not resolved"),
        });
    };
    route_to_output(graph, output, top, "Result", &ctx)
}

/// Value-mix twin of one mix shader. Its children are already mirrored.
fn mirror_mix(
    graph: &mut NodeGraph,
    mix: NodeId,
    mirrors: &HashMap<NodeId, NodeId>,
    sources: &mut HashMap<NodeId, (NodeId, String)>,
    ctx: &Ctx<'_>,
) -> Result<NodeId, TransformError> {
    let fac_link = graph
        .incoming(mix, "Fac")
        .map(|l| (l.from, l.from_socket.clone()));
    let fac_default = graph
        .input_default(mix, "Fac")
        .unwrap_or(SocketValue::Float(0.5));
    let inputs: Vec<(&str, Option<(NodeId, NodeKind, bool)>)> = [("Shader A", "A"), ("Shader B", "B")]
        .into_iter()
        .map(|(shader, value)| {
            let upstream = graph.incoming(mix, shader).and_then(|l| {
                graph.node(l.from).map(|n| (l.from, n.kind, n.muted))
            });
            (value, upstream)
        })
        .collect();

    let mirror = graph.add_node(
        GraphNode::new(NodeKind::MixValue)
            .with_input("Fac", SocketValue::Float(fac_default.as_float()))
            .with_input("A", ZERO)
            .with_input("B", ZERO)
            .with_label(format!("SB mirror {mix}")),
    );
    if let Some((from, socket)) = fac_link {
        graph
            .link(from, &socket, mirror, "Fac")
            .map_err(|e| ctx.graph_err(e))?;
    }

    for (value_socket, upstream) in inputs {
        let Some((from, kind, muted)) = upstream else {
            continue;
        };
        let (src, src_socket) = match kind {
            NodeKind::PrincipledBsdf => match sources.get(&from) {
                Some(cached) => cached.clone(),
                None => {
                    let s = channel_source(graph, from, ctx)?;
                    sources.insert(from, s.clone());
                    s
                }
            },
            NodeKind::MixShader => {
                let Some(&m) = mirrors.get(&from) else {
                    return Err(TransformError::Graph {
                        material: ctx.material.to_string(),
                        message: format!("mix shader {from} used before it was resolved"),
                    });
                };
                (m, "Result".to_string())
            }
            NodeKind::Emission => {
                if ctx.channel != Channel::Emission || muted {
                    continue;
                }
                emission_value(graph, from)
            }
            _ => {
                return Err(TransformError::InvalidArchetype {
                    material: ctx.material.to_string(),
                    channel: ctx.channel,
                });
            }
        };
        graph
            .link(src, &src_socket, mirror, value_socket)
            .map_err(|e| ctx.graph_err(e))?;
    }
    Ok(mirror)
}

/// What an emission leaf contributes to the emission channel: its color
/// link, or a constant of color × strength.
fn emission_value(graph: &mut NodeGraph, emission: NodeId) -> (NodeId, String) {
    if let Some(link) = graph.incoming(emission, "Color") {
        return (link.from, link.from_socket.clone());
    }
    let color = graph
        .input_default(emission, "Color")
        .map(|v| v.as_rgba())
        .unwrap_or([1.0; 4]);
    let strength = graph
        .input_default(emission, "Strength")
        .map(|v| v.as_float())
        .unwrap_or(1.0);
    let (node, out) = constant_node(SocketValue::Color([
        color[0] * strength,
        color[1] * strength,
        color[2] * strength,
        color[3],
    ]));
    let constant = graph.add_node(node);
    (constant, out.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principled(metal: f32) -> GraphNode {
        GraphNode::new(NodeKind::PrincipledBsdf).with_input("Metallic", SocketValue::Float(metal))
    }

    fn mix(fac: f32) -> GraphNode {
        GraphNode::new(NodeKind::MixShader).with_input("Fac", SocketValue::Float(fac))
    }

    #[test]
    fn mix_loop_is_reported_as_cycle() {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let p = g.add_node(principled(0.2));
        let outer = g.add_node(mix(0.5));
        let inner = g.add_node(mix(0.5));
        g.link(p, "BSDF", outer, "Shader A").unwrap();
        g.link(inner, "Shader", outer, "Shader B").unwrap();
        g.link(p, "BSDF", inner, "Shader A").unwrap();
        g.link(outer, "Shader", inner, "Shader B").unwrap();
        g.link(outer, "Shader", out, "Surface").unwrap();

        let err = isolate_mixed(&mut g, out, outer, "Loop", Channel::Metalness).unwrap_err();
        assert!(matches!(err, TransformError::Cycle { ref material } if material == "Loop"));
    }

    #[test]
    fn overly_deep_mix_chain_is_refused() {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let p = g.add_node(principled(1.0));
        let chain: Vec<NodeId> = (0..MAX_MIX_DEPTH + 2).map(|_| g.add_node(mix(0.5))).collect();
        for pair in chain.windows(2) {
            g.link(p, "BSDF", pair[0], "Shader A").unwrap();
            g.link(pair[1], "Shader", pair[0], "Shader B").unwrap();
        }
        let last = chain[chain.len() - 1];
        g.link(p, "BSDF", last, "Shader A").unwrap();
        g.link(p, "BSDF", last, "Shader B").unwrap();
        g.link(chain[0], "Shader", out, "Surface").unwrap();

        let err = isolate_mixed(&mut g, out, chain[0], "Deep", Channel::Metalness).unwrap_err();
        assert!(matches!(err, TransformError::TooDeep { limit: MAX_MIX_DEPTH, .. }));
    }

    #[test]
    fn nested_mixes_get_one_mirror_each() {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let a = g.add_node(principled(0.1));
        let b = g.add_node(principled(0.9));
        let glow = g.add_node(GraphNode::new(NodeKind::Emission));
        let inner = g.add_node(mix(0.25));
        let outer = g.add_node(mix(0.5));
        g.link(a, "BSDF", inner, "Shader A").unwrap();
        g.link(b, "BSDF", inner, "Shader B").unwrap();
        g.link(inner, "Shader", outer, "Shader A").unwrap();
        g.link(glow, "Emission", outer, "Shader B").unwrap();
        g.link(outer, "Shader", out, "Surface").unwrap();

        let emission = isolate_mixed(&mut g, out, outer, "Nested", Channel::Metalness).unwrap();
        assert_eq!(g.nodes_of_kind(NodeKind::MixValue).len(), 2);
        assert_eq!(g.incoming(out, "Surface").map(|l| l.from), Some(emission));
        let top = g.incoming(emission, "Color").map(|l| l.from).unwrap();
        assert_eq!(g.node(top).unwrap().kind, NodeKind::MixValue);
        // emission leaf contributes nothing to the value tree
        assert!(g.incoming(top, "B").is_none());
        assert_eq!(g.input_default(top, "B"), Some(ZERO));
    }
}
