//! Shading node graph held in an arena.
//!
//! Nodes are addressed by [`NodeId`] handles into a slot vector; removed nodes
//! leave a `None` hole so existing handles never alias a different node.
//! Links are a flat list keyed by `(node, socket)` endpoints, one link per
//! input socket.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    OutputMaterial,
    PrincipledBsdf,
    Emission,
    MixShader,
    MixValue,
    Rgb,
    Value,
    ImageTexture,
    NormalMap,
    VertexColor,
    AmbientOcclusion,
    Pointiness,
    Thickness,
    Invert,
    Viewer,
    #[serde(other)]
    Unknown,
}

impl NodeKind {
    /// Scheme type name, matching `assets/node-scheme.json`.
    pub fn type_name(self) -> &'static str {
        match self {
            NodeKind::OutputMaterial => "OutputMaterial",
            NodeKind::PrincipledBsdf => "PrincipledBsdf",
            NodeKind::Emission => "Emission",
            NodeKind::MixShader => "MixShader",
            NodeKind::MixValue => "MixValue",
            NodeKind::Rgb => "Rgb",
            NodeKind::Value => "Value",
            NodeKind::ImageTexture => "ImageTexture",
            NodeKind::NormalMap => "NormalMap",
            NodeKind::VertexColor => "VertexColor",
            NodeKind::AmbientOcclusion => "AmbientOcclusion",
            NodeKind::Pointiness => "Pointiness",
            NodeKind::Thickness => "Thickness",
            NodeKind::Invert => "Invert",
            NodeKind::Viewer => "Viewer",
            NodeKind::Unknown => "Unknown",
        }
    }

    /// Nodes whose output is a closure rather than a value.
    pub fn is_shader(self) -> bool {
        matches!(
            self,
            NodeKind::PrincipledBsdf | NodeKind::Emission | NodeKind::MixShader
        )
    }
}

/// Unconnected socket value. Colors are RGBA, vectors XYZ.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SocketValue {
    Float(f32),
    Color([f32; 4]),
    Vector([f32; 3]),
}

impl SocketValue {
    pub fn as_float(&self) -> f32 {
        match *self {
            SocketValue::Float(v) => v,
            SocketValue::Color([r, g, b, _]) => luminance([r, g, b]),
            SocketValue::Vector([x, y, z]) => (x + y + z) / 3.0,
        }
    }

    pub fn as_rgba(&self) -> [f32; 4] {
        match *self {
            SocketValue::Float(v) => [v, v, v, 1.0],
            SocketValue::Color(c) => c,
            SocketValue::Vector([x, y, z]) => [x, y, z, 1.0],
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SocketValue::Float(_))
    }
}

/// Rec.709 weights, used for every color → float conversion.
pub fn luminance([r, g, b]: [f32; 3]) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub muted: bool,
    /// Default values of input sockets, used when the socket has no link.
    #[serde(default)]
    pub inputs: BTreeMap<String, SocketValue>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl GraphNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            label: None,
            muted: false,
            inputs: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, socket: &str, value: SocketValue) -> Self {
        self.inputs.insert(socket.to_string(), value);
        self
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_u32(&self, key: &str) -> Option<u32> {
        self.params
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: NodeId,
    pub from_socket: String,
    pub to: NodeId,
    pub to_socket: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGraph {
    #[serde(default)]
    nodes: Vec<Option<GraphNode>>,
    #[serde(default)]
    links: Vec<Link>,
    /// Node the host bake primitive writes into (an image texture node).
    #[serde(default)]
    pub active_node: Option<NodeId>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        self.nodes.push(Some(node));
        NodeId((self.nodes.len() - 1) as u32)
    }

    /// Remove a node together with every link touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<GraphNode> {
        let slot = self.nodes.get_mut(id.index())?;
        let removed = slot.take();
        if removed.is_some() {
            self.links.retain(|l| l.from != id && l.to != id);
            if self.active_node == Some(id) {
                self.active_node = None;
            }
        }
        removed
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.index()).and_then(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id.index()).and_then(|n| n.as_mut())
    }

    pub fn get(&self, id: NodeId) -> Result<&GraphNode> {
        self.node(id)
            .ok_or_else(|| anyhow!("node not found: {id}"))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i as u32), n)))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// Connect `from.from_socket` into `to.to_socket`, replacing whatever
    /// previously drove that input.
    pub fn link(&mut self, from: NodeId, from_socket: &str, to: NodeId, to_socket: &str) -> Result<()> {
        if self.node(from).is_none() || self.node(to).is_none() {
            bail!("link references missing node: {from} -> {to}");
        }
        self.unlink_input(to, to_socket);
        self.links.push(Link {
            from,
            from_socket: from_socket.to_string(),
            to,
            to_socket: to_socket.to_string(),
        });
        Ok(())
    }

    pub fn unlink_input(&mut self, to: NodeId, to_socket: &str) -> Option<Link> {
        let idx = self
            .links
            .iter()
            .position(|l| l.to == to && l.to_socket == to_socket)?;
        Some(self.links.remove(idx))
    }

    pub fn incoming(&self, to: NodeId, to_socket: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.to == to && l.to_socket == to_socket)
    }

    pub fn outgoing(&self, from: NodeId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.from == from)
    }

    pub fn has_outgoing(&self, from: NodeId) -> bool {
        self.links.iter().any(|l| l.from == from)
    }

    /// Default value of an input socket, if the node carries one.
    pub fn input_default(&self, node: NodeId, socket: &str) -> Option<SocketValue> {
        self.node(node).and_then(|n| n.inputs.get(socket).copied())
    }

    /// The output node the renderer evaluates: the one flagged
    /// `params.isActiveOutput`, else the first material output.
    pub fn active_output(&self) -> Option<NodeId> {
        let outputs = self.nodes_of_kind(NodeKind::OutputMaterial);
        outputs
            .iter()
            .copied()
            .find(|id| {
                self.node(*id)
                    .and_then(|n| n.params.get("isActiveOutput"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            })
            .or_else(|| outputs.first().copied())
    }

    /// Every node upstream of `start`, including `start` itself.
    pub fn upstream_reachable(&self, start: NodeId) -> HashSet<NodeId> {
        let mut incoming: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for l in &self.links {
            incoming.entry(l.to).or_default().push(l.from);
        }

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = vec![start];
        while let Some(n) = stack.pop() {
            if !visited.insert(n) {
                continue;
            }
            if let Some(prevs) = incoming.get(&n) {
                stack.extend(prevs.iter().copied());
            }
        }
        visited
    }

    pub fn topo_sort(&self) -> Result<Vec<NodeId>> {
        let mut indeg: HashMap<NodeId, usize> = self.nodes().map(|(id, _)| (id, 0usize)).collect();
        let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for l in &self.links {
            let Some(d) = indeg.get_mut(&l.to) else {
                bail!("link references missing node: {} -> {}", l.from, l.to);
            };
            *d += 1;
            outgoing.entry(l.from).or_default().push(l.to);
        }

        let mut ready: Vec<NodeId> = indeg
            .iter()
            .filter_map(|(id, d)| (*d == 0).then_some(*id))
            .collect();
        ready.sort();
        let mut q: VecDeque<NodeId> = ready.into();
        let mut order = Vec::with_capacity(indeg.len());

        while let Some(n) = q.pop_front() {
            order.push(n);
            if let Some(nexts) = outgoing.get(&n) {
                for m in nexts {
                    if let Some(entry) = indeg.get_mut(m) {
                        *entry -= 1;
                        if *entry == 0 {
                            q.push_back(*m);
                        }
                    }
                }
            }
        }

        if order.len() != indeg.len() {
            bail!("cycle detected in node graph");
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (NodeGraph, NodeId, NodeId, NodeId) {
        let mut g = NodeGraph::new();
        let v = g.add_node(GraphNode::new(NodeKind::Value).with_input("Value", SocketValue::Float(0.25)));
        let e = g.add_node(GraphNode::new(NodeKind::Emission));
        let o = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        g.link(v, "Value", e, "Color").unwrap();
        g.link(e, "Emission", o, "Surface").unwrap();
        (g, v, e, o)
    }

    #[test]
    fn link_replaces_existing_input() {
        let (mut g, _v, e, _o) = chain();
        let c = g.add_node(GraphNode::new(NodeKind::Rgb));
        g.link(c, "Color", e, "Color").unwrap();
        let incoming: Vec<_> = g.links().iter().filter(|l| l.to == e).collect();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].from, c);
    }

    #[test]
    fn remove_node_drops_links_and_keeps_handles_stable() {
        let (mut g, v, e, o) = chain();
        g.remove_node(e);
        assert!(g.node(e).is_none());
        assert!(g.links().is_empty());
        assert_eq!(g.node(v).unwrap().kind, NodeKind::Value);
        assert_eq!(g.node(o).unwrap().kind, NodeKind::OutputMaterial);
        let n = g.add_node(GraphNode::new(NodeKind::Rgb));
        assert_ne!(n, e);
    }

    #[test]
    fn upstream_includes_start() {
        let (g, v, e, o) = chain();
        let up = g.upstream_reachable(o);
        assert!(up.contains(&o) && up.contains(&e) && up.contains(&v));
        assert_eq!(g.upstream_reachable(v).len(), 1);
    }

    #[test]
    fn topo_sort_detects_cycle() {
        let mut g = NodeGraph::new();
        let a = g.add_node(GraphNode::new(NodeKind::MixValue));
        let b = g.add_node(GraphNode::new(NodeKind::MixValue));
        g.link(a, "Result", b, "A").unwrap();
        g.link(b, "Result", a, "A").unwrap();
        assert!(g.topo_sort().is_err());
    }

    #[test]
    fn socket_value_parses_untagged_json() {
        let f: SocketValue = serde_json::from_str("0.5").unwrap();
        let c: SocketValue = serde_json::from_str("[1, 0, 0, 1]").unwrap();
        let v: SocketValue = serde_json::from_str("[0, 0, 1]").unwrap();
        assert_eq!(f, SocketValue::Float(0.5));
        assert_eq!(c, SocketValue::Color([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(v, SocketValue::Vector([0.0, 0.0, 1.0]));
    }
}
