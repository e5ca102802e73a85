//! Per-sample evaluation of a material graph on the CPU.

use std::collections::HashMap;

use glam::Vec3;

use crate::{
    graph::{GraphNode, NodeGraph, NodeId, NodeKind, SocketValue},
    imaging::PixelBuffer,
    schema,
};

use super::geometry::ObjectGeometry;

const FLAT_NORMAL: [f32; 4] = [0.5, 0.5, 1.0, 1.0];

/// Surface sample a graph is evaluated at.
pub struct ShadePoint<'g> {
    pub geometry: &'g ObjectGeometry<'g>,
    pub triangle: usize,
    pub bary: [f32; 3],
    pub uv: [f32; 2],
    pub position: Vec3,
    pub normal: Vec3,
}

impl ShadePoint<'_> {
    fn vertex_color(&self, layer: &str) -> [f32; 4] {
        let mesh = self.geometry.mesh;
        let colors = if layer.is_empty() {
            mesh.active_color_layer()
        } else {
            mesh.vertex_colors.iter().find(|c| c.name == layer)
        };
        let (Some(colors), Some(v)) = (colors, self.geometry.triangle_vertices(self.triangle)) else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        let mut out = [0.0; 4];
        for (k, w) in v.iter().zip(self.bary) {
            let c = colors.colors.get(*k).copied().unwrap_or([0.0, 0.0, 0.0, 1.0]);
            for i in 0..4 {
                out[i] += c[i] * w;
            }
        }
        out
    }
}

pub struct Evaluator<'a> {
    pub graph: &'a NodeGraph,
    pub textures: &'a HashMap<String, PixelBuffer>,
    pub world_color: [f32; 3],
    cache: HashMap<(NodeId, String), SocketValue>,
}

fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

fn mix(a: SocketValue, b: SocketValue, t: f32) -> SocketValue {
    if a.is_float() && b.is_float() {
        SocketValue::Float(a.as_float() + (b.as_float() - a.as_float()) * t)
    } else {
        SocketValue::Color(lerp4(a.as_rgba(), b.as_rgba(), t))
    }
}

fn scale(c: [f32; 4], s: f32) -> [f32; 4] {
    [c[0] * s, c[1] * s, c[2] * s, c[3]]
}

impl<'a> Evaluator<'a> {
    pub fn new(graph: &'a NodeGraph, textures: &'a HashMap<String, PixelBuffer>, world_color: [f32; 3]) -> Self {
        Self {
            graph,
            textures,
            world_color,
            cache: HashMap::new(),
        }
    }

    /// Value arriving at `node.socket`: the linked output, the stored
    /// default, the scheme default, or zero.
    pub fn input(&mut self, node: NodeId, socket: &str, pt: &ShadePoint<'_>) -> SocketValue {
        let graph = self.graph;
        if let Some(link) = graph.incoming(node, socket) {
            return self.output(link.from, &link.from_socket, pt);
        }
        if let Some(v) = self.graph.input_default(node, socket) {
            return v;
        }
        self.graph
            .node(node)
            .and_then(|n| {
                schema::load_default_scheme()
                    .ok()
                    .and_then(|s| s.input_default(n.kind, socket))
            })
            .unwrap_or(SocketValue::Float(0.0))
    }

    fn input_linked(&self, node: NodeId, socket: &str) -> bool {
        self.graph.incoming(node, socket).is_some()
    }

    /// Value of an output socket of a value node. Shader nodes evaluate to
    /// their emitted color.
    pub fn output(&mut self, node: NodeId, socket: &str, pt: &ShadePoint<'_>) -> SocketValue {
        let key = (node, socket.to_string());
        if let Some(v) = self.cache.get(&key) {
            return *v;
        }
        let graph = self.graph;
        let Some(n) = graph.node(node) else {
            return SocketValue::Float(0.0);
        };
        let v = self.compute(node, n, socket, pt);
        self.cache.insert(key, v);
        v
    }

    fn compute(&mut self, id: NodeId, n: &'a GraphNode, socket: &str, pt: &ShadePoint<'_>) -> SocketValue {
        if n.kind.is_shader() {
            return SocketValue::Color(self.emit(id, pt));
        }
        match n.kind {
            NodeKind::Value => self.input(id, "Value", pt),
            NodeKind::Rgb => self.input(id, "Color", pt),
            NodeKind::MixValue => {
                let fac = self.input(id, "Fac", pt).as_float().clamp(0.0, 1.0);
                let a = self.input(id, "A", pt);
                let b = self.input(id, "B", pt);
                mix(a, b, fac)
            }
            NodeKind::Invert => {
                let fac = self.input(id, "Fac", pt).as_float();
                let c = self.input(id, "Color", pt);
                let inv = match c {
                    SocketValue::Float(v) => SocketValue::Float(1.0 - v),
                    other => {
                        let [r, g, b, a] = other.as_rgba();
                        SocketValue::Color([1.0 - r, 1.0 - g, 1.0 - b, a])
                    }
                };
                mix(c, inv, fac)
            }
            NodeKind::ImageTexture => {
                let px = n
                    .param_str("image")
                    .and_then(|name| self.textures.get(name))
                    .map_or([1.0, 0.0, 1.0, 1.0], |tex| tex.sample(pt.uv));
                match socket {
                    "Alpha" => SocketValue::Float(px[3]),
                    _ => SocketValue::Color(px),
                }
            }
            NodeKind::VertexColor => {
                let c = pt.vertex_color(n.param_str("layer").unwrap_or_default());
                match socket {
                    "Alpha" => SocketValue::Float(c[3]),
                    _ => SocketValue::Color(c),
                }
            }
            NodeKind::NormalMap => {
                let strength = self.input(id, "Strength", pt).as_float();
                let mut c = self.input(id, "Color", pt).as_rgba();
                if n.param_str("convention") == Some("directx") {
                    c[1] = 1.0 - c[1];
                }
                let m = lerp4(FLAT_NORMAL, c, strength.clamp(0.0, 1.0));
                SocketValue::Vector([m[0], m[1], m[2]])
            }
            NodeKind::AmbientOcclusion => {
                let distance = self.input(id, "Distance", pt).as_float();
                let samples = n.param_u32("samples").unwrap_or(16);
                let ao = pt.geometry.ambient_occlusion(pt.position, pt.normal, distance, samples);
                match socket {
                    "Color" => SocketValue::Color([ao, ao, ao, 1.0]),
                    _ => SocketValue::Float(ao),
                }
            }
            NodeKind::Pointiness => {
                let contrast = self.input(id, "Contrast", pt).as_float();
                let p = pt.geometry.interpolate_pointiness(pt.triangle, pt.bary);
                SocketValue::Float((0.5 + (p - 0.5) * contrast).clamp(0.0, 1.0))
            }
            NodeKind::Thickness => {
                let distance = self.input(id, "Distance", pt).as_float();
                let samples = n.param_u32("samples").unwrap_or(16);
                SocketValue::Float(pt.geometry.thickness(pt.position, pt.normal, distance, samples))
            }
            NodeKind::Viewer => self.input(id, "Value", pt),
            _ => SocketValue::Float(0.0),
        }
    }

    /// Emitted radiance of a shader node.
    pub fn emit(&mut self, id: NodeId, pt: &ShadePoint<'_>) -> [f32; 4] {
        let graph = self.graph;
        let Some(n) = graph.node(id) else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        if n.muted {
            return [0.0, 0.0, 0.0, 1.0];
        }
        match n.kind {
            NodeKind::Emission => {
                let c = self.input(id, "Color", pt).as_rgba();
                let s = self.input(id, "Strength", pt).as_float();
                scale(c, s)
            }
            NodeKind::PrincipledBsdf => {
                let c = self.input(id, "Emission", pt).as_rgba();
                let s = self.input(id, "Emission Strength", pt).as_float();
                scale(c, s)
            }
            NodeKind::MixShader => {
                let fac = self.input(id, "Fac", pt).as_float().clamp(0.0, 1.0);
                let a = self.shader_input(id, "Shader A", pt, Self::emit);
                let b = self.shader_input(id, "Shader B", pt, Self::emit);
                lerp4(a, b, fac)
            }
            _ => [0.0, 0.0, 0.0, 1.0],
        }
    }

    fn shader_input(
        &mut self,
        id: NodeId,
        socket: &str,
        pt: &ShadePoint<'_>,
        f: fn(&mut Self, NodeId, &ShadePoint<'_>) -> [f32; 4],
    ) -> [f32; 4] {
        match self.graph.incoming(id, socket).map(|l| l.from) {
            Some(from) => f(self, from, pt),
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Surface shader of the active output.
    pub fn surface(&self) -> Option<NodeId> {
        let out = self.graph.active_output()?;
        self.graph.incoming(out, "Surface").map(|l| l.from)
    }

    /// What the emit bake writes: emission leaving the output.
    pub fn emitted(&mut self, pt: &ShadePoint<'_>) -> [f32; 4] {
        let Some(surface) = self.surface() else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        let mut c = match self.graph.node(surface).map(|n| n.kind) {
            Some(k) if k.is_shader() => self.emit(surface, pt),
            Some(_) => self.output(surface, "Color", pt).as_rgba(),
            None => [0.0, 0.0, 0.0, 1.0],
        };
        c[3] = 1.0;
        c
    }

    /// A principled input averaged through the mix tree above it, used by
    /// the native passes that need surface properties.
    pub fn principled_input(&mut self, socket: &str, pt: &ShadePoint<'_>) -> Option<SocketValue> {
        let surface = self.surface()?;
        Some(self.principled_input_at(surface, socket, pt, 0))
    }

    fn principled_input_at(&mut self, id: NodeId, socket: &str, pt: &ShadePoint<'_>, depth: usize) -> SocketValue {
        let zero = SocketValue::Float(0.0);
        if depth > crate::material_prep::isolate::MAX_MIX_DEPTH {
            return zero;
        }
        match self.graph.node(id).map(|n| n.kind) {
            Some(NodeKind::PrincipledBsdf) => self.input(id, socket, pt),
            Some(NodeKind::MixShader) => {
                let fac = self.input(id, "Fac", pt).as_float().clamp(0.0, 1.0);
                let a = match self.graph.incoming(id, "Shader A").map(|l| l.from) {
                    Some(from) => self.principled_input_at(from, socket, pt, depth + 1),
                    None => zero,
                };
                let b = match self.graph.incoming(id, "Shader B").map(|l| l.from) {
                    Some(from) => self.principled_input_at(from, socket, pt, depth + 1),
                    None => zero,
                };
                mix(a, b, fac)
            }
            _ => zero,
        }
    }

    /// Tangent-space normal, encoded 0..1.
    pub fn tangent_normal(&mut self, pt: &ShadePoint<'_>) -> [f32; 4] {
        let Some(surface) = self.surface() else {
            return FLAT_NORMAL;
        };
        let bsdf = if self.graph.node(surface).map(|n| n.kind) == Some(NodeKind::PrincipledBsdf) {
            Some(surface)
        } else {
            self.graph
                .upstream_reachable(surface)
                .into_iter()
                .filter(|id| self.graph.node(*id).map(|n| n.kind) == Some(NodeKind::PrincipledBsdf))
                .min()
        };
        match bsdf {
            Some(b) if self.input_linked(b, "Normal") => {
                let v = self.input(b, "Normal", pt).as_rgba();
                [v[0], v[1], v[2], 1.0]
            }
            _ => FLAT_NORMAL,
        }
    }

    pub fn world_luminance(&self) -> f32 {
        crate::graph::luminance(self.world_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MeshData, SceneObject, Triangle};

    fn object() -> SceneObject {
        SceneObject {
            name: "Tri".to_string(),
            kind: Default::default(),
            visibility: Default::default(),
            transform: Default::default(),
            mesh: Some(MeshData {
                positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                triangles: vec![Triangle {
                    indices: [0, 1, 2],
                    material_index: 0,
                }],
                ..Default::default()
            }),
            material_slots: Vec::new(),
            tags: Default::default(),
        }
    }

    #[test]
    fn mix_value_interpolates_between_inputs() {
        let obj = object();
        let geo = ObjectGeometry::new(&obj).unwrap();
        let pt = ShadePoint {
            geometry: &geo,
            triangle: 0,
            bary: [1.0 / 3.0; 3],
            uv: [0.3, 0.3],
            position: Vec3::ZERO,
            normal: Vec3::Z,
        };
        let mut g = NodeGraph::new();
        let m = g.add_node(
            GraphNode::new(NodeKind::MixValue)
                .with_input("Fac", SocketValue::Float(0.25))
                .with_input("A", SocketValue::Float(0.0))
                .with_input("B", SocketValue::Float(1.0)),
        );
        let textures = HashMap::new();
        let mut ev = Evaluator::new(&g, &textures, [0.0; 3]);
        assert_eq!(ev.output(m, "Result", &pt), SocketValue::Float(0.25));
    }

    #[test]
    fn muted_emission_emits_nothing() {
        let obj = object();
        let geo = ObjectGeometry::new(&obj).unwrap();
        let pt = ShadePoint {
            geometry: &geo,
            triangle: 0,
            bary: [1.0, 0.0, 0.0],
            uv: [0.0, 0.0],
            position: Vec3::ZERO,
            normal: Vec3::Z,
        };
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let e = g.add_node(GraphNode::new(NodeKind::Emission).with_input("Color", SocketValue::Color([1.0; 4])));
        g.link(e, "Emission", out, "Surface").unwrap();
        let textures = HashMap::new();
        assert_eq!(Evaluator::new(&g, &textures, [0.0; 3]).emitted(&pt), [1.0, 1.0, 1.0, 1.0]);
        g.node_mut(e).unwrap().muted = true;
        assert_eq!(Evaluator::new(&g, &textures, [0.0; 3]).emitted(&pt), [0.0, 0.0, 0.0, 1.0]);
    }
}
