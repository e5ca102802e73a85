//! Scene document: objects, materials with their node graphs, render
//! settings and selection. This is the mutable state the bake pipeline works
//! against and restores afterwards.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::{
    channel::BakePass,
    graph::{GraphNode, NodeGraph, NodeKind, SocketValue},
    schema,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub editor_mode: EditorMode,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub materials: BTreeMap<String, Material>,
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<String>>,
    /// External images referenced by image texture nodes, by image name.
    #[serde(default)]
    pub images: BTreeMap<String, ImageRef>,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub selection: Vec<String>,
    #[serde(default)]
    pub active_object: Option<String>,
    #[serde(default = "default_world_color")]
    pub world_color: [f32; 3],
}

fn default_world_color() -> [f32; 3] {
    [0.05, 0.05, 0.05]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorMode {
    #[default]
    Object,
    Edit,
    Sculpt,
    WeightPaint,
    TexturePaint,
    VertexPaint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: PathBuf,
    #[serde(default)]
    pub non_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    #[default]
    Mesh,
    Curve,
    Light,
    Camera,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Visibility {
    pub hide_viewport: bool,
    pub hide_render: bool,
    /// Per-view-layer eye toggle.
    pub hide_eye: bool,
    pub hide_select: bool,
}

impl Visibility {
    pub fn any_hidden(&self) -> bool {
        self.hide_viewport || self.hide_render || self.hide_eye || self.hide_select
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub location: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl Transform {
    pub fn apply(&self, p: [f32; 3]) -> [f32; 3] {
        [
            p[0] * self.scale[0] + self.location[0],
            p[1] * self.scale[1] + self.location[1],
            p[2] * self.scale[2] + self.location[2],
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectTags {
    /// Set on copies: the object this one was duplicated from.
    pub source_object: Option<String>,
    pub working_copy: bool,
    pub export_copy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(default)]
    pub kind: ObjectKind,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub mesh: Option<MeshData>,
    /// Material names; `None` is an empty slot.
    #[serde(default)]
    pub material_slots: Vec<Option<String>>,
    #[serde(default)]
    pub tags: ObjectTags,
}

impl SceneObject {
    pub fn is_mesh(&self) -> bool {
        self.kind == ObjectKind::Mesh && self.mesh.is_some()
    }

    pub fn face_count(&self) -> usize {
        self.mesh.as_ref().map_or(0, |m| m.triangles.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    #[serde(rename = "v")]
    pub indices: [u32; 3],
    #[serde(rename = "mat", default)]
    pub material_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvMap {
    pub name: String,
    /// One UV per vertex, parallel to `MeshData::positions`.
    pub coords: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorLayer {
    pub name: String,
    pub colors: Vec<[f32; 4]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshData {
    /// Optional Wavefront OBJ file the geometry is loaded from.
    pub source: Option<PathBuf>,
    pub positions: Vec<[f32; 3]>,
    pub triangles: Vec<Triangle>,
    pub uv_maps: Vec<UvMap>,
    pub active_uv: usize,
    pub vertex_colors: Vec<ColorLayer>,
    pub active_vertex_color: usize,
}

impl MeshData {
    pub fn active_uv_map(&self) -> Option<&UvMap> {
        self.uv_maps.get(self.active_uv)
    }

    pub fn active_uv_map_mut(&mut self) -> Option<&mut UvMap> {
        self.uv_maps.get_mut(self.active_uv)
    }

    pub fn active_color_layer(&self) -> Option<&ColorLayer> {
        self.vertex_colors.get(self.active_vertex_color)
    }

    /// Translate the active UV map by `offset`.
    pub fn shift_active_uv(&mut self, offset: [f32; 2]) {
        if let Some(map) = self.active_uv_map_mut() {
            for uv in &mut map.coords {
                uv[0] += offset[0];
                uv[1] += offset[1];
            }
        }
    }

    /// Load triangulated geometry from an OBJ file. All models are merged into
    /// one mesh; per-model material ids become triangle material indices.
    pub fn load_obj(path: &Path) -> Result<Self> {
        let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
            .with_context(|| format!("failed to load OBJ mesh at {}", path.display()))?;

        let mut mesh = MeshData {
            source: Some(path.to_path_buf()),
            ..Default::default()
        };
        let mut uvs: Vec<[f32; 2]> = Vec::new();
        let mut has_uvs = true;
        for model in &models {
            let m = &model.mesh;
            let base = mesh.positions.len() as u32;
            let vertex_count = m.positions.len() / 3;
            for i in 0..vertex_count {
                mesh.positions
                    .push([m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]]);
            }
            if m.texcoords.len() / 2 == vertex_count {
                for i in 0..vertex_count {
                    uvs.push([m.texcoords[2 * i], m.texcoords[2 * i + 1]]);
                }
            } else {
                has_uvs = false;
            }
            let material_index = m.material_id.unwrap_or(0);
            for tri in m.indices.chunks_exact(3) {
                mesh.triangles.push(Triangle {
                    indices: [base + tri[0], base + tri[1], base + tri[2]],
                    material_index,
                });
            }
        }
        if has_uvs && !uvs.is_empty() {
            mesh.uv_maps.push(UvMap {
                name: "UVMap".to_string(),
                coords: uvs,
            });
        }
        Ok(mesh)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialTags {
    /// Set on disposable duplicates: the material they were copied from.
    pub original_material: Option<String>,
    /// Set on originals while a disposable duplicate of them is alive.
    pub disposable_duplicate: Option<String>,
    /// Synthesized materials that only live on scratch objects.
    pub scratch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    #[serde(default = "default_true")]
    pub use_nodes: bool,
    #[serde(default)]
    pub graph: NodeGraph,
    /// Viewport color, used when the material is not node based.
    #[serde(default = "default_diffuse_color")]
    pub diffuse_color: [f32; 4],
    #[serde(default)]
    pub tags: MaterialTags,
}

fn default_true() -> bool {
    true
}

fn default_diffuse_color() -> [f32; 4] {
    [0.8, 0.8, 0.8, 1.0]
}

impl Material {
    /// A fresh material with a default principled shader wired to the output.
    pub fn principled(base_color: [f32; 4]) -> Result<Self> {
        let mut graph = NodeGraph::new();
        let bsdf = graph.add_node(
            GraphNode::new(NodeKind::PrincipledBsdf)
                .with_input("Base Color", SocketValue::Color(base_color)),
        );
        let out = graph.add_node(GraphNode::new(NodeKind::OutputMaterial));
        graph.link(bsdf, "BSDF", out, "Surface")?;
        schema::normalize_graph_defaults(&mut graph, schema::load_default_scheme()?);
        Ok(Self {
            use_nodes: true,
            graph,
            diffuse_color: base_color,
            tags: MaterialTags::default(),
        })
    }

    /// Turn on node mode, building the default shader from the viewport color
    /// when the material had no graph yet.
    pub fn ensure_nodes(&mut self) -> Result<()> {
        if self.use_nodes {
            return Ok(());
        }
        if self.graph.active_output().is_none() {
            self.graph = Material::principled(self.diffuse_color)?.graph;
        }
        self.use_nodes = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderEngine {
    #[default]
    Eevee,
    Cycles,
    Workbench,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderDevice {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeToggles {
    pub bake_type: BakePass,
    /// Clear the target image before baking.
    pub use_clear: bool,
    pub margin: u32,
    pub use_pass_direct: bool,
    pub use_pass_indirect: bool,
    pub use_pass_color: bool,
    pub use_selected_to_active: bool,
    pub cage_extrusion: f32,
    pub max_ray_distance: f32,
}

impl Default for BakeToggles {
    fn default() -> Self {
        Self {
            bake_type: BakePass::Native(crate::channel::NativePass::Combined),
            use_clear: true,
            margin: 16,
            use_pass_direct: true,
            use_pass_indirect: true,
            use_pass_color: true,
            use_selected_to_active: false,
            cage_extrusion: 0.0,
            max_ray_distance: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub engine: RenderEngine,
    pub device: RenderDevice,
    pub samples: u32,
    pub tile_size: u32,
    pub bake: BakeToggles,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            engine: RenderEngine::Eevee,
            device: RenderDevice::Cpu,
            samples: 128,
            tile_size: 2048,
            bake: BakeToggles::default(),
        }
    }
}

impl Scene {
    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn object_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    pub fn find_object(&self, name: &str) -> Result<&SceneObject> {
        self.object(name)
            .ok_or_else(|| anyhow!("object not found: {name}"))
    }

    pub fn find_object_mut(&mut self, name: &str) -> Result<&mut SceneObject> {
        self.object_mut(name)
            .ok_or_else(|| anyhow!("object not found: {name}"))
    }

    pub fn find_material(&self, name: &str) -> Result<&Material> {
        self.materials
            .get(name)
            .ok_or_else(|| anyhow!("material not found: {name}"))
    }

    pub fn unique_material_name(&self, base: &str) -> String {
        unique_name(base, |n| self.materials.contains_key(n))
    }

    pub fn unique_object_name(&self, base: &str) -> String {
        unique_name(base, |n| self.object(n).is_some())
    }

    pub fn link_to_collection(&mut self, collection: &str, object: &str) {
        let members = self.collections.entry(collection.to_string()).or_default();
        if !members.iter().any(|m| m == object) {
            members.push(object.to_string());
        }
    }

    /// Delete a collection and every object in it. Returns the removed
    /// object names.
    pub fn remove_collection(&mut self, collection: &str) -> Vec<String> {
        let Some(members) = self.collections.remove(collection) else {
            return Vec::new();
        };
        self.objects.retain(|o| !members.contains(&o.name));
        self.selection.retain(|s| !members.contains(s));
        if self
            .active_object
            .as_ref()
            .is_some_and(|a| members.contains(a))
        {
            self.active_object = None;
        }
        members
    }

    /// Drop materials no object slot references any more and that are marked
    /// scratch.
    pub fn purge_scratch_materials(&mut self) -> usize {
        let used: std::collections::HashSet<&str> = self
            .objects
            .iter()
            .flat_map(|o| o.material_slots.iter().flatten().map(String::as_str))
            .collect();
        let doomed: Vec<String> = self
            .materials
            .iter()
            .filter(|(name, m)| m.tags.scratch && !used.contains(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &doomed {
            self.materials.remove(name);
        }
        doomed.len()
    }
}

fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}.{i:03}"))
        .find(|n| !taken(n))
        .unwrap_or_else(|| base.to_string())
}

pub fn load_scene_from_path(path: impl AsRef<Path>) -> Result<Scene> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene json at {}", path.display()))?;
    let mut scene: Scene = serde_json::from_str(&text).context("failed to parse scene json")?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    resolve_mesh_sources(&mut scene, base_dir)?;
    normalize_scene_defaults(&mut scene)?;
    Ok(scene)
}

pub fn save_scene_to_path(scene: &Scene, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(scene).context("failed to serialize scene")?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write scene json to {}", path.display()))
}

/// Load OBJ geometry for meshes that reference a source file but carry no
/// inline vertices.
fn resolve_mesh_sources(scene: &mut Scene, base_dir: &Path) -> Result<()> {
    for obj in &mut scene.objects {
        let Some(mesh) = obj.mesh.as_mut() else {
            continue;
        };
        let Some(source) = mesh.source.clone() else {
            continue;
        };
        if !mesh.positions.is_empty() {
            continue;
        }
        let full = if source.is_absolute() {
            source
        } else {
            base_dir.join(source)
        };
        let loaded = MeshData::load_obj(&full)
            .with_context(|| format!("object '{}'", obj.name))?;
        *mesh = loaded;
    }
    Ok(())
}

/// Fill node defaults from the bundled scheme and check that every mesh is
/// internally consistent.
pub fn normalize_scene_defaults(scene: &mut Scene) -> Result<()> {
    let scheme = schema::load_default_scheme()?;
    for material in scene.materials.values_mut() {
        schema::normalize_graph_defaults(&mut material.graph, scheme);
    }
    for obj in &scene.objects {
        let Some(mesh) = obj.mesh.as_ref() else {
            continue;
        };
        let n = mesh.positions.len();
        if let Some(t) = mesh
            .triangles
            .iter()
            .find(|t| t.indices.iter().any(|&i| i as usize >= n))
        {
            bail!(
                "object '{}': triangle {:?} references a vertex out of range ({n} vertices)",
                obj.name,
                t.indices
            );
        }
        for map in &mesh.uv_maps {
            if map.coords.len() != n {
                bail!(
                    "object '{}': uv map '{}' has {} coords for {n} vertices",
                    obj.name,
                    map.name,
                    map.coords.len()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_get_numeric_suffix() {
        let mut scene = Scene::default();
        scene
            .materials
            .insert("Mat".to_string(), Material::principled([1.0; 4]).unwrap());
        assert_eq!(scene.unique_material_name("Mat"), "Mat.001");
        assert_eq!(scene.unique_material_name("Other"), "Other");
    }

    #[test]
    fn ensure_nodes_builds_default_graph_from_viewport_color() {
        let mut m = Material {
            use_nodes: false,
            graph: NodeGraph::new(),
            diffuse_color: [0.2, 0.3, 0.4, 1.0],
            tags: MaterialTags::default(),
        };
        m.ensure_nodes().unwrap();
        assert!(m.use_nodes);
        let bsdf = m.graph.nodes_of_kind(NodeKind::PrincipledBsdf)[0];
        assert_eq!(
            m.graph.input_default(bsdf, "Base Color"),
            Some(SocketValue::Color([0.2, 0.3, 0.4, 1.0]))
        );
    }

    #[test]
    fn scene_json_with_minimal_fields_parses() {
        let json = r#"{
            "objects": [{
                "name": "Cube",
                "mesh": {
                    "positions": [[0,0,0],[1,0,0],[0,1,0]],
                    "triangles": [{"v": [0,1,2]}],
                    "uv_maps": [{"name": "UVMap", "coords": [[0,0],[1,0],[0,1]]}]
                },
                "material_slots": ["Mat"]
            }],
            "materials": {"Mat": {}}
        }"#;
        let mut scene: Scene = serde_json::from_str(json).unwrap();
        normalize_scene_defaults(&mut scene).unwrap();
        assert_eq!(scene.objects[0].face_count(), 1);
        assert!(scene.objects[0].is_mesh());
        assert_eq!(scene.render.samples, 128);
    }

    #[test]
    fn out_of_range_triangle_is_rejected() {
        let json = r#"{
            "objects": [{
                "name": "Bad",
                "mesh": {"positions": [[0,0,0]], "triangles": [{"v": [0,1,2]}]}
            }]
        }"#;
        let mut scene: Scene = serde_json::from_str(json).unwrap();
        let err = normalize_scene_defaults(&mut scene).unwrap_err();
        assert!(format!("{err:#}").contains("out of range"));
    }
}
