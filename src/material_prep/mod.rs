//! Material graph transformer: disposable duplicates of user materials,
//! rewired so the host's emit bake extracts one channel.

pub mod assemble;
pub mod classify;
pub mod isolate;
pub mod specials;

use crate::{
    channel::Channel,
    error::TransformError,
    graph::{GraphNode, NodeGraph, NodeId, NodeKind},
    scene::{Material, Scene},
};

pub use classify::{Archetype, classify, surface_source};

/// Suffix marking disposable duplicates in material names.
pub const DUPLICATE_MARKER: &str = "_SB_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMaterial {
    /// Name of the disposable duplicate now holding the rewired graph.
    pub name: String,
    pub archetype: Archetype,
}

/// Copy `original` under a fresh name and tag both sides of the pair.
pub fn duplicate_material(scene: &mut Scene, original: &str, suffix: &str) -> anyhow::Result<String> {
    let source = scene.find_material(original)?.clone();
    let name = scene.unique_material_name(&format!("{original}{DUPLICATE_MARKER}{suffix}"));
    let mut dup = source;
    dup.tags.original_material = Some(original.to_string());
    dup.tags.disposable_duplicate = None;
    dup.tags.scratch = false;
    scene.materials.insert(name.clone(), dup);
    if let Some(orig) = scene.materials.get_mut(original) {
        orig.tags.disposable_duplicate = Some(name.clone());
    }
    Ok(name)
}

/// Delete a disposable duplicate and clear the back-reference on its original.
pub fn discard_duplicate(scene: &mut Scene, duplicate: &str) {
    let Some(dup) = scene.materials.remove(duplicate) else {
        return;
    };
    if let Some(orig) = dup
        .tags
        .original_material
        .as_deref()
        .and_then(|o| scene.materials.get_mut(o))
    {
        if orig.tags.disposable_duplicate.as_deref() == Some(duplicate) {
            orig.tags.disposable_duplicate = None;
        }
    }
}

/// Remove shader nodes nothing reads from, until none are left. Removing
/// one can orphan the shaders that fed it.
pub fn prune_dangling_shaders(graph: &mut NodeGraph) -> usize {
    let mut removed = 0;
    loop {
        let dangling: Vec<NodeId> = graph
            .nodes()
            .filter(|(id, n)| n.kind.is_shader() && !graph.has_outgoing(*id))
            .map(|(id, _)| id)
            .collect();
        if dangling.is_empty() {
            return removed;
        }
        for id in dangling {
            graph.remove_node(id);
            removed += 1;
        }
    }
}

/// Add an image texture node targeting `image` and make it the active node
/// the bake writes into.
pub fn bind_target_image(graph: &mut NodeGraph, image: &str) -> NodeId {
    let node = graph.add_node(
        GraphNode::new(NodeKind::ImageTexture)
            .with_param("image", serde_json::Value::String(image.to_string()))
            .with_label("SB bake target"),
    );
    graph.active_node = Some(node);
    node
}

/// Channels baked straight from the material without rewiring.
fn passes_through(channel: Channel) -> bool {
    !channel.is_pbr() || channel == Channel::Normal
}

/// Rewire `graph` in place for `channel`.
pub fn isolate_channel(
    graph: &mut NodeGraph,
    material: &str,
    channel: Channel,
) -> Result<Archetype, TransformError> {
    prune_dangling_shaders(graph);
    let archetype = classify(graph);
    if passes_through(channel) {
        return Ok(archetype);
    }
    let Some((output, source)) = surface_source(graph) else {
        return Err(TransformError::NoOutput {
            material: material.to_string(),
        });
    };
    match archetype {
        Archetype::PurePrincipled => {
            isolate::isolate_principled(graph, output, source, material, channel)?;
        }
        Archetype::PureEmissive => isolate::isolate_emissive(graph, source, channel),
        Archetype::Mixed => {
            isolate::isolate_mixed(graph, output, source, material, channel)?;
        }
        Archetype::Invalid => {
            return Err(TransformError::InvalidArchetype {
                material: material.to_string(),
                channel,
            });
        }
    }
    Ok(archetype)
}

/// Make a disposable duplicate of `material`, rewire it for `channel` and
/// point its active image node at `target_image`. The user's material is
/// never modified apart from its duplicate back-reference. On failure the
/// duplicate is discarded again.
pub fn prepare_for_channel(
    scene: &mut Scene,
    material: &str,
    channel: Channel,
    target_image: &str,
) -> Result<PreparedMaterial, TransformError> {
    let graph_err = |e: anyhow::Error| TransformError::Graph {
        material: material.to_string(),
        message: format!("{e:#}"),
    };
    let dup_name = duplicate_material(scene, material, &channel.to_string()).map_err(graph_err)?;

    let result = (|| -> Result<Archetype, TransformError> {
        let dup: &mut Material = scene.materials.get_mut(&dup_name).ok_or_else(|| TransformError::Graph {
            material: material.to_string(),
            message: "duplicate vanished".to_string(),
        })?;
        dup.ensure_nodes().map_err(graph_err)?;
        if dup.graph.active_output().is_none() {
            return Err(TransformError::NoOutput {
                material: material.to_string(),
            });
        }
        let archetype = isolate_channel(&mut dup.graph, material, channel)?;
        bind_target_image(&mut dup.graph, target_image);
        Ok(archetype)
    })();

    match result {
        Ok(archetype) => {
            log::debug!(
                "prepared {dup_name} ({}) for {channel}",
                archetype.name()
            );
            Ok(PreparedMaterial {
                name: dup_name,
                archetype,
            })
        }
        Err(e) => {
            discard_duplicate(scene, &dup_name);
            Err(e)
        }
    }
}

/// Duplicate `material` without rewiring and bind `target_image`. Used for
/// selected-to-active targets, which receive the bake but are not evaluated.
pub fn prepare_bake_target(
    scene: &mut Scene,
    material: &str,
    target_image: &str,
) -> Result<String, TransformError> {
    let dup_name = duplicate_material(scene, material, "target").map_err(|e| TransformError::Graph {
        material: material.to_string(),
        message: format!("{e:#}"),
    })?;
    if let Some(dup) = scene.materials.get_mut(&dup_name) {
        bind_target_image(&mut dup.graph, target_image);
    }
    Ok(dup_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SocketValue;

    fn scene_with(material: Material) -> Scene {
        let mut scene = Scene::default();
        scene.materials.insert("Mat".to_string(), material);
        scene
    }

    #[test]
    fn duplicate_is_tagged_both_ways_and_original_untouched() {
        let mut scene = scene_with(Material::principled([1.0, 0.0, 0.0, 1.0]).unwrap());
        let before = scene.materials["Mat"].graph.node_count();
        let prepared = prepare_for_channel(&mut scene, "Mat", Channel::Roughness, "img").unwrap();
        assert_eq!(prepared.name, "Mat_SB_roughness");
        assert_eq!(prepared.archetype, Archetype::PurePrincipled);
        let dup = &scene.materials[&prepared.name];
        assert_eq!(dup.tags.original_material.as_deref(), Some("Mat"));
        let orig = &scene.materials["Mat"];
        assert_eq!(orig.tags.disposable_duplicate.as_deref(), Some("Mat_SB_roughness"));
        assert_eq!(orig.graph.node_count(), before);
        assert!(dup.graph.active_node.is_some());
    }

    #[test]
    fn pruning_reaches_a_fixed_point() {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let used = g.add_node(GraphNode::new(NodeKind::PrincipledBsdf));
        g.link(used, "BSDF", out, "Surface").unwrap();
        // dangling chain: principled -> mix (unused)
        let p = g.add_node(GraphNode::new(NodeKind::PrincipledBsdf));
        let mix = g.add_node(GraphNode::new(NodeKind::MixShader));
        g.link(p, "BSDF", mix, "Shader A").unwrap();
        assert_eq!(prune_dangling_shaders(&mut g), 2);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn non_node_material_gets_nodes_before_isolation() {
        let mut m = Material::principled([0.2, 0.4, 0.6, 1.0]).unwrap();
        m.use_nodes = false;
        m.graph = NodeGraph::new();
        let mut scene = scene_with(m);
        let prepared = prepare_for_channel(&mut scene, "Mat", Channel::Diffuse, "img").unwrap();
        assert!(scene.materials[&prepared.name].use_nodes);
        assert!(!scene.materials["Mat"].use_nodes);
    }

    #[test]
    fn failed_transform_leaves_no_duplicate() {
        let mut g = NodeGraph::new();
        let out = g.add_node(GraphNode::new(NodeKind::OutputMaterial));
        let rgb = g.add_node(GraphNode::new(NodeKind::Rgb).with_input("Color", SocketValue::Color([1.0; 4])));
        g.link(rgb, "Color", out, "Surface").unwrap();
        let mut scene = scene_with(Material {
            use_nodes: true,
            graph: g,
            diffuse_color: [1.0; 4],
            tags: Default::default(),
        });
        let err = prepare_for_channel(&mut scene, "Mat", Channel::Metalness, "img").unwrap_err();
        assert!(matches!(err, TransformError::InvalidArchetype { .. }));
        assert_eq!(scene.materials.len(), 1);
        assert!(scene.materials["Mat"].tags.disposable_duplicate.is_none());
    }
}
