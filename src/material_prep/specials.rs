//! Single-purpose materials for the special maps. They are assigned to
//! scratch copies of the baked objects, never to the originals.

use anyhow::{Result, bail};
use serde_json::json;

use crate::{
    channel::Channel,
    graph::{GraphNode, NodeGraph, NodeKind, SocketValue},
    scene::{Material, MaterialTags},
    settings::SpecialSettings,
};

use super::bind_target_image;

/// Build the material that emits `channel`. `flat_color` is the material-ID
/// color and is required for [`Channel::MaterialId`].
pub fn special_material(
    channel: Channel,
    specials: &SpecialSettings,
    flat_color: Option<[f32; 3]>,
    target_image: &str,
) -> Result<Material> {
    let mut graph = NodeGraph::new();
    let output = graph.add_node(GraphNode::new(NodeKind::OutputMaterial));
    let (source, socket) = match channel {
        Channel::AmbientOcclusion => (
            graph.add_node(
                GraphNode::new(NodeKind::AmbientOcclusion)
                    .with_input("Distance", SocketValue::Float(specials.ao_distance))
                    .with_param("samples", json!(specials.ao_samples)),
            ),
            "AO",
        ),
        Channel::Curvature => (
            graph.add_node(
                GraphNode::new(NodeKind::Pointiness)
                    .with_input("Contrast", SocketValue::Float(specials.curvature_contrast)),
            ),
            "Pointiness",
        ),
        Channel::Thickness => (
            graph.add_node(
                GraphNode::new(NodeKind::Thickness)
                    .with_input("Distance", SocketValue::Float(specials.thickness_distance))
                    .with_param("samples", json!(specials.thickness_samples)),
            ),
            "Thickness",
        ),
        Channel::VertexColor => (
            graph.add_node(
                GraphNode::new(NodeKind::VertexColor)
                    .with_param("layer", json!(specials.vertex_color_layer)),
            ),
            "Color",
        ),
        Channel::MaterialId => {
            let Some([r, g, b]) = flat_color else {
                bail!("material id bake needs a color");
            };
            (
                graph.add_node(
                    GraphNode::new(NodeKind::Rgb).with_input("Color", SocketValue::Color([r, g, b, 1.0])),
                ),
                "Color",
            )
        }
        other => bail!("{other} is not a synthesized special map"),
    };
    let emission = graph.add_node(
        GraphNode::new(NodeKind::Emission).with_input("Strength", SocketValue::Float(1.0)),
    );
    graph.link(source, socket, emission, "Color")?;
    graph.link(emission, "Emission", output, "Surface")?;
    bind_target_image(&mut graph, target_image);

    Ok(Material {
        use_nodes: true,
        graph,
        diffuse_color: [1.0; 4],
        tags: MaterialTags {
            scratch: true,
            ..Default::default()
        },
    })
}
