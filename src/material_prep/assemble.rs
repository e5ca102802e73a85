//! Forward-lit materials built from baked images, for export copies.

use anyhow::{Result, bail};
use serde_json::json;

use crate::{
    channel::{Channel, NativePass, PBR_CHANNELS, Presentation},
    graph::{GraphNode, NodeGraph, NodeId, NodeKind, SocketValue},
    imaging::{ColorSpace, ImageStore},
    scene::{Material, MaterialTags},
    schema,
};

fn image_node(graph: &mut NodeGraph, image: &str, color_space: ColorSpace) -> NodeId {
    graph.add_node(
        GraphNode::new(NodeKind::ImageTexture)
            .with_param("image", json!(image))
            .with_param("nonColor", json!(color_space != ColorSpace::Srgb))
            .with_label(image.to_string()),
    )
}

fn finish(mut graph: NodeGraph) -> Result<Material> {
    schema::normalize_graph_defaults(&mut graph, schema::load_default_scheme()?);
    Ok(Material {
        use_nodes: true,
        graph,
        diffuse_color: [0.8, 0.8, 0.8, 1.0],
        tags: MaterialTags::default(),
    })
}

/// Principled material reading every baked PBR channel of `group`.
/// Glossiness goes through an invert node, normals through a normal map
/// node that records the convention they were baked in.
pub fn assemble_pbr_material(images: &ImageStore, group: &str, material: Option<&str>) -> Result<Material> {
    let mut graph = NodeGraph::new();
    let output = graph.add_node(GraphNode::new(NodeKind::OutputMaterial));
    let bsdf = graph.add_node(GraphNode::new(NodeKind::PrincipledBsdf));
    graph.link(bsdf, "BSDF", output, "Surface")?;

    let mut wired = 0;
    for &channel in PBR_CHANNELS {
        let Some(image) = images.find_channel(group, channel, material) else {
            continue;
        };
        let Some(socket) = channel.principled_socket() else {
            continue;
        };
        let color_space = image
            .buffer()
            .map(|b| b.color_space)
            .unwrap_or(if channel.is_color_data() { ColorSpace::Srgb } else { ColorSpace::NonColor });
        let tex = image_node(&mut graph, &image.name, color_space);
        match (channel, image.tags.presentation) {
            (Channel::Roughness, Presentation::Glossy) => {
                let invert = graph.add_node(
                    GraphNode::new(NodeKind::Invert).with_input("Fac", SocketValue::Float(1.0)),
                );
                graph.link(tex, "Color", invert, "Color")?;
                graph.link(invert, "Color", bsdf, socket)?;
            }
            (Channel::Normal, presentation) => {
                let convention = if presentation == Presentation::DirectX { "directx" } else { "opengl" };
                let normal_map = graph.add_node(
                    GraphNode::new(NodeKind::NormalMap).with_param("convention", json!(convention)),
                );
                graph.link(tex, "Color", normal_map, "Color")?;
                graph.link(normal_map, "Normal", bsdf, socket)?;
            }
            _ => graph.link(tex, "Color", bsdf, socket)?,
        }
        wired += 1;
    }
    if wired == 0 {
        bail!("no baked PBR images found for '{group}'");
    }
    finish(graph)
}

/// Emission material showing a native combined (or diffuse) bake.
pub fn assemble_cycles_material(images: &ImageStore, group: &str) -> Result<Material> {
    let image = [
        Channel::Native(NativePass::Combined),
        Channel::Native(NativePass::Diffuse),
        Channel::Lightmap,
    ]
    .into_iter()
    .find_map(|c| images.find_channel(group, c, None));
    let Some(image) = image else {
        bail!("no combined or diffuse bake found for '{group}'");
    };

    let mut graph = NodeGraph::new();
    let output = graph.add_node(GraphNode::new(NodeKind::OutputMaterial));
    let emission = graph.add_node(
        GraphNode::new(NodeKind::Emission).with_input("Strength", SocketValue::Float(1.0)),
    );
    let tex = image_node(&mut graph, &image.name, ColorSpace::Srgb);
    graph.link(tex, "Color", emission, "Color")?;
    graph.link(emission, "Emission", output, "Surface")?;
    finish(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::BakeMode,
        imaging::{BakedImage, BitDepth, ImageTags, PixelBuffer},
    };

    fn add(store: &mut ImageStore, name: &str, channel: Channel, presentation: Presentation) {
        let tags = ImageTags {
            object: Some("Cube".to_string()),
            batch: String::new(),
            mode: BakeMode::Pbr,
            channel,
            presentation,
            merged: None,
            udim: false,
            material: None,
            pack: None,
        };
        store
            .insert(BakedImage::new(
                name,
                tags,
                PixelBuffer::new(1, 1, ColorSpace::NonColor, BitDepth::Eight),
            ))
            .unwrap();
    }

    #[test]
    fn glossy_roughness_is_inverted_back() {
        let mut store = ImageStore::new();
        add(&mut store, "Cube_diffuse", Channel::Diffuse, Presentation::Standard);
        add(&mut store, "Cube_glossiness", Channel::Roughness, Presentation::Glossy);
        let m = assemble_pbr_material(&store, "Cube", None).unwrap();
        let bsdf = m.graph.nodes_of_kind(NodeKind::PrincipledBsdf)[0];
        let rough = m.graph.incoming(bsdf, "Roughness").unwrap();
        assert_eq!(m.graph.node(rough.from).unwrap().kind, NodeKind::Invert);
        let base = m.graph.incoming(bsdf, "Base Color").unwrap();
        assert_eq!(m.graph.node(base.from).unwrap().param_str("image"), Some("Cube_diffuse"));
    }

    #[test]
    fn nothing_to_assemble_is_an_error() {
        assert!(assemble_pbr_material(&ImageStore::new(), "Cube", None).is_err());
        assert!(assemble_cycles_material(&ImageStore::new(), "Cube").is_err());
    }
}
