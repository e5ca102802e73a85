//! Export-ready copies of the baked objects, wearing a material assembled
//! from the baked images.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::{
    channel::{BakeMode, Channel},
    graph::NodeKind,
    imaging::{ColorSpace, ImageStore},
    material_prep::assemble::{assemble_cycles_material, assemble_pbr_material},
    scene::{ImageRef, Material, ObjectTags, Scene, SceneObject},
    settings::{CopyObjectSettings, RESERVED_UV_NAME},
};

pub const EXPORT_COLLECTION: &str = "BakedObjects";
pub const COPY_SUFFIX: &str = "_Baked";

/// What to copy: a source object and the image group its textures live in
/// (the object itself, the merged-bake name, or the selected-to-active
/// target).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub source: String,
    pub group: String,
}

/// Collapse the UV maps of a copy to a single one.
fn collapse_uvs(object: &mut SceneObject, prefer_reserved: bool) {
    let Some(mesh) = object.mesh.as_mut() else {
        return;
    };
    if mesh.uv_maps.is_empty() {
        return;
    }
    let keep = prefer_reserved
        .then(|| mesh.uv_maps.iter().position(|m| m.name == RESERVED_UV_NAME))
        .flatten()
        .unwrap_or(mesh.active_uv.min(mesh.uv_maps.len() - 1));
    let map = mesh.uv_maps.swap_remove(keep);
    mesh.uv_maps = vec![map];
    mesh.active_uv = 0;
}

/// Register every image a material reads in the scene image table so the
/// saved scene points at the exported files.
fn register_images(scene: &mut Scene, material: &Material, images: &ImageStore) {
    for id in material.graph.nodes_of_kind(NodeKind::ImageTexture) {
        let Some(name) = material.graph.node(id).and_then(|n| n.param_str("image")) else {
            continue;
        };
        let Some(image) = images.get(name) else {
            continue;
        };
        let Some(path) = &image.file_path else {
            continue;
        };
        let non_color = image.buffer().is_none_or(|b| b.color_space != ColorSpace::Srgb);
        scene.images.insert(
            name.to_string(),
            ImageRef {
                path: path.clone(),
                non_color,
            },
        );
    }
}

fn assemble(images: &ImageStore, group: &str, material: Option<&str>, mode: BakeMode) -> Result<Material> {
    if mode == BakeMode::CyclesNative {
        assemble_cycles_material(images, group)
    } else {
        assemble_pbr_material(images, group, material)
    }
}

/// Which assembly a group gets: PBR when any PBR channel was baked for it,
/// else the native combined bake.
pub fn copy_mode(images: &ImageStore, group: &str) -> Option<BakeMode> {
    let has = |pred: &dyn Fn(Channel) -> bool| {
        images
            .iter()
            .any(|i| i.tags.group() == group && i.tags.pack.is_none() && pred(i.tags.channel))
    };
    if has(&|c| c.is_pbr()) {
        Some(BakeMode::Pbr)
    } else if has(&|c| matches!(c, Channel::Native(_) | Channel::Lightmap)) {
        Some(BakeMode::CyclesNative)
    } else {
        None
    }
}

/// Create `<source>_Baked` for every request and return the copy names.
/// With `texture_per_material` every source slot gets its own assembled
/// material; otherwise the copy has one slot.
pub fn prepare_export_copies(
    scene: &mut Scene,
    requests: &[CopyRequest],
    images: &ImageStore,
    settings: &CopyObjectSettings,
    texture_per_material: bool,
) -> Result<Vec<String>> {
    let mut copies = Vec::new();
    // one assembled material per (group, material) shared between copies
    let mut assembled: BTreeMap<(String, Option<String>), String> = BTreeMap::new();

    for req in requests {
        let Some(mode) = copy_mode(images, &req.group) else {
            log::warn!("no baked images for '{}', skipping export copy", req.group);
            continue;
        };
        let source = scene.find_object(&req.source)?.clone();

        let keys: Vec<Option<String>> = if texture_per_material && mode != BakeMode::CyclesNative {
            source.material_slots.clone()
        } else {
            vec![None]
        };
        let mut baked_slots = Vec::with_capacity(keys.len());
        for key in keys {
            let k = (req.group.clone(), key.clone());
            if let Some(existing) = assembled.get(&k) {
                baked_slots.push(Some(existing.clone()));
                continue;
            }
            let material = assemble(images, &req.group, key.as_deref(), mode)
                .with_context(|| format!("assembling baked material for '{}'", req.group))?;
            let base = match &key {
                Some(m) => format!("{}_{m}{COPY_SUFFIX}", req.group),
                None => format!("{}{COPY_SUFFIX}", req.group),
            };
            let name = scene.unique_material_name(&base);
            register_images(scene, &material, images);
            scene.materials.insert(name.clone(), material);
            assembled.insert(k, name.clone());
            baked_slots.push(Some(name));
        }

        let mut copy = source.clone();
        copy.name = scene.unique_object_name(&format!("{}{COPY_SUFFIX}", req.source));
        copy.tags = ObjectTags {
            source_object: Some(req.source.clone()),
            working_copy: false,
            export_copy: true,
        };
        collapse_uvs(&mut copy, settings.prefer_reserved_uv);
        if settings.preserve_materials {
            copy.material_slots.extend(baked_slots);
        } else {
            let per_slot = baked_slots.len() > 1;
            copy.material_slots = baked_slots;
            if !per_slot {
                if let Some(mesh) = copy.mesh.as_mut() {
                    for t in &mut mesh.triangles {
                        t.material_index = 0;
                    }
                }
            }
        }

        log::info!("created export copy {} from {}", copy.name, req.source);
        let name = copy.name.clone();
        scene.objects.push(copy);
        scene.link_to_collection(EXPORT_COLLECTION, &name);
        copies.push(name);
    }
    Ok(copies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::Presentation,
        imaging::{BakedImage, BitDepth, ImageTags, PixelBuffer},
        scene::{MeshData, Triangle, UvMap},
    };

    fn scene() -> Scene {
        let mut scene = Scene::default();
        scene
            .materials
            .insert("Mat".to_string(), Material::principled([0.5; 4]).unwrap());
        scene.objects.push(SceneObject {
            name: "Cube".to_string(),
            kind: Default::default(),
            visibility: Default::default(),
            transform: Default::default(),
            mesh: Some(MeshData {
                positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                triangles: vec![Triangle {
                    indices: [0, 1, 2],
                    material_index: 0,
                }],
                uv_maps: vec![
                    UvMap {
                        name: "UVMap".to_string(),
                        coords: vec![[0.0; 2]; 3],
                    },
                    UvMap {
                        name: RESERVED_UV_NAME.to_string(),
                        coords: vec![[0.5; 2]; 3],
                    },
                ],
                ..Default::default()
            }),
            material_slots: vec![Some("Mat".to_string())],
            tags: Default::default(),
        });
        scene
    }

    fn store() -> ImageStore {
        let mut store = ImageStore::new();
        store
            .insert(BakedImage::new(
                "Cube_diffuse",
                ImageTags {
                    object: Some("Cube".to_string()),
                    batch: String::new(),
                    mode: BakeMode::Pbr,
                    channel: Channel::Diffuse,
                    presentation: Presentation::Standard,
                    merged: None,
                    udim: false,
                    material: None,
                    pack: None,
                },
                PixelBuffer::new(2, 2, ColorSpace::Srgb, BitDepth::Eight),
            ))
            .unwrap();
        store
    }

    #[test]
    fn copy_keeps_reserved_uv_and_gets_baked_material() {
        let mut scene = scene();
        let copies = prepare_export_copies(
            &mut scene,
            &[CopyRequest {
                source: "Cube".to_string(),
                group: "Cube".to_string(),
            }],
            &store(),
            &CopyObjectSettings::default(),
            false,
        )
        .unwrap();
        assert_eq!(copies, vec!["Cube_Baked".to_string()]);
        let copy = scene.object("Cube_Baked").unwrap();
        assert!(copy.tags.export_copy);
        assert_eq!(copy.tags.source_object.as_deref(), Some("Cube"));
        let mesh = copy.mesh.as_ref().unwrap();
        assert_eq!(mesh.uv_maps.len(), 1);
        assert_eq!(mesh.uv_maps[0].name, RESERVED_UV_NAME);
        assert_eq!(copy.material_slots, vec![Some("Cube_Baked".to_string())]);
        assert_eq!(scene.collections[EXPORT_COLLECTION], vec!["Cube_Baked".to_string()]);
        // source untouched
        assert_eq!(scene.object("Cube").unwrap().material_slots, vec![Some("Mat".to_string())]);
    }

    #[test]
    fn group_without_images_is_skipped() {
        let mut scene = scene();
        let copies = prepare_export_copies(
            &mut scene,
            &[CopyRequest {
                source: "Cube".to_string(),
                group: "Other".to_string(),
            }],
            &store(),
            &CopyObjectSettings::default(),
            false,
        )
        .unwrap();
        assert!(copies.is_empty());
    }
}
