//! Wavefront OBJ + MTL writer for export copies.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{
    graph::{NodeGraph, NodeId, NodeKind},
    scene::Scene,
};

/// Follow links upstream from `socket` of `node` to the first image
/// texture, looking through invert and normal-map nodes.
fn image_feeding(graph: &NodeGraph, node: NodeId, socket: &str) -> Option<String> {
    let mut link = graph.incoming(node, socket)?;
    for _ in 0..8 {
        let n = graph.node(link.from)?;
        match n.kind {
            NodeKind::ImageTexture => return n.param_str("image").map(str::to_string),
            NodeKind::Invert | NodeKind::NormalMap => link = graph.incoming(link.from, "Color")?,
            _ => return None,
        }
    }
    None
}

fn texture_path(scene: &Scene, image: &str, dir: &Path) -> Option<String> {
    let path = &scene.images.get(image)?.path;
    let rel = path.strip_prefix(dir).unwrap_or(path);
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn write_mtl_entry(out: &mut String, scene: &Scene, name: &str, dir: &Path) {
    let _ = writeln!(out, "newmtl {name}");
    let _ = writeln!(out, "Kd 1.000000 1.000000 1.000000");
    let Some(material) = scene.materials.get(name) else {
        return;
    };
    let graph = &material.graph;
    let maps: &[(&str, &str)] = &[
        ("Base Color", "map_Kd"),
        ("Metallic", "map_Pm"),
        ("Roughness", "map_Pr"),
        ("Normal", "map_Bump"),
        ("Emission", "map_Ke"),
        ("Alpha", "map_d"),
    ];
    for bsdf in graph.nodes_of_kind(NodeKind::PrincipledBsdf) {
        for (socket, key) in maps {
            if let Some(path) = image_feeding(graph, bsdf, socket).and_then(|i| texture_path(scene, &i, dir)) {
                let _ = writeln!(out, "{key} {path}");
            }
        }
    }
    for emission in graph.nodes_of_kind(NodeKind::Emission) {
        if let Some(path) = image_feeding(graph, emission, "Color").and_then(|i| texture_path(scene, &i, dir)) {
            let _ = writeln!(out, "map_Kd {path}");
        }
    }
    out.push('\n');
}

/// Write `objects` into `<dir>/<stem>.obj` with a sibling `.mtl`.
pub fn write_obj(scene: &Scene, objects: &[String], dir: &Path, stem: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create mesh export directory {}", dir.display()))?;
    let obj_path = dir.join(format!("{stem}.obj"));
    let mtl_name = format!("{stem}.mtl");

    let mut obj = String::new();
    let mut mtl = String::new();
    let mut materials: Vec<String> = Vec::new();
    let _ = writeln!(obj, "mtllib {mtl_name}");

    let (mut v_base, mut vt_base) = (1usize, 1usize);
    for name in objects {
        let object = scene.find_object(name)?;
        let Some(mesh) = object.mesh.as_ref() else {
            continue;
        };
        let _ = writeln!(obj, "o {name}");
        for p in &mesh.positions {
            let [x, y, z] = object.transform.apply(*p);
            let _ = writeln!(obj, "v {x:.6} {y:.6} {z:.6}");
        }
        let uv = mesh.active_uv_map();
        if let Some(uv) = uv {
            for [u, v] in &uv.coords {
                let _ = writeln!(obj, "vt {u:.6} {v:.6}");
            }
        }
        let mut current: Option<usize> = None;
        for tri in &mesh.triangles {
            if current != Some(tri.material_index) {
                current = Some(tri.material_index);
                if let Some(Some(m)) = object.material_slots.get(tri.material_index) {
                    let _ = writeln!(obj, "usemtl {m}");
                    if !materials.contains(m) {
                        materials.push(m.clone());
                    }
                }
            }
            let [a, b, c] = tri.indices.map(|i| i as usize);
            if uv.is_some() {
                let _ = writeln!(
                    obj,
                    "f {}/{} {}/{} {}/{}",
                    a + v_base,
                    a + vt_base,
                    b + v_base,
                    b + vt_base,
                    c + v_base,
                    c + vt_base
                );
            } else {
                let _ = writeln!(obj, "f {} {} {}", a + v_base, b + v_base, c + v_base);
            }
        }
        v_base += mesh.positions.len();
        vt_base += uv.map_or(0, |u| u.coords.len());
    }

    for m in &materials {
        write_mtl_entry(&mut mtl, scene, m, dir);
    }
    std::fs::write(&obj_path, obj).with_context(|| format!("failed to write {}", obj_path.display()))?;
    let mtl_path = dir.join(&mtl_name);
    std::fs::write(&mtl_path, mtl).with_context(|| format!("failed to write {}", mtl_path.display()))?;
    log::info!("exported mesh {}", obj_path.display());
    Ok(obj_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Material, MeshData, SceneObject, Transform, Triangle, UvMap};

    #[test]
    fn obj_reads_back_with_tobj() {
        let mut scene = Scene::default();
        scene
            .materials
            .insert("Baked".to_string(), Material::principled([1.0; 4]).unwrap());
        scene.objects.push(SceneObject {
            name: "Tri".to_string(),
            kind: Default::default(),
            visibility: Default::default(),
            transform: Transform {
                location: [0.0, 0.0, 2.0],
                scale: [1.0; 3],
            },
            mesh: Some(MeshData {
                positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                triangles: vec![Triangle {
                    indices: [0, 1, 2],
                    material_index: 0,
                }],
                uv_maps: vec![UvMap {
                    name: "UVMap".to_string(),
                    coords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
                }],
                ..Default::default()
            }),
            material_slots: vec![Some("Baked".to_string())],
            tags: Default::default(),
        });

        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("nfb_obj_{nonce}"));
        let path = write_obj(&scene, &["Tri".to_string()], &dir, "Tri").unwrap();

        let (models, materials) = tobj::load_obj(&path, &tobj::GPU_LOAD_OPTIONS).unwrap();
        assert_eq!(models.len(), 1);
        let mesh = &models[0].mesh;
        assert_eq!(mesh.indices.len(), 3);
        assert_eq!(mesh.texcoords.len(), 6);
        assert!(mesh.positions.chunks(3).all(|p| (p[2] - 2.0).abs() < 1e-6));
        assert_eq!(materials.unwrap()[0].name, "Baked");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
