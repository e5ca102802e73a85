#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use node_forge_baker::{
    graph::{NodeKind, SocketValue},
    scene::{Material, MeshData, Scene, SceneObject, Transform, Triangle, UvMap},
    settings::RESERVED_UV_NAME,
};

/// Fresh directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("nfb_{tag}_{nonce}_{n}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Unit quad in the XY plane facing +Z, UVs equal to XY.
pub fn quad_mesh(uv_offset: [f32; 2]) -> MeshData {
    let positions = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
    let coords = positions
        .iter()
        .map(|p: &[f32; 3]| [p[0] + uv_offset[0], p[1] + uv_offset[1]])
        .collect();
    MeshData {
        positions,
        triangles: vec![
            Triangle {
                indices: [0, 1, 2],
                material_index: 0,
            },
            Triangle {
                indices: [0, 2, 3],
                material_index: 0,
            },
        ],
        uv_maps: vec![UvMap {
            name: "UVMap".to_string(),
            coords,
        }],
        ..Default::default()
    }
}

pub fn mesh_object(name: &str, mesh: MeshData, material: &str) -> SceneObject {
    SceneObject {
        name: name.to_string(),
        kind: Default::default(),
        visibility: Default::default(),
        transform: Transform {
            location: [0.0; 3],
            scale: [1.0; 3],
        },
        mesh: Some(mesh),
        material_slots: vec![Some(material.to_string())],
        tags: Default::default(),
    }
}

/// Principled material with the given socket values set.
pub fn principled(inputs: &[(&str, SocketValue)]) -> Material {
    let mut material = Material::principled([0.8, 0.8, 0.8, 1.0]).unwrap();
    let bsdf = material.graph.nodes_of_kind(NodeKind::PrincipledBsdf)[0];
    let node = material.graph.node_mut(bsdf).unwrap();
    for (socket, value) in inputs {
        node.inputs.insert(socket.to_string(), *value);
    }
    material
}

/// One selected quad called `name` wearing `material`.
pub fn single_quad_scene(name: &str, material: Material) -> Scene {
    let mut scene = Scene::default();
    scene.materials.insert(format!("{name}Mat"), material);
    scene
        .objects
        .push(mesh_object(name, quad_mesh([0.0, 0.0]), &format!("{name}Mat")));
    scene.selection = vec![name.to_string()];
    scene.active_object = Some(name.to_string());
    scene
}

/// Add a reserved-name UV map in front of the existing ones.
pub fn add_reserved_uv(scene: &mut Scene, object: &str) {
    let mesh = scene.object_mut(object).unwrap().mesh.as_mut().unwrap();
    let coords = mesh.uv_maps[0].coords.clone();
    mesh.uv_maps.push(UvMap {
        name: RESERVED_UV_NAME.to_string(),
        coords,
    });
}

pub fn assert_close(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() <= eps, "expected {b}, got {a}");
}
