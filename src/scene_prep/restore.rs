//! Undoing what a bake did to the scene: duplicate materials, scratch
//! copies, UV activation and visibility.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::{
    material_prep::discard_duplicate,
    scene::{ObjectTags, Scene},
    settings::RESERVED_UV_NAME,
};

/// Collection holding scratch copies used for the special maps.
pub const SCRATCH_COLLECTION: &str = "SB_Working";

/// Point every slot that holds a disposable duplicate back at its original
/// and delete the duplicates. Safe to call any number of times.
pub fn restore_original_materials(scene: &mut Scene) -> usize {
    let originals: BTreeMap<String, String> = scene
        .materials
        .iter()
        .filter_map(|(name, m)| {
            m.tags
                .original_material
                .as_ref()
                .map(|o| (name.clone(), o.clone()))
        })
        .collect();
    if originals.is_empty() {
        return 0;
    }
    for obj in &mut scene.objects {
        for slot in obj.material_slots.iter_mut().flatten() {
            if let Some(original) = originals.get(slot.as_str()) {
                *slot = original.clone();
            }
        }
    }
    for dup in originals.keys() {
        discard_duplicate(scene, dup);
    }
    log::debug!("restored {} duplicate material(s)", originals.len());
    originals.len()
}

/// Copy `source` into the scratch collection. The copy keeps geometry and
/// slots; callers replace the slots with synthesized materials.
pub fn create_working_copy(scene: &mut Scene, source: &str) -> Result<String> {
    let mut copy = scene.find_object(source)?.clone();
    let name = scene.unique_object_name(&format!("{source}_SB_work"));
    copy.name = name.clone();
    copy.tags = ObjectTags {
        source_object: Some(source.to_string()),
        working_copy: true,
        export_copy: false,
    };
    scene.objects.push(copy);
    scene.link_to_collection(SCRATCH_COLLECTION, &name);
    Ok(name)
}

/// Delete the scratch collection with its objects and every scratch
/// material left unused. Returns the number of objects removed.
pub fn remove_working_copies(scene: &mut Scene) -> usize {
    let removed = scene.remove_collection(SCRATCH_COLLECTION);
    // stray copies that lost their collection link
    scene.objects.retain(|o| !o.tags.working_copy);
    scene.purge_scratch_materials();
    removed.len()
}

pub fn capture_active_uvs(scene: &Scene, objects: &[String]) -> BTreeMap<String, usize> {
    objects
        .iter()
        .filter_map(|n| {
            let mesh = scene.object(n)?.mesh.as_ref()?;
            Some((n.clone(), mesh.active_uv))
        })
        .collect()
}

pub fn restore_active_uvs(scene: &mut Scene, active: &BTreeMap<String, usize>) {
    for (name, index) in active {
        if let Some(mesh) = scene.object_mut(name).and_then(|o| o.mesh.as_mut()) {
            if *index < mesh.uv_maps.len() {
                mesh.active_uv = *index;
            }
        }
    }
}

/// Make the reserved-name UV map active on every object that has one.
pub fn activate_reserved_uv(scene: &mut Scene, objects: &[String]) {
    for name in objects {
        let Some(mesh) = scene.object_mut(name).and_then(|o| o.mesh.as_mut()) else {
            continue;
        };
        if let Some(i) = mesh.uv_maps.iter().position(|m| m.name == RESERVED_UV_NAME) {
            mesh.active_uv = i;
        }
    }
}

/// Translate the active UV map of every object by `offset`.
pub fn shift_uvs(scene: &mut Scene, objects: &[String], offset: [f32; 2]) {
    if offset == [0.0, 0.0] {
        return;
    }
    for name in objects {
        if let Some(mesh) = scene.object_mut(name).and_then(|o| o.mesh.as_mut()) {
            mesh.shift_active_uv(offset);
        }
    }
}

/// Active UV map index and coordinates per object, saved before a UDIM loop.
pub type UvCoordSnapshot = BTreeMap<String, (usize, Vec<[f32; 2]>)>;

pub fn capture_uv_coords(scene: &Scene, objects: &[String]) -> UvCoordSnapshot {
    objects
        .iter()
        .filter_map(|n| {
            let mesh = scene.object(n)?.mesh.as_ref()?;
            let map = mesh.active_uv_map()?;
            Some((n.clone(), (mesh.active_uv, map.coords.clone())))
        })
        .collect()
}

/// Put saved coordinates back bit for bit. Maps whose vertex count changed
/// are left alone.
pub fn restore_uv_coords(scene: &mut Scene, saved: &UvCoordSnapshot) {
    for (name, (index, coords)) in saved {
        let Some(map) = scene
            .object_mut(name)
            .and_then(|o| o.mesh.as_mut())
            .and_then(|m| m.uv_maps.get_mut(*index))
        else {
            continue;
        };
        if map.coords.len() == coords.len() {
            map.coords.clone_from(coords);
        }
    }
}

pub fn hide_objects(scene: &mut Scene, objects: &[String]) {
    for name in objects {
        if let Some(obj) = scene.object_mut(name) {
            obj.visibility.hide_viewport = true;
            obj.visibility.hide_render = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::Channel,
        material_prep::prepare_for_channel,
        scene::{Material, SceneObject},
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
            mesh: Some(Default::default()),
            material_slots: vec![Some("Mat".to_string())],
            tags: Default::default(),
        });
        scene
    }

    #[test]
    fn restore_repoints_slots_and_deletes_duplicates() {
        let mut scene = scene();
        let p = prepare_for_channel(&mut scene, "Mat", Channel::Diffuse, "img").unwrap();
        scene.objects[0].material_slots[0] = Some(p.name.clone());
        assert_eq!(restore_original_materials(&mut scene), 1);
        assert_eq!(scene.objects[0].material_slots[0].as_deref(), Some("Mat"));
        assert!(!scene.materials.contains_key(&p.name));
        assert!(scene.materials["Mat"].tags.disposable_duplicate.is_none());
        assert_eq!(restore_original_materials(&mut scene), 0);
    }

    #[test]
    fn working_copies_are_removed_with_their_collection() {
        let mut scene = scene();
        let copy = create_working_copy(&mut scene, "Cube").unwrap();
        assert!(scene.object(&copy).unwrap().tags.working_copy);
        assert_eq!(remove_working_copies(&mut scene), 1);
        assert!(scene.object(&copy).is_none());
        assert!(scene.object("Cube").is_some());
    }
}
