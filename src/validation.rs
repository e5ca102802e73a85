//! Pre-flight checks. Everything here runs before the first mutation; the
//! only change validation ever makes is assigning a placeholder material to
//! objects with empty slots, and only once every check has passed.

use std::collections::BTreeSet;

use crate::{
    channel::{BakeMode, Channel},
    error::ValidationError,
    material_prep::classify::{Archetype, classify, has_viewer_in_output_path},
    scene::{EditorMode, Material, Scene},
    settings::BakeSettings,
};

/// Export folder names that collide with internal storage.
pub const RESERVED_FOLDER_NAMES: &[&str] = &["textures"];
pub const PLACEHOLDER_MATERIAL: &str = "SB_Placeholder";

const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub diagnostics: Vec<String>,
    /// Objects that received the placeholder material.
    pub repaired: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ValidationError {
                diagnostics: self.diagnostics,
            })
        }
    }
}

/// Source objects for a bake: the explicit list, else the selection. The
/// selected-to-active target is never its own source.
pub fn bake_objects(scene: &Scene, settings: &BakeSettings) -> Vec<String> {
    let names = if settings.objects.is_empty() {
        &scene.selection
    } else {
        &settings.objects
    };
    let mut seen = BTreeSet::new();
    names
        .iter()
        .filter(|n| !(uses_target(settings) && settings.target_object.as_ref() == Some(*n)))
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}

fn uses_target(settings: &BakeSettings) -> bool {
    settings.selected_to_active
}

fn mode_uses_target(mode: BakeMode) -> bool {
    matches!(mode, BakeMode::PbrSelectedToActive | BakeMode::SpecialsTargetOnly)
}

/// Why `name` cannot be used as a file name, if it cannot.
pub fn filename_problem(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("name is empty".to_string());
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control())
    {
        return Some(format!("contains the character {c:?}"));
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Some("ends with a dot or a space".to_string());
    }
    let stem = name.split('.').next().unwrap_or(name).to_ascii_uppercase();
    if WINDOWS_RESERVED.contains(&stem.as_str()) {
        return Some(format!("'{stem}' is a reserved device name"));
    }
    None
}

fn is_missing_material(scene: &Scene, slot: &Option<String>) -> bool {
    slot.as_ref().is_none_or(|m| !scene.materials.contains_key(m))
}

/// Run every check for `mode`. Categories are checked in order and the first
/// category with problems ends the run; inside a category every problem is
/// reported.
pub fn validate(scene: &mut Scene, mode: BakeMode, settings: &BakeSettings) -> ValidationReport {
    let mut report = ValidationReport {
        diagnostics: collect_diagnostics(scene, mode, settings),
        repaired: Vec::new(),
    };
    if report.is_ok() {
        report.repaired = repair_missing_materials(scene, mode, settings);
    }
    report
}

fn collect_diagnostics(scene: &Scene, mode: BakeMode, settings: &BakeSettings) -> Vec<String> {
    let sources = bake_objects(scene, settings);
    let target = settings.target_object.clone().filter(|_| mode_uses_target(mode));
    let mut candidates = sources.clone();
    if let Some(t) = &target {
        candidates.push(t.clone());
    }

    let checks: [&dyn Fn() -> Vec<String>; 11] = [
        // 1. editor mode
        &|| {
            if scene.editor_mode == EditorMode::Object {
                Vec::new()
            } else {
                vec![format!(
                    "switch to object mode before baking (currently in {:?} mode)",
                    scene.editor_mode
                )]
            }
        },
        // 2. settings consistency and pack dependencies
        &|| settings_problems(settings),
        // 3. something to bake
        &|| {
            let mut out = Vec::new();
            if sources.is_empty() {
                out.push("no objects selected for baking".to_string());
            }
            if settings.selected_channels().is_empty() {
                out.push("no bake channels selected".to_string());
            }
            out
        },
        // 4. meshes only
        &|| {
            candidates
                .iter()
                .filter_map(|n| match scene.object(n) {
                    None => Some(format!("object '{n}' does not exist")),
                    Some(o) if !o.is_mesh() => {
                        Some(format!("object '{n}' is a {:?}, only meshes can be baked", o.kind))
                    }
                    Some(_) => None,
                })
                .collect()
        },
        // 5. export folder
        &|| {
            let folder = settings.export.folder_name.trim();
            if settings.export.enabled
                && RESERVED_FOLDER_NAMES
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(folder))
            {
                vec![format!("export folder name '{folder}' is reserved")]
            } else {
                Vec::new()
            }
        },
        // 6. visibility
        &|| {
            candidates
                .iter()
                .filter_map(|n| scene.object(n))
                .filter(|o| o.visibility.any_hidden())
                .map(|o| {
                    let v = &o.visibility;
                    let which: Vec<&str> = [
                        (v.hide_viewport, "viewport"),
                        (v.hide_render, "render"),
                        (v.hide_eye, "view layer"),
                        (v.hide_select, "selection"),
                    ]
                    .into_iter()
                    .filter(|(h, _)| *h)
                    .map(|(_, w)| w)
                    .collect();
                    format!("object '{}' is hidden ({})", o.name, which.join(", "))
                })
                .collect()
        },
        // 7. geometry
        &|| {
            candidates
                .iter()
                .filter_map(|n| scene.object(n))
                .filter(|o| o.face_count() == 0)
                .map(|o| format!("object '{}' has no faces", o.name))
                .collect()
        },
        // 8. material graphs
        &|| material_problems(scene, mode, &sources),
        // 9. uvs and target
        &|| uv_and_target_problems(scene, mode, settings, &sources),
        // 10. file names
        &|| {
            if !settings.export.enabled {
                return Vec::new();
            }
            let mut names: Vec<(&str, &str)> = candidates.iter().map(|n| ("object", n.as_str())).collect();
            if settings.merged_bake {
                names.push(("merged bake", settings.merged_bake_name.as_str()));
            }
            if !settings.batch_name.is_empty() {
                names.push(("batch", settings.batch_name.as_str()));
            }
            for p in &settings.channel_packs {
                names.push(("channel pack", p.name.as_str()));
            }
            names
                .into_iter()
                .filter_map(|(what, n)| {
                    filename_problem(n).map(|why| format!("{what} name '{n}' is not a valid file name: {why}"))
                })
                .collect()
        },
        // 11. vertex colors
        &|| {
            if !(mode.is_specials() && settings.specials.contains(&Channel::VertexColor)) {
                return Vec::new();
            }
            let layer = settings.specials_settings.vertex_color_layer.as_str();
            special_objects(mode, &sources, &target)
                .iter()
                .filter_map(|n| scene.object(n))
                .filter(|o| {
                    o.mesh.as_ref().is_none_or(|m| {
                        if layer.is_empty() {
                            m.vertex_colors.is_empty()
                        } else {
                            !m.vertex_colors.iter().any(|c| c.name == layer)
                        }
                    })
                })
                .map(|o| format!("object '{}' has no vertex color layer to bake", o.name))
                .collect()
        },
    ];

    for check in checks {
        let problems = check();
        if !problems.is_empty() {
            return problems;
        }
    }
    Vec::new()
}

fn special_objects(mode: BakeMode, sources: &[String], target: &Option<String>) -> Vec<String> {
    match (mode, target) {
        (BakeMode::SpecialsTargetOnly, Some(t)) => vec![t.clone()],
        _ => sources.to_vec(),
    }
}

fn settings_problems(settings: &BakeSettings) -> Vec<String> {
    let mut out = Vec::new();
    for pack in &settings.channel_packs {
        for (slot, channel) in ["R", "G", "B", "A"].iter().zip(pack.assignments()) {
            if let Some(c) = channel {
                if !settings.is_channel_selected(c) {
                    out.push(format!(
                        "channel pack '{}' uses {c} for {slot}, but {c} is not being baked",
                        pack.name
                    ));
                }
            }
        }
        if pack.assignments().iter().all(Option::is_none) {
            out.push(format!("channel pack '{}' has no channels assigned", pack.name));
        }
    }
    if !settings.channel_packs.is_empty() && settings.uses_udims() {
        out.push("channel packing is not available for UDIM bakes".to_string());
    }
    if settings.udims && settings.udim_tiles == 0 {
        out.push("UDIM tile count must be at least 1".to_string());
    }
    if settings.merged_bake && settings.merged_bake_name.trim().is_empty() {
        out.push("merged bake needs a name".to_string());
    }
    if settings.merged_bake && settings.texture_per_material {
        out.push("texture per material cannot be combined with a merged bake".to_string());
    }
    if settings.resolution[0] == 0 || settings.resolution[1] == 0 {
        out.push("bake resolution must be non-zero".to_string());
    }
    if settings.specials.iter().any(|c| !c.is_special()) {
        out.push("only special maps can be requested as specials".to_string());
    }
    if settings.channels.iter().any(|c| !c.is_pbr()) {
        out.push("only PBR channels can be requested as channels".to_string());
    }
    out
}

fn material_problems(scene: &Scene, mode: BakeMode, sources: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut checked = BTreeSet::new();
    for name in sources {
        let Some(obj) = scene.object(name) else {
            continue;
        };
        for slot in obj.material_slots.iter().flatten() {
            if !checked.insert(slot.clone()) {
                continue;
            }
            let Some(material) = scene.materials.get(slot) else {
                continue;
            };
            if !material.use_nodes {
                continue;
            }
            if has_viewer_in_output_path(&material.graph) {
                out.push(format!(
                    "material '{slot}' has a viewer node connected to its output; disconnect it"
                ));
            }
            if mode.is_pbr() && classify(&material.graph) == Archetype::Invalid {
                out.push(format!(
                    "material '{slot}' on '{name}' must use principled, emission or mix shaders feeding the output"
                ));
            }
        }
    }
    out
}

fn uv_and_target_problems(
    scene: &Scene,
    mode: BakeMode,
    settings: &BakeSettings,
    sources: &[String],
) -> Vec<String> {
    let mut out = Vec::new();
    let has_uvs = |n: &str| {
        scene
            .object(n)
            .and_then(|o| o.mesh.as_ref())
            .is_some_and(|m| !m.uv_maps.is_empty())
    };

    if mode_uses_target(mode) {
        match settings.target_object.as_deref() {
            None => out.push("selected to active needs a target object".to_string()),
            Some(t) => match scene.object(t) {
                None => out.push(format!("target object '{t}' does not exist")),
                Some(o) if !o.is_mesh() => out.push(format!("target object '{t}' is not a mesh")),
                Some(_) => {
                    if !has_uvs(t) {
                        out.push(format!("target object '{t}' has no UV map"));
                    }
                }
            },
        }
    } else {
        for n in sources {
            if !has_uvs(n) {
                out.push(format!("object '{n}' has no UV map"));
            }
        }
    }
    out
}

/// Give every empty or dangling slot (and slot-less objects) a placeholder
/// principled material.
fn repair_missing_materials(scene: &mut Scene, mode: BakeMode, settings: &BakeSettings) -> Vec<String> {
    let mut names = bake_objects(scene, settings);
    if mode_uses_target(mode) {
        names.extend(settings.target_object.clone());
    }
    let needs_repair: Vec<String> = names
        .into_iter()
        .filter(|n| {
            scene.object(n).is_some_and(|o| {
                o.material_slots.is_empty() || o.material_slots.iter().any(|s| is_missing_material(scene, s))
            })
        })
        .collect();
    if needs_repair.is_empty() {
        return needs_repair;
    }

    if !scene.materials.contains_key(PLACEHOLDER_MATERIAL) {
        match Material::principled([0.8, 0.8, 0.8, 1.0]) {
            Ok(m) => {
                scene.materials.insert(PLACEHOLDER_MATERIAL.to_string(), m);
            }
            Err(e) => {
                log::warn!("could not build placeholder material: {e:#}");
                return Vec::new();
            }
        }
    }
    let known: BTreeSet<String> = scene.materials.keys().cloned().collect();
    for name in &needs_repair {
        if let Some(obj) = scene.object_mut(name) {
            if obj.material_slots.is_empty() {
                obj.material_slots.push(None);
            }
            for slot in &mut obj.material_slots {
                if slot.as_ref().is_none_or(|m| !known.contains(m)) {
                    *slot = Some(PLACEHOLDER_MATERIAL.to_string());
                }
            }
            log::info!("assigned {PLACEHOLDER_MATERIAL} to empty material slots of '{name}'");
        }
    }
    needs_repair
}

/// Validate every mode in `modes`; the first failing mode's diagnostics are
/// returned. Placeholder materials are only assigned once every mode passes.
pub fn validate_all(scene: &mut Scene, modes: &[BakeMode], settings: &BakeSettings) -> Result<Vec<String>, ValidationError> {
    for &mode in modes {
        let diagnostics = collect_diagnostics(scene, mode, settings);
        if !diagnostics.is_empty() {
            return Err(ValidationError { diagnostics });
        }
    }
    let mut repaired = Vec::new();
    for &mode in modes {
        for name in repair_missing_materials(scene, mode, settings) {
            if !repaired.contains(&name) {
                repaired.push(name);
            }
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scene::{MeshData, ObjectKind, SceneObject, Triangle, UvMap},
        settings::ChannelPackRequest,
    };

    fn quad_object(name: &str, material: Option<&str>) -> SceneObject {
        SceneObject {
            name: name.to_string(),
            kind: ObjectKind::Mesh,
            visibility: Default::default(),
            transform: Default::default(),
            mesh: Some(MeshData {
                positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]],
                triangles: vec![Triangle {
                    indices: [0, 1, 2],
                    material_index: 0,
                }],
                uv_maps: vec![UvMap {
                    name: "UVMap".to_string(),
                    coords: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
                }],
                ..Default::default()
            }),
            material_slots: vec![material.map(str::to_string)],
            tags: Default::default(),
        }
    }

    fn scene() -> Scene {
        let mut scene = Scene::default();
        scene
            .materials
            .insert("Mat".to_string(), Material::principled([1.0; 4]).unwrap());
        scene.objects.push(quad_object("Cube", Some("Mat")));
        scene.selection.push("Cube".to_string());
        scene
    }

    fn settings() -> BakeSettings {
        BakeSettings {
            channels: vec![Channel::Diffuse],
            ..Default::default()
        }
    }

    #[test]
    fn valid_scene_passes() {
        let mut s = scene();
        assert!(validate(&mut s, BakeMode::Pbr, &settings()).is_ok());
    }

    #[test]
    fn wrong_editor_mode_short_circuits_everything_else() {
        let mut s = scene();
        s.editor_mode = EditorMode::Edit;
        s.objects[0].visibility.hide_render = true;
        let report = validate(&mut s, BakeMode::Pbr, &settings());
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].contains("object mode"));
    }

    #[test]
    fn all_hidden_objects_are_reported_together() {
        let mut s = scene();
        s.objects.push(quad_object("Sphere", Some("Mat")));
        s.selection.push("Sphere".to_string());
        s.objects[0].visibility.hide_viewport = true;
        s.objects[1].visibility.hide_select = true;
        let report = validate(&mut s, BakeMode::Pbr, &settings());
        assert_eq!(report.diagnostics.len(), 2);
    }

    #[test]
    fn pack_with_unselected_channel_is_rejected() {
        let mut s = scene();
        let mut st = settings();
        st.channel_packs.push(ChannelPackRequest {
            name: "ORM".to_string(),
            format: Default::default(),
            r: Some(Channel::AmbientOcclusion),
            g: None,
            b: None,
            a: None,
        });
        let report = validate(&mut s, BakeMode::Pbr, &st);
        assert!(report.diagnostics[0].contains("ORM"));
    }

    #[test]
    fn missing_uvs_and_bad_names() {
        let mut s = scene();
        s.objects[0].mesh.as_mut().unwrap().uv_maps.clear();
        assert!(validate(&mut s, BakeMode::Pbr, &settings()).diagnostics[0].contains("UV"));

        let mut s = scene();
        s.objects[0].name = "CON".to_string();
        s.selection = vec!["CON".to_string()];
        let mut st = settings();
        st.export.enabled = true;
        assert!(validate(&mut s, BakeMode::Pbr, &st).diagnostics[0].contains("reserved device"));
    }

    #[test]
    fn empty_slots_are_repaired_only_when_valid() {
        let mut s = scene();
        s.objects[0].material_slots = vec![None];
        let report = validate(&mut s, BakeMode::Pbr, &settings());
        assert!(report.is_ok());
        assert_eq!(report.repaired, vec!["Cube".to_string()]);
        assert_eq!(s.objects[0].material_slots[0].as_deref(), Some(PLACEHOLDER_MATERIAL));

        let mut s = scene();
        s.objects[0].material_slots = vec![None];
        s.objects[0].visibility.hide_eye = true;
        let report = validate(&mut s, BakeMode::Pbr, &settings());
        assert!(!report.is_ok());
        assert!(report.repaired.is_empty());
        assert_eq!(s.objects[0].material_slots[0], None);
    }

    #[test]
    fn refused_later_mode_leaves_slots_empty() {
        let mut s = scene();
        s.objects[0].material_slots = vec![None];
        let st = BakeSettings {
            specials: vec![Channel::VertexColor],
            ..settings()
        };
        let modes = [BakeMode::Pbr, BakeMode::Specials];
        let err = validate_all(&mut s, &modes, &st).unwrap_err();
        assert!(err.diagnostics[0].contains("vertex color"), "{:?}", err.diagnostics);
        assert_eq!(s.objects[0].material_slots[0], None);
        assert!(!s.materials.contains_key(PLACEHOLDER_MATERIAL));

        s.objects[0].mesh.as_mut().unwrap().vertex_colors.push(crate::scene::ColorLayer {
            name: "Col".to_string(),
            colors: vec![[1.0; 4]; 3],
        });
        assert_eq!(validate_all(&mut s, &modes, &st).unwrap(), vec!["Cube".to_string()]);
        assert_eq!(s.objects[0].material_slots[0].as_deref(), Some(PLACEHOLDER_MATERIAL));
    }

    #[test]
    fn selected_to_active_needs_a_real_target() {
        let mut s = scene();
        let st = BakeSettings {
            selected_to_active: true,
            target_object: Some("Ghost".to_string()),
            ..settings()
        };
        let report = validate(&mut s, BakeMode::PbrSelectedToActive, &st);
        assert!(report.diagnostics.iter().any(|d| d.contains("Ghost")));
    }

    #[test]
    fn file_name_rules() {
        assert!(filename_problem("Cube").is_none());
        assert!(filename_problem("a/b").is_some());
        assert!(filename_problem("trailing.").is_some());
        assert!(filename_problem("lpt1.png").is_some());
        assert!(filename_problem("").is_some());
    }
}
