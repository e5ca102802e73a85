use std::collections::BTreeMap;

use crate::{
    channel::{BakeMode, Channel},
    imaging::udim::UDIM_BASE,
    scene::Scene,
    settings::BakeSettings,
    validation::bake_objects,
};

use super::color_id::assign_material_colors;

/// State of one bake mode's pass. Created when the pass starts and dropped
/// when it ends.
#[derive(Debug, Clone)]
pub struct BakeOperation {
    pub mode: BakeMode,
    pub bake_objects: Vec<String>,
    pub target_object: Option<String>,
    /// Tile currently being baked, 1001-based.
    pub udim_tile_counter: u32,
    /// In bake order.
    pub requested_channels: Vec<Channel>,
    /// Material-ID color per source material name.
    pub material_colors: BTreeMap<String, [f32; 3]>,
}

impl BakeOperation {
    pub fn new(mode: BakeMode, scene: &Scene, settings: &BakeSettings) -> Self {
        let bake_objects = bake_objects(scene, settings);
        let target_object = match mode {
            BakeMode::PbrSelectedToActive | BakeMode::SpecialsTargetOnly => settings.target_object.clone(),
            _ => None,
        };
        let requested_channels = match mode {
            BakeMode::Pbr | BakeMode::PbrSelectedToActive => settings.channels.clone(),
            BakeMode::CyclesNative => settings.native_passes.iter().map(|p| Channel::Native(*p)).collect(),
            BakeMode::Specials | BakeMode::SpecialsTargetOnly => settings.specials.clone(),
        };

        let mut material_colors = BTreeMap::new();
        if requested_channels.contains(&Channel::MaterialId) {
            let receivers: Vec<&String> = match &target_object {
                Some(t) => vec![t],
                None => bake_objects.iter().collect(),
            };
            let materials: Vec<&str> = receivers
                .into_iter()
                .filter_map(|n| scene.object(n))
                .flat_map(|o| o.material_slots.iter().flatten().map(String::as_str))
                .collect();
            material_colors = assign_material_colors(materials, &settings.color_id);
        }

        Self {
            mode,
            bake_objects,
            target_object,
            udim_tile_counter: UDIM_BASE,
            requested_channels,
            material_colors,
        }
    }

    /// Objects whose geometry takes part: sources plus the target.
    pub fn all_objects(&self) -> Vec<String> {
        let mut all = self.bake_objects.clone();
        all.extend(self.target_object.clone());
        all
    }
}
