//! User-facing bake settings, loaded from JSON. Every field has a default so
//! partial settings files are valid.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, NativePass};

/// UV map name that is preferred for baking and kept on export copies.
pub const RESERVED_UV_NAME: &str = "SimpleBake";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Tga,
    Jpeg,
    Tiff,
    Exr,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Tga => "tga",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Tiff => "tif",
            ImageFormat::Exr => "exr",
        }
    }

    /// Formats whose alpha is expected premultiplied on output.
    pub fn wants_premultiplied(self) -> bool {
        matches!(self, ImageFormat::Png | ImageFormat::Tga)
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, ImageFormat::Jpeg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalConvention {
    #[default]
    OpenGl,
    DirectX,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPackRequest {
    pub name: String,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default)]
    pub r: Option<Channel>,
    #[serde(default)]
    pub g: Option<Channel>,
    #[serde(default)]
    pub b: Option<Channel>,
    #[serde(default)]
    pub a: Option<Channel>,
}

impl ChannelPackRequest {
    pub fn assignments(&self) -> [Option<Channel>; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub enabled: bool,
    pub folder_name: String,
    /// Append a timestamp to the export folder name.
    pub timestamp: bool,
    pub folder_per_object: bool,
    pub format: ImageFormat,
    /// 16-bit output where the format allows it.
    pub sixteen_bit: bool,
    /// Force 32-bit float output everywhere the format allows it.
    pub everything_32bit: bool,
    pub export_mesh: bool,
    pub mesh_per_object: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_name: "Bakes".to_string(),
            timestamp: false,
            folder_per_object: false,
            format: ImageFormat::Png,
            sixteen_bit: false,
            everything_32bit: false,
            export_mesh: false,
            mesh_per_object: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyObjectSettings {
    /// Produce export-ready copies with the baked textures applied.
    pub enabled: bool,
    /// Keep the source material slots on the copy after the baked material.
    pub preserve_materials: bool,
    /// Keep the reserved-name UV map on the copy when present.
    pub prefer_reserved_uv: bool,
}

impl Default for CopyObjectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            preserve_materials: false,
            prefer_reserved_uv: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorIdSettings {
    pub seed: u64,
    pub min_distance: f32,
    pub relax_step: f32,
    pub attempts_per_step: u32,
}

impl Default for ColorIdSettings {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            min_distance: 0.5,
            relax_step: 0.1,
            attempts_per_step: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialSettings {
    pub ao_distance: f32,
    pub ao_samples: u32,
    pub curvature_contrast: f32,
    pub thickness_distance: f32,
    pub thickness_samples: u32,
    /// Vertex color layer; empty uses the active layer.
    pub vertex_color_layer: String,
    pub invert_ao: bool,
    pub invert_thickness: bool,
}

impl Default for SpecialSettings {
    fn default() -> Self {
        Self {
            ao_distance: 1.0,
            ao_samples: 16,
            curvature_contrast: 1.0,
            thickness_distance: 1.0,
            thickness_samples: 16,
            vertex_color_layer: String::new(),
            invert_ao: false,
            invert_thickness: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    /// Objects to bake; empty means the scene selection.
    pub objects: Vec<String>,
    /// Optional prefix for every image name of this invocation.
    pub batch_name: String,
    pub channels: Vec<Channel>,
    pub native_passes: Vec<NativePass>,
    pub specials: Vec<Channel>,

    pub selected_to_active: bool,
    pub target_object: Option<String>,
    pub cage_extrusion: f32,
    pub max_ray_distance: f32,
    /// Bake specials on the selected-to-active target only.
    pub specials_on_target_only: bool,

    /// Internal bake resolution.
    pub resolution: [u32; 2],
    /// Resolution of the delivered images, when different from the bake.
    pub output_resolution: Option<[u32; 2]>,
    pub margin: u32,

    pub merged_bake: bool,
    pub merged_bake_name: String,
    pub texture_per_material: bool,
    /// Bake into a UDIM sequence of `udim_tiles` tiles starting at 1001.
    pub udims: bool,
    pub udim_tiles: u32,

    pub roughness_as_glossy: bool,
    pub normal_convention: NormalConvention,

    pub native_samples: u32,
    /// Sample count used for emission-routed bakes, where noise is irrelevant.
    pub fast_samples: u32,
    /// Upper bound on the render tile size on GPU devices.
    pub gpu_tile_limit: u32,

    pub specials_settings: SpecialSettings,
    pub color_id: ColorIdSettings,
    pub export: ExportSettings,
    pub channel_packs: Vec<ChannelPackRequest>,
    pub copy_objects: CopyObjectSettings,

    pub restore_active_uv: bool,
    pub hide_source_objects: bool,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            batch_name: String::new(),
            channels: Vec::new(),
            native_passes: Vec::new(),
            specials: Vec::new(),
            selected_to_active: false,
            target_object: None,
            cage_extrusion: 0.1,
            max_ray_distance: 0.0,
            specials_on_target_only: false,
            resolution: [1024, 1024],
            output_resolution: None,
            margin: 16,
            merged_bake: false,
            merged_bake_name: String::new(),
            texture_per_material: false,
            udims: false,
            udim_tiles: 1,
            roughness_as_glossy: false,
            normal_convention: NormalConvention::OpenGl,
            native_samples: 128,
            fast_samples: 4,
            gpu_tile_limit: 2048,
            specials_settings: SpecialSettings::default(),
            color_id: ColorIdSettings::default(),
            export: ExportSettings::default(),
            channel_packs: Vec::new(),
            copy_objects: CopyObjectSettings::default(),
            restore_active_uv: true,
            hide_source_objects: false,
        }
    }
}

impl BakeSettings {
    pub fn uses_udims(&self) -> bool {
        self.udims
    }

    /// Tiles each pass runs over; one when UDIMs are off.
    pub fn tile_count(&self) -> u32 {
        if self.udims { self.udim_tiles.max(1) } else { 1 }
    }

    /// Resolution images are delivered at.
    pub fn delivery_resolution(&self) -> [u32; 2] {
        self.output_resolution.unwrap_or(self.resolution)
    }

    /// Every channel that will be baked in this invocation, across all modes.
    pub fn selected_channels(&self) -> Vec<Channel> {
        let mut all: Vec<Channel> = self.channels.clone();
        all.extend(self.specials.iter().copied());
        all.extend(self.native_passes.iter().map(|p| Channel::Native(*p)));
        all
    }

    /// Channel-pack assignments must name a channel that is actually baked.
    /// Glossiness is the roughness channel, so both validate the same way.
    pub fn is_channel_selected(&self, channel: Channel) -> bool {
        self.selected_channels().contains(&channel)
    }
}

pub fn load_settings_from_path(path: impl AsRef<Path>) -> Result<BakeSettings> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings json at {}", path.display()))?;
    serde_json::from_str(&text).context("failed to parse settings json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_defaults() {
        let s: BakeSettings =
            serde_json::from_str(r#"{"channels": ["diffuse", "glossiness"], "export": {"enabled": true}}"#)
                .unwrap();
        assert_eq!(s.channels, vec![Channel::Diffuse, Channel::Roughness]);
        assert!(s.export.enabled);
        assert_eq!(s.export.folder_name, "Bakes");
        assert_eq!(s.resolution, [1024, 1024]);
    }

    #[test]
    fn pack_request_with_nulls_parses() {
        let r: ChannelPackRequest = serde_json::from_str(
            r#"{"name": "ORM", "format": "png", "r": "ao", "g": "roughness", "b": "metalness", "a": null}"#,
        )
        .unwrap();
        assert_eq!(
            r.assignments(),
            [
                Some(Channel::AmbientOcclusion),
                Some(Channel::Roughness),
                Some(Channel::Metalness),
                None
            ]
        );
    }

    #[test]
    fn glossy_selection_satisfies_roughness_pack_slot() {
        let s = BakeSettings {
            channels: vec![Channel::Roughness],
            roughness_as_glossy: true,
            ..Default::default()
        };
        assert!(s.is_channel_selected(Channel::Roughness));
        assert!(!s.is_channel_selected(Channel::Metalness));
    }
}
