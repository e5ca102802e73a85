//! Bake channels, bake modes and the fixed channel → socket mapping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[serde(alias = "base_color")]
    Diffuse,
    #[serde(alias = "metallic")]
    Metalness,
    /// Roughness and glossiness are one quantity; glossiness is a
    /// presentation applied after baking.
    #[serde(alias = "glossiness", alias = "glossy")]
    Roughness,
    Normal,
    Transmission,
    TransmissionRoughness,
    Clearcoat,
    ClearcoatRoughness,
    Emission,
    Specular,
    Alpha,
    Subsurface,
    SubsurfaceColor,
    #[serde(alias = "ao")]
    AmbientOcclusion,
    Curvature,
    Thickness,
    VertexColor,
    #[serde(alias = "color_id")]
    MaterialId,
    Lightmap,
    Native(NativePass),
}

/// Render-engine native bake pass types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativePass {
    Combined,
    Ao,
    Shadow,
    Position,
    Normal,
    Uv,
    Roughness,
    Emit,
    Environment,
    Diffuse,
    Glossy,
    Transmission,
}

impl NativePass {
    pub fn name(self) -> &'static str {
        match self {
            NativePass::Combined => "combined",
            NativePass::Ao => "ao",
            NativePass::Shadow => "shadow",
            NativePass::Position => "position",
            NativePass::Normal => "normal",
            NativePass::Uv => "uv",
            NativePass::Roughness => "roughness",
            NativePass::Emit => "emit",
            NativePass::Environment => "environment",
            NativePass::Diffuse => "diffuse",
            NativePass::Glossy => "glossy",
            NativePass::Transmission => "transmission",
        }
    }

    pub fn is_color(self) -> bool {
        matches!(
            self,
            NativePass::Combined
                | NativePass::Diffuse
                | NativePass::Glossy
                | NativePass::Transmission
                | NativePass::Emit
                | NativePass::Environment
        )
    }
}

/// Host bake primitive pass type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BakePass {
    Emit,
    Normal,
    Native(NativePass),
}

/// How a baked channel is presented in the final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    #[default]
    Standard,
    Glossy,
    DirectX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BakeMode {
    Pbr,
    PbrSelectedToActive,
    CyclesNative,
    Specials,
    SpecialsTargetOnly,
}

impl BakeMode {
    pub fn name(self) -> &'static str {
        match self {
            BakeMode::Pbr => "pbr",
            BakeMode::PbrSelectedToActive => "pbr_s2a",
            BakeMode::CyclesNative => "cycles",
            BakeMode::Specials => "specials",
            BakeMode::SpecialsTargetOnly => "specials_target",
        }
    }

    pub fn is_pbr(self) -> bool {
        matches!(self, BakeMode::Pbr | BakeMode::PbrSelectedToActive)
    }

    pub fn is_specials(self) -> bool {
        matches!(self, BakeMode::Specials | BakeMode::SpecialsTargetOnly)
    }
}

pub const PBR_CHANNELS: &[Channel] = &[
    Channel::Diffuse,
    Channel::Metalness,
    Channel::Roughness,
    Channel::Normal,
    Channel::Transmission,
    Channel::TransmissionRoughness,
    Channel::Clearcoat,
    Channel::ClearcoatRoughness,
    Channel::Emission,
    Channel::Specular,
    Channel::Alpha,
    Channel::Subsurface,
    Channel::SubsurfaceColor,
];

pub const SPECIAL_CHANNELS: &[Channel] = &[
    Channel::AmbientOcclusion,
    Channel::Curvature,
    Channel::Thickness,
    Channel::VertexColor,
    Channel::MaterialId,
    Channel::Lightmap,
];

impl Channel {
    pub fn is_pbr(self) -> bool {
        PBR_CHANNELS.contains(&self)
    }

    pub fn is_special(self) -> bool {
        SPECIAL_CHANNELS.contains(&self)
    }

    /// Principled BSDF input socket that carries this channel.
    pub fn principled_socket(self) -> Option<&'static str> {
        Some(match self {
            Channel::Diffuse => "Base Color",
            Channel::Metalness => "Metallic",
            Channel::Roughness => "Roughness",
            Channel::Normal => "Normal",
            Channel::Transmission => "Transmission",
            Channel::TransmissionRoughness => "Transmission Roughness",
            Channel::Clearcoat => "Clearcoat",
            Channel::ClearcoatRoughness => "Clearcoat Roughness",
            Channel::Emission => "Emission",
            Channel::Specular => "Specular",
            Channel::Alpha => "Alpha",
            Channel::Subsurface => "Subsurface",
            Channel::SubsurfaceColor => "Subsurface Color",
            _ => return None,
        })
    }

    pub fn bake_pass(self) -> BakePass {
        match self {
            Channel::Normal => BakePass::Normal,
            Channel::Lightmap => BakePass::Native(NativePass::Combined),
            Channel::Native(p) => BakePass::Native(p),
            _ => BakePass::Emit,
        }
    }

    /// Channels holding color (as opposed to data) get an sRGB tag.
    pub fn is_color_data(self) -> bool {
        match self {
            Channel::Diffuse
            | Channel::Emission
            | Channel::SubsurfaceColor
            | Channel::VertexColor
            | Channel::MaterialId
            | Channel::Lightmap => true,
            Channel::Native(p) => p.is_color(),
            _ => false,
        }
    }

    /// Suffix used in image names.
    pub fn alias(self, presentation: Presentation) -> String {
        let s = match self {
            Channel::Diffuse => "diffuse",
            Channel::Metalness => "metalness",
            Channel::Roughness if presentation == Presentation::Glossy => "glossiness",
            Channel::Roughness => "roughness",
            Channel::Normal => "normal",
            Channel::Transmission => "transmission",
            Channel::TransmissionRoughness => "transrough",
            Channel::Clearcoat => "clearcoat",
            Channel::ClearcoatRoughness => "clearcoatrough",
            Channel::Emission => "emission",
            Channel::Specular => "specular",
            Channel::Alpha => "alpha",
            Channel::Subsurface => "sss",
            Channel::SubsurfaceColor => "ssscol",
            Channel::AmbientOcclusion => "ao",
            Channel::Curvature => "curvature",
            Channel::Thickness => "thickness",
            Channel::VertexColor => "vertexcol",
            Channel::MaterialId => "colid",
            Channel::Lightmap => "lightmap",
            Channel::Native(p) => return format!("cycles_{}", p.name()),
        };
        s.to_string()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.alias(Presentation::Standard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glossy_aliases_parse_to_roughness() {
        let a: Channel = serde_json::from_str("\"glossiness\"").unwrap();
        let b: Channel = serde_json::from_str("\"glossy\"").unwrap();
        let c: Channel = serde_json::from_str("\"roughness\"").unwrap();
        assert_eq!(a, Channel::Roughness);
        assert_eq!(b, Channel::Roughness);
        assert_eq!(c, Channel::Roughness);
    }

    #[test]
    fn every_pbr_channel_has_a_socket() {
        for c in PBR_CHANNELS {
            assert!(c.principled_socket().is_some(), "{c}");
        }
        for c in SPECIAL_CHANNELS {
            assert!(c.principled_socket().is_none(), "{c}");
        }
    }

    #[test]
    fn native_channel_round_trips_through_json() {
        let c = Channel::Native(NativePass::Combined);
        let s = serde_json::to_string(&c).unwrap();
        assert_eq!(serde_json::from_str::<Channel>(&s).unwrap(), c);
        assert_eq!(c.alias(Presentation::Standard), "cycles_combined");
    }

    #[test]
    fn glossy_presentation_changes_alias_only() {
        assert_eq!(Channel::Roughness.alias(Presentation::Glossy), "glossiness");
        assert_eq!(Channel::Metalness.alias(Presentation::Glossy), "metalness");
    }
}
