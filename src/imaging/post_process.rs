//! 1-to-1 image transforms applied after a bake: channel inversion,
//! roughness to glossiness, the OpenGL to DirectX normal remap, and
//! resolution scaling.

use anyhow::{Context, Result, bail};
use image::{Rgba32FImage, imageops::FilterType};

use crate::channel::Presentation;

use super::{
    buffer::PixelBuffer,
    store::{BakedImage, ImageContent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelTransform {
    /// `1 - x` on the flagged channels. Provenance is unchanged.
    Invert { r: bool, g: bool, b: bool, a: bool },
    /// Invert RGB and present a roughness bake as glossiness.
    RoughnessToGlossy,
    /// Flip the green channel of an OpenGL tangent-space normal map.
    NormalToDirectX,
}

impl PixelTransform {
    pub const INVERT_RGB: PixelTransform = PixelTransform::Invert {
        r: true,
        g: true,
        b: true,
        a: false,
    };

    fn mask(self) -> [bool; 4] {
        match self {
            PixelTransform::Invert { r, g, b, a } => [r, g, b, a],
            PixelTransform::RoughnessToGlossy => [true, true, true, false],
            PixelTransform::NormalToDirectX => [false, true, false, false],
        }
    }

    fn presentation(self) -> Option<Presentation> {
        match self {
            PixelTransform::Invert { .. } => None,
            PixelTransform::RoughnessToGlossy => Some(Presentation::Glossy),
            PixelTransform::NormalToDirectX => Some(Presentation::DirectX),
        }
    }
}

pub fn apply_transform(buffer: &mut PixelBuffer, transform: PixelTransform) {
    let mask = transform.mask();
    for px in buffer.pixels_mut() {
        for (c, flip) in mask.iter().enumerate() {
            if *flip {
                px[c] = 1.0 - px[c];
            }
        }
    }
}

/// Run `image` through `transform` and return the substitute image. Tags
/// carry over; only the presentation changes, and with it the alias at the
/// end of the image name.
pub fn post_process_1to1(image: &BakedImage, transform: PixelTransform) -> Result<BakedImage> {
    let mut out = image.clone();
    match &mut out.content {
        ImageContent::Single(buffer) => apply_transform(buffer, transform),
        ImageContent::Udim(tiles) => {
            for buffer in tiles.values_mut() {
                apply_transform(buffer, transform);
            }
        }
    }

    if let Some(presentation) = transform.presentation() {
        if image.tags.presentation == presentation {
            bail!(
                "image '{}' already has {:?} presentation",
                image.name,
                presentation
            );
        }
        let old_alias = image.tags.channel.alias(image.tags.presentation);
        let new_alias = image.tags.channel.alias(presentation);
        out.tags.presentation = presentation;
        out.name = rename_alias(&image.name, &old_alias, &new_alias);
    }
    out.file_path = None;
    Ok(out)
}

/// Swap the `_<old>` alias in an image name (before any `.tile` suffix).
fn rename_alias(name: &str, old: &str, new: &str) -> String {
    if old == new {
        return name.to_string();
    }
    let (stem, tile) = match name.rsplit_once('.') {
        Some((stem, tile)) if tile.chars().all(|c| c.is_ascii_digit()) => (stem, Some(tile)),
        _ => (name, None),
    };
    let stem = match stem.strip_suffix(old) {
        Some(prefix) => format!("{prefix}{new}"),
        None => format!("{stem}_{new}"),
    };
    match tile {
        Some(tile) => format!("{stem}.{tile}"),
        None => stem,
    }
}

/// Resize to `target`. No-op when the size already matches.
pub fn scale_buffer(buffer: &PixelBuffer, target: [u32; 2]) -> Result<PixelBuffer> {
    if buffer.dimensions() == target {
        return Ok(buffer.clone());
    }
    if target[0] == 0 || target[1] == 0 {
        bail!("cannot scale image to {}x{}", target[0], target[1]);
    }
    let src = Rgba32FImage::from_raw(buffer.width(), buffer.height(), buffer.as_rgba().to_vec())
        .context("pixel buffer does not match its dimensions")?;
    let resized = image::imageops::resize(&src, target[0], target[1], FilterType::Triangle);
    let mut out = PixelBuffer::from_rgba(
        target[0],
        target[1],
        resized.into_raw(),
        buffer.color_space,
        buffer.depth,
    )?;
    out.has_alpha = buffer.has_alpha;
    out.alpha_mode = buffer.alpha_mode;
    Ok(out)
}

pub fn scale_image(image: &mut BakedImage, target: [u32; 2]) -> Result<()> {
    match &mut image.content {
        ImageContent::Single(buffer) => {
            if buffer.dimensions() != target {
                log::debug!(
                    "scaling '{}' from {:?} to {:?}",
                    image.name,
                    buffer.dimensions(),
                    target
                );
                *buffer = scale_buffer(buffer, target)?;
            }
        }
        ImageContent::Udim(tiles) => {
            for buffer in tiles.values_mut() {
                *buffer = scale_buffer(buffer, target)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{BakeMode, Channel},
        imaging::{
            buffer::{BitDepth, ColorSpace},
            store::ImageTags,
        },
    };

    fn roughness_image(value: f32) -> BakedImage {
        let mut buffer = PixelBuffer::new(2, 2, ColorSpace::NonColor, BitDepth::Eight);
        buffer.fill([value, value, value, 1.0]);
        BakedImage::new(
            "Cube_roughness",
            ImageTags {
                object: Some("Cube".to_string()),
                batch: "Bake1".to_string(),
                mode: BakeMode::Pbr,
                channel: Channel::Roughness,
                presentation: Presentation::Standard,
                merged: None,
                udim: false,
                material: None,
                pack: None,
            },
            buffer,
        )
    }

    #[test]
    fn glossy_conversion_inverts_and_keeps_provenance() {
        let src = roughness_image(0.25);
        let out = post_process_1to1(&src, PixelTransform::RoughnessToGlossy).unwrap();
        assert_eq!(out.name, "Cube_glossiness");
        assert_eq!(out.tags.presentation, Presentation::Glossy);
        assert_eq!(out.tags.object, src.tags.object);
        assert_eq!(out.tags.batch, src.tags.batch);
        assert_eq!(out.tags.channel, Channel::Roughness);
        assert_eq!(out.buffer().unwrap().get_pixel(0, 0), [0.75, 0.75, 0.75, 1.0]);
    }

    #[test]
    fn directx_flips_green_only() {
        let mut b = PixelBuffer::new(1, 1, ColorSpace::NonColor, BitDepth::Sixteen);
        b.fill([0.5, 0.2, 1.0, 1.0]);
        apply_transform(&mut b, PixelTransform::NormalToDirectX);
        assert_eq!(b.get_pixel(0, 0), [0.5, 0.8, 1.0, 1.0]);
    }

    #[test]
    fn tile_suffix_survives_rename() {
        assert_eq!(
            rename_alias("Cube_roughness.1002", "roughness", "glossiness"),
            "Cube_glossiness.1002"
        );
    }

    #[test]
    fn scaling_to_same_size_is_identity() {
        let b = PixelBuffer::new(4, 4, ColorSpace::Srgb, BitDepth::Eight);
        assert_eq!(scale_buffer(&b, [4, 4]).unwrap(), b);
        let half = scale_buffer(&b, [2, 2]).unwrap();
        assert_eq!(half.dimensions(), [2, 2]);
    }
}
