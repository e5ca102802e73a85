//! N-to-1 channel packing: up to four baked images become the R/G/B/A of a
//! single image.

use anyhow::{Result, bail};

use crate::{channel::Channel, settings::ImageFormat};

use super::buffer::{AlphaMode, BitDepth, ColorSpace, PixelBuffer};

/// One packed slot: which channel it came from and the baked raster.
#[derive(Debug, Clone, Copy)]
pub struct PackSource<'a> {
    pub channel: Channel,
    pub buffer: &'a PixelBuffer,
}

/// True when R, G and B all name the same channel. Such a pack broadcasts
/// one source into the three color outputs.
pub fn is_isolate(slots: &[Option<PackSource<'_>>; 4]) -> bool {
    match (&slots[0], &slots[1], &slots[2]) {
        (Some(r), Some(g), Some(b)) => r.channel == g.channel && g.channel == b.channel,
        _ => false,
    }
}

/// Assemble `slots` (R, G, B, A) into one image. Empty color slots are black,
/// an empty alpha slot leaves the result without alpha (opaque). PNG and
/// TGA outputs are premultiplied.
pub fn pack_channels(
    slots: [Option<PackSource<'_>>; 4],
    format: ImageFormat,
    depth: BitDepth,
) -> Result<PixelBuffer> {
    let Some(first) = slots.iter().flatten().next() else {
        bail!("channel pack has no inputs");
    };
    let [width, height] = first.buffer.dimensions();
    for s in slots.iter().flatten() {
        if s.buffer.dimensions() != [width, height] {
            bail!(
                "channel pack inputs differ in size: {:?} vs {:?} ({})",
                s.buffer.dimensions(),
                [width, height],
                s.channel
            );
        }
    }

    let mut out = PixelBuffer::new(width, height, ColorSpace::NonColor, depth);
    out.has_alpha = slots[3].is_some() && format.supports_alpha();

    if is_isolate(&slots) {
        let src = slots[0].as_ref().map(|s| s.buffer);
        let alpha = slots[3].as_ref().map(|s| s.buffer);
        for y in 0..height {
            for x in 0..width {
                let v = src.map_or(0.0, |b| b.get_pixel(x, y)[0]);
                let a = alpha.map_or(1.0, |b| b.get_pixel(x, y)[0]);
                out.set_pixel(x, y, [v, v, v, a]);
            }
        }
    } else {
        for y in 0..height {
            for x in 0..width {
                let mut px = [0.0, 0.0, 0.0, 1.0];
                for (c, slot) in slots.iter().enumerate() {
                    if let Some(s) = slot {
                        px[c] = s.buffer.get_pixel(x, y)[0];
                    }
                }
                out.set_pixel(x, y, px);
            }
        }
    }

    if !out.has_alpha {
        for px in out.pixels_mut() {
            px[3] = 1.0;
        }
    }
    if format.wants_premultiplied() {
        premultiply(&mut out);
    }
    Ok(out)
}

pub fn premultiply(buffer: &mut PixelBuffer) {
    if buffer.alpha_mode == AlphaMode::Premultiplied {
        return;
    }
    for px in buffer.pixels_mut() {
        let a = px[3];
        px[0] *= a;
        px[1] *= a;
        px[2] *= a;
    }
    buffer.alpha_mode = AlphaMode::Premultiplied;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: f32) -> PixelBuffer {
        let mut b = PixelBuffer::new(2, 2, ColorSpace::NonColor, BitDepth::Eight);
        b.fill([v, v, v, 1.0]);
        b
    }

    #[test]
    fn orm_pack_takes_one_channel_from_each_source() {
        let (ao, rough, metal) = (gray(0.9), gray(0.4), gray(1.0));
        let out = pack_channels(
            [
                Some(PackSource { channel: Channel::AmbientOcclusion, buffer: &ao }),
                Some(PackSource { channel: Channel::Roughness, buffer: &rough }),
                Some(PackSource { channel: Channel::Metalness, buffer: &metal }),
                None,
            ],
            ImageFormat::Png,
            BitDepth::Eight,
        )
        .unwrap();
        assert_eq!(out.get_pixel(1, 1), [0.9, 0.4, 1.0, 1.0]);
        assert!(!out.has_alpha);
        assert_eq!(out.alpha_mode, AlphaMode::Premultiplied);
    }

    #[test]
    fn isolate_broadcasts_one_source() {
        let mut rough = gray(0.0);
        rough.set_pixel(0, 0, [0.3, 0.7, 0.7, 1.0]);
        let src = PackSource { channel: Channel::Roughness, buffer: &rough };
        let slots = [Some(src), Some(src), Some(src), None];
        assert!(is_isolate(&slots));
        let out = pack_channels(slots, ImageFormat::Tiff, BitDepth::Eight).unwrap();
        assert_eq!(out.get_pixel(0, 0), [0.3, 0.3, 0.3, 1.0]);
        assert_eq!(out.alpha_mode, AlphaMode::Straight);
    }

    #[test]
    fn alpha_slot_is_premultiplied_for_tga() {
        let (c, a) = (gray(0.8), gray(0.5));
        let out = pack_channels(
            [
                Some(PackSource { channel: Channel::Diffuse, buffer: &c }),
                None,
                None,
                Some(PackSource { channel: Channel::Alpha, buffer: &a }),
            ],
            ImageFormat::Tga,
            BitDepth::Eight,
        )
        .unwrap();
        assert!(out.has_alpha);
        assert_eq!(out.get_pixel(0, 0), [0.4, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let small = PixelBuffer::new(1, 1, ColorSpace::NonColor, BitDepth::Eight);
        let big = gray(0.0);
        let res = pack_channels(
            [
                Some(PackSource { channel: Channel::Metalness, buffer: &small }),
                Some(PackSource { channel: Channel::Roughness, buffer: &big }),
                None,
                None,
            ],
            ImageFormat::Png,
            BitDepth::Eight,
        );
        assert!(res.is_err());
    }
}
