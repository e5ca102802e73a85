//! Writing baked images to disk and reading them back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, ImageBuffer, Rgb, Rgba};

use crate::settings::{ExportSettings, ImageFormat};

use super::{
    buffer::{BitDepth, ColorSpace, PixelBuffer, linear_to_srgb, srgb_to_linear},
    store::{BakedImage, ImageTags},
};

// ── Bit depth ────────────────────────────────────────────────────────────

/// Output depth for a format. EXR is always float, TGA and JPEG are 8-bit
/// only, normal maps get at least 16 bits where the format allows it.
pub fn output_depth(format: ImageFormat, is_normal: bool, export: &ExportSettings) -> BitDepth {
    match format {
        ImageFormat::Exr => BitDepth::Float32,
        ImageFormat::Tga | ImageFormat::Jpeg => BitDepth::Eight,
        ImageFormat::Png | ImageFormat::Tiff => {
            if export.everything_32bit || export.sixteen_bit || is_normal {
                BitDepth::Sixteen
            } else {
                BitDepth::Eight
            }
        }
    }
}

// ── Layout ───────────────────────────────────────────────────────────────

/// `<project>/<folder>[_<timestamp>]`. The timestamp is taken once per
/// invocation by the caller.
pub fn export_root(project_dir: &Path, export: &ExportSettings, stamp: Option<&str>) -> PathBuf {
    match stamp {
        Some(stamp) if export.timestamp => {
            project_dir.join(format!("{}_{stamp}", export.folder_name))
        }
        _ => project_dir.join(&export.folder_name),
    }
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Directory an image lands in under `root`: a merged-bake subfolder or a
/// per-object subfolder, never both.
pub fn image_dir(root: &Path, tags: &ImageTags, export: &ExportSettings) -> PathBuf {
    if !export.folder_per_object {
        return root.to_path_buf();
    }
    match (&tags.merged, &tags.object) {
        (Some(merged), _) => root.join(merged),
        (None, Some(object)) => root.join(object),
        (None, None) => root.to_path_buf(),
    }
}

pub fn image_path(root: &Path, image: &BakedImage, export: &ExportSettings, format: ImageFormat) -> PathBuf {
    image_dir(root, &image.tags, export).join(format!("{}.{}", image.name, format.extension()))
}

// ── Encode / decode ──────────────────────────────────────────────────────

fn encode_value(v: f32, color_space: ColorSpace) -> f32 {
    let v = if color_space == ColorSpace::Srgb {
        linear_to_srgb(v.max(0.0))
    } else {
        v
    };
    v.clamp(0.0, 1.0)
}

/// Depth the encoder for `format` can actually write.
fn clamp_depth(depth: BitDepth, format: ImageFormat) -> BitDepth {
    match (format, depth) {
        (ImageFormat::Exr, _) => BitDepth::Float32,
        (ImageFormat::Tga | ImageFormat::Jpeg, _) => BitDepth::Eight,
        (_, BitDepth::Float32) => BitDepth::Sixteen,
        (_, d) => d,
    }
}

fn to_dynamic(buffer: &PixelBuffer, format: ImageFormat) -> Result<DynamicImage> {
    let (w, h) = (buffer.width(), buffer.height());
    let alpha = buffer.has_alpha && format.supports_alpha();
    let cs = buffer.color_space;
    let src = buffer.as_rgba();
    let channels = if alpha { 4 } else { 3 };
    let bad_size = || anyhow!("pixel buffer does not match {w}x{h}");

    let img = match clamp_depth(buffer.depth, format) {
        BitDepth::Float32 => {
            let data: Vec<f32> = src
                .chunks_exact(4)
                .flat_map(|px| px[..channels].to_vec())
                .collect();
            if alpha {
                DynamicImage::ImageRgba32F(ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, data).ok_or_else(bad_size)?)
            } else {
                DynamicImage::ImageRgb32F(ImageBuffer::<Rgb<f32>, _>::from_raw(w, h, data).ok_or_else(bad_size)?)
            }
        }
        BitDepth::Sixteen => {
            let data: Vec<u16> = src
                .chunks_exact(4)
                .flat_map(|px| {
                    (0..channels).map(move |c| {
                        let v = if c == 3 { px[c].clamp(0.0, 1.0) } else { encode_value(px[c], cs) };
                        (v * 65535.0).round() as u16
                    })
                })
                .collect();
            if alpha {
                DynamicImage::ImageRgba16(ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, data).ok_or_else(bad_size)?)
            } else {
                DynamicImage::ImageRgb16(ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, data).ok_or_else(bad_size)?)
            }
        }
        BitDepth::Eight => {
            let data: Vec<u8> = src
                .chunks_exact(4)
                .flat_map(|px| {
                    (0..channels).map(move |c| {
                        let v = if c == 3 { px[c].clamp(0.0, 1.0) } else { encode_value(px[c], cs) };
                        (v * 255.0).round() as u8
                    })
                })
                .collect();
            if alpha {
                DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, data).ok_or_else(bad_size)?)
            } else {
                DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, data).ok_or_else(bad_size)?)
            }
        }
    };
    Ok(img)
}

fn codec(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Tga => image::ImageFormat::Tga,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Tiff => image::ImageFormat::Tiff,
        ImageFormat::Exr => image::ImageFormat::OpenExr,
    }
}

/// Encode `buffer` to `path`, replacing any file already there.
pub fn write_buffer(buffer: &PixelBuffer, path: &Path, format: ImageFormat) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create export dir {}", dir.display()))?;
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove existing file {}", path.display()))?;
    }
    let img = to_dynamic(buffer, format)?;
    img.save_with_format(path, codec(format))
        .with_context(|| format!("failed to write image {}", path.display()))?;
    Ok(())
}

/// Decode an image file into a linear float buffer. Integer files tagged
/// sRGB are decoded through the inverse transfer function.
pub fn read_buffer(path: &Path, color_space: ColorSpace) -> Result<PixelBuffer> {
    let img = image::open(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let has_alpha = img.color().has_alpha();
    let is_float = matches!(
        img.color(),
        image::ColorType::Rgb32F | image::ColorType::Rgba32F
    );
    let depth = if is_float {
        BitDepth::Float32
    } else if img.color().bytes_per_pixel() / img.color().channel_count() >= 2 {
        BitDepth::Sixteen
    } else {
        BitDepth::Eight
    };
    let rgba = img.into_rgba32f();
    let (w, h) = rgba.dimensions();
    let mut data = rgba.into_raw();
    if !is_float && color_space == ColorSpace::Srgb {
        for px in data.chunks_exact_mut(4) {
            for v in &mut px[..3] {
                *v = srgb_to_linear(*v);
            }
        }
    }
    let mut buffer = PixelBuffer::from_rgba(w, h, data, color_space, depth)?;
    buffer.has_alpha = has_alpha;
    Ok(buffer)
}

/// Write a single-raster image under `root` and remember where it went.
pub fn export_image(
    image: &mut BakedImage,
    root: &Path,
    export: &ExportSettings,
    format: ImageFormat,
) -> Result<PathBuf> {
    let path = image_path(root, image, export, format);
    let buffer = image.require_buffer()?;
    write_buffer(buffer, &path, format)?;
    log::info!("exported {} -> {}", image.name, path.display());
    image.file_path = Some(path.clone());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BakeMode, Channel, Presentation};

    fn temp_dir(tag: &str) -> PathBuf {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("nfb_export_{tag}_{nonce}"))
    }

    fn tags() -> ImageTags {
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
        }
    }

    #[test]
    fn depth_rules() {
        let mut e = ExportSettings::default();
        assert_eq!(output_depth(ImageFormat::Png, false, &e), BitDepth::Eight);
        assert_eq!(output_depth(ImageFormat::Png, true, &e), BitDepth::Sixteen);
        assert_eq!(output_depth(ImageFormat::Exr, false, &e), BitDepth::Float32);
        e.everything_32bit = true;
        assert_eq!(output_depth(ImageFormat::Tga, true, &e), BitDepth::Eight);
        assert_eq!(output_depth(ImageFormat::Jpeg, false, &e), BitDepth::Eight);
        assert_eq!(output_depth(ImageFormat::Tiff, false, &e), BitDepth::Sixteen);
    }

    #[test]
    fn folder_layout_is_object_or_merged() {
        let root = Path::new("/p/Bakes");
        let mut e = ExportSettings::default();
        assert_eq!(image_dir(root, &tags(), &e), root);
        e.folder_per_object = true;
        assert_eq!(image_dir(root, &tags(), &e), root.join("Cube"));
        let mut merged = tags();
        merged.object = None;
        merged.merged = Some("Hero".to_string());
        assert_eq!(image_dir(root, &merged, &e), root.join("Hero"));
    }

    #[test]
    fn timestamped_root() {
        let e = ExportSettings {
            timestamp: true,
            ..Default::default()
        };
        assert_eq!(
            export_root(Path::new("/p"), &e, Some("20240101_000000")),
            Path::new("/p/Bakes_20240101_000000")
        );
    }

    #[test]
    fn png_write_replaces_existing_file_and_reads_back() {
        let dir = temp_dir("png");
        let mut buffer = PixelBuffer::new(2, 2, ColorSpace::NonColor, BitDepth::Eight);
        buffer.fill([1.0, 0.0, 0.0, 1.0]);
        let mut image = BakedImage::new("Cube_diffuse", tags(), buffer.clone());
        let e = ExportSettings::default();

        let path = export_image(&mut image, &dir, &e, ImageFormat::Png).unwrap();
        buffer.fill([0.0, 1.0, 0.0, 1.0]);
        image.content = crate::imaging::store::ImageContent::Single(buffer);
        let again = export_image(&mut image, &dir, &e, ImageFormat::Png).unwrap();
        assert_eq!(path, again);

        let back = read_buffer(&path, ColorSpace::NonColor).unwrap();
        assert_eq!(back.get_pixel(0, 0), [0.0, 1.0, 0.0, 1.0]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
