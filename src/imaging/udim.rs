//! UDIM tile numbering and sequence assembly.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Result, bail};

use super::{
    export::read_buffer,
    store::{BakedImage, ImageContent, ImageStore},
};

pub const UDIM_BASE: u32 = 1001;
/// Tiles per UDIM row.
const UDIM_ROW: u32 = 10;

/// Tile numbers for a `count`-tile bake: 1001..=1000+count.
pub fn tiles(count: u32) -> impl Iterator<Item = u32> {
    (0..count.max(1)).map(|i| UDIM_BASE + i)
}

/// UV-space origin of a tile. 1001 is (0, 0), 1002 is (1, 0), 1011 is (0, 1).
pub fn tile_offset(tile: u32) -> [f32; 2] {
    let i = tile.saturating_sub(UDIM_BASE);
    [(i % UDIM_ROW) as f32, (i / UDIM_ROW) as f32]
}

pub fn tile_image_name(base: &str, tile: u32) -> String {
    format!("{base}.{tile}")
}

/// File name with the trailing `.<tile>` segment (before the extension)
/// swapped for the `<UDIM>` token. Other digits in the name are kept.
fn udim_pattern(file: &str, tile: u32) -> String {
    let segment = format!(".{tile}");
    let (stem, ext) = match file.rfind('.') {
        Some(dot) if file[..dot].ends_with(&segment) => file.split_at(dot),
        _ if file.ends_with(&segment) => (file, ""),
        _ => return file.to_string(),
    };
    format!("{}.<UDIM>{ext}", &stem[..stem.len() - segment.len()])
}

/// Replace the per-tile images of `base_name` with one UDIM sequence image.
/// Tiles are reloaded from the files they were written to; the individual
/// tile images are removed from the store.
pub fn assemble_udim(store: &mut ImageStore, base_name: &str) -> Result<()> {
    let prefix = format!("{base_name}.");
    let tile_names: Vec<String> = store
        .filter(|i| i.tile.is_some() && i.name.starts_with(&prefix))
        .map(|i| i.name.clone())
        .collect();
    if tile_names.is_empty() {
        bail!("no UDIM tiles found for '{base_name}'");
    }

    let mut tiles: BTreeMap<u32, _> = BTreeMap::new();
    let mut template: Option<BakedImage> = None;
    let mut pattern: Option<PathBuf> = None;
    for name in &tile_names {
        let Some(image) = store.remove(name) else {
            continue;
        };
        let Some(tile) = image.tile else {
            continue;
        };
        let buffer = match (&image.file_path, image.buffer()) {
            (Some(path), Some(mem)) => {
                let mut b = read_buffer(path, mem.color_space)?;
                b.depth = mem.depth;
                b.has_alpha = mem.has_alpha;
                b.alpha_mode = mem.alpha_mode;
                b
            }
            (None, Some(mem)) => mem.clone(),
            (_, None) => bail!("UDIM tile '{name}' holds no raster"),
        };
        if pattern.is_none() {
            pattern = image.file_path.as_ref().map(|p| {
                let file = p
                    .file_name()
                    .map(|f| udim_pattern(&f.to_string_lossy(), tile))
                    .unwrap_or_default();
                p.with_file_name(file)
            });
        }
        tiles.insert(tile, buffer);
        template.get_or_insert(image);
    }

    let Some(template) = template else {
        bail!("no UDIM tiles found for '{base_name}'");
    };
    log::info!("assembled UDIM image {base_name} from {} tile(s)", tiles.len());
    store.insert(BakedImage {
        name: base_name.to_string(),
        tags: template.tags,
        tile: None,
        content: ImageContent::Udim(tiles),
        file_path: pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_offsets_follow_rows_of_ten() {
        assert_eq!(tile_offset(1001), [0.0, 0.0]);
        assert_eq!(tile_offset(1002), [1.0, 0.0]);
        assert_eq!(tile_offset(1010), [9.0, 0.0]);
        assert_eq!(tile_offset(1011), [0.0, 1.0]);
    }

    #[test]
    fn only_the_tile_segment_becomes_the_token() {
        assert_eq!(udim_pattern("Rock1001_diffuse.1001.png", 1001), "Rock1001_diffuse.<UDIM>.png");
        assert_eq!(udim_pattern("Quad_diffuse.1002.exr", 1002), "Quad_diffuse.<UDIM>.exr");
        assert_eq!(udim_pattern("Quad_diffuse.1002", 1002), "Quad_diffuse.<UDIM>");
        assert_eq!(udim_pattern("Quad_1002_diffuse.png", 1002), "Quad_1002_diffuse.png");
    }

    #[test]
    fn tile_numbers_start_at_1001() {
        assert_eq!(tiles(3).collect::<Vec<_>>(), vec![1001, 1002, 1003]);
        assert_eq!(tiles(0).collect::<Vec<_>>(), vec![1001]);
    }
}
