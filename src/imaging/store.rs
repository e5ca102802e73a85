use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::channel::{BakeMode, Channel, Presentation};

use super::buffer::PixelBuffer;

/// Provenance of a baked image. This is the key images are looked up by
/// everywhere after baking (post-processing, packing, material assembly).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTags {
    /// Source object; `None` for merged bakes.
    pub object: Option<String>,
    pub batch: String,
    pub mode: BakeMode,
    pub channel: Channel,
    #[serde(default)]
    pub presentation: Presentation,
    pub merged: Option<String>,
    pub udim: bool,
    /// Set for texture-per-material bakes.
    #[serde(default)]
    pub material: Option<String>,
    /// Set on channel-packed images: the pack request name.
    #[serde(default)]
    pub pack: Option<String>,
}

impl ImageTags {
    /// Object name or merged-bake name: what the image set belongs to.
    pub fn group(&self) -> &str {
        self.merged
            .as_deref()
            .or(self.object.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum ImageContent {
    Single(PixelBuffer),
    /// Assembled UDIM sequence, by tile number.
    Udim(BTreeMap<u32, PixelBuffer>),
}

#[derive(Debug, Clone)]
pub struct BakedImage {
    pub name: String,
    pub tags: ImageTags,
    /// UDIM tile this image covers while the sequence is being baked.
    pub tile: Option<u32>,
    pub content: ImageContent,
    /// Where the image was last written to disk.
    pub file_path: Option<PathBuf>,
}

impl BakedImage {
    pub fn new(name: impl Into<String>, tags: ImageTags, buffer: PixelBuffer) -> Self {
        Self {
            name: name.into(),
            tags,
            tile: None,
            content: ImageContent::Single(buffer),
            file_path: None,
        }
    }

    pub fn buffer(&self) -> Option<&PixelBuffer> {
        match &self.content {
            ImageContent::Single(b) => Some(b),
            ImageContent::Udim(_) => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut PixelBuffer> {
        match &mut self.content {
            ImageContent::Single(b) => Some(b),
            ImageContent::Udim(_) => None,
        }
    }

    pub fn require_buffer(&self) -> Result<&PixelBuffer> {
        self.buffer()
            .ok_or_else(|| anyhow!("image '{}' is a UDIM sequence, not a single raster", self.name))
    }

    pub fn is_udim_sequence(&self) -> bool {
        matches!(self.content, ImageContent::Udim(_))
    }
}

/// All images produced in one invocation, in creation order.
#[derive(Debug, Clone, Default)]
pub struct ImageStore {
    images: Vec<BakedImage>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image. Names are unique, and only one image may exist per
    /// (group, channel, material, tile, pack).
    pub fn insert(&mut self, image: BakedImage) -> Result<()> {
        if self.get(&image.name).is_some() {
            bail!("image '{}' already exists", image.name);
        }
        if let Some(clash) = self.images.iter().find(|i| {
            i.tags.group() == image.tags.group()
                && i.tags.channel == image.tags.channel
                && i.tags.material == image.tags.material
                && i.tags.pack == image.tags.pack
                && i.tags.mode == image.tags.mode
                && i.tile == image.tile
        }) {
            bail!(
                "image '{}' would duplicate '{}' ({} / {})",
                image.name,
                clash.name,
                image.tags.group(),
                image.tags.channel
            );
        }
        self.images.push(image);
        Ok(())
    }

    /// Swap an image for a post-processed version of it, keeping its slot.
    pub fn replace(&mut self, name: &str, image: BakedImage) -> Result<()> {
        if image.name != name && self.get(&image.name).is_some() {
            bail!("cannot rename '{name}' to existing image '{}'", image.name);
        }
        let slot = self
            .images
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| anyhow!("image not found: {name}"))?;
        *slot = image;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BakedImage> {
        self.images.iter().find(|i| i.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BakedImage> {
        self.images.iter_mut().find(|i| i.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<BakedImage> {
        let idx = self.images.iter().position(|i| i.name == name)?;
        Some(self.images.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BakedImage> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.images.iter().map(|i| i.name.clone()).collect()
    }

    /// Look up the delivered (non-tile) image of `channel` for a group.
    pub fn find_channel(&self, group: &str, channel: Channel, material: Option<&str>) -> Option<&BakedImage> {
        self.images.iter().find(|i| {
            i.tags.group() == group
                && i.tags.channel == channel
                && i.tags.pack.is_none()
                && i.tags.material.as_deref() == material
                && i.tile.is_none()
        })
    }

    pub fn filter<'a>(
        &'a self,
        pred: impl Fn(&BakedImage) -> bool + 'a,
    ) -> impl Iterator<Item = &'a BakedImage> + 'a {
        self.images.iter().filter(move |i| pred(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::buffer::{BitDepth, ColorSpace};

    fn tags(object: &str, channel: Channel) -> ImageTags {
        ImageTags {
            object: Some(object.to_string()),
            batch: String::new(),
            mode: BakeMode::Pbr,
            channel,
            presentation: Presentation::Standard,
            merged: None,
            udim: false,
            material: None,
            pack: None,
        }
    }

    fn buf() -> PixelBuffer {
        PixelBuffer::new(1, 1, ColorSpace::NonColor, BitDepth::Eight)
    }

    #[test]
    fn second_image_for_same_channel_and_group_is_rejected() {
        let mut store = ImageStore::new();
        store
            .insert(BakedImage::new("a", tags("Cube", Channel::Roughness), buf()))
            .unwrap();
        assert!(store
            .insert(BakedImage::new("b", tags("Cube", Channel::Roughness), buf()))
            .is_err());
        store
            .insert(BakedImage::new("c", tags("Sphere", Channel::Roughness), buf()))
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn merged_group_wins_over_object() {
        let mut t = tags("Cube", Channel::Diffuse);
        t.object = None;
        t.merged = Some("Hero".to_string());
        assert_eq!(t.group(), "Hero");
    }
}
