//! Raster side of the pipeline: pixel buffers, provenance-tagged images,
//! post-processing, channel packing, export and UDIM assembly.

pub mod buffer;
pub mod export;
pub mod pack;
pub mod post_process;
pub mod store;
pub mod udim;

pub use buffer::{AlphaMode, BitDepth, ColorSpace, PixelBuffer};
pub use store::{BakedImage, ImageContent, ImageStore, ImageTags};
