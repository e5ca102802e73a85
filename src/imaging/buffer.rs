use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    Eight,
    Sixteen,
    Float32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Srgb,
    NonColor,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaMode {
    #[default]
    Straight,
    Premultiplied,
}

/// RGBA float raster. Pixel values are scene-linear for sRGB/linear images
/// and raw data for non-color images; the transfer function is applied only
/// when encoding to integer file formats.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    /// Whether the alpha channel carries meaning.
    pub has_alpha: bool,
    pub depth: BitDepth,
    pub color_space: ColorSpace,
    pub alpha_mode: AlphaMode,
    data: Vec<f32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, color_space: ColorSpace, depth: BitDepth) -> Self {
        let mut data = vec![0.0; width as usize * height as usize * 4];
        for px in data.chunks_exact_mut(4) {
            px[3] = 1.0;
        }
        Self {
            width,
            height,
            has_alpha: false,
            depth,
            color_space,
            alpha_mode: AlphaMode::Straight,
            data,
        }
    }

    pub fn from_rgba(
        width: u32,
        height: u32,
        data: Vec<f32>,
        color_space: ColorSpace,
        depth: BitDepth,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            bail!(
                "pixel data has {} floats, expected {expected} for {width}x{height} rgba",
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            has_alpha: false,
            depth,
            color_space,
            alpha_mode: AlphaMode::Straight,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn channel_count(&self) -> u8 {
        if self.has_alpha { 4 } else { 3 }
    }

    pub fn as_rgba(&self) -> &[f32] {
        &self.data
    }

    pub fn into_rgba(self) -> Vec<f32> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let o = self.offset(x, y);
        [self.data[o], self.data[o + 1], self.data[o + 2], self.data[o + 3]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, px: [f32; 4]) {
        let o = self.offset(x, y);
        self.data[o..o + 4].copy_from_slice(&px);
    }

    pub fn fill(&mut self, px: [f32; 4]) {
        for p in self.data.chunks_exact_mut(4) {
            p.copy_from_slice(&px);
        }
    }

    pub fn pixels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.chunks_exact_mut(4)
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(4)
    }

    /// Bilinear sample at normalized coordinates with repeat wrapping.
    /// `v = 0` is the bottom row.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let u = uv[0] - uv[0].floor();
        let v = uv[1] - uv[1].floor();
        let fx = u * self.width as f32 - 0.5;
        let fy = (1.0 - v) * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let wrap = |i: f32, n: u32| -> u32 { (i as i64).rem_euclid(n as i64) as u32 };
        let (x0i, x1i) = (wrap(x0, self.width), wrap(x0 + 1.0, self.width));
        let (y0i, y1i) = (wrap(y0, self.height), wrap(y0 + 1.0, self.height));
        let a = self.get_pixel(x0i, y0i);
        let b = self.get_pixel(x1i, y0i);
        let c = self.get_pixel(x0i, y1i);
        let d = self.get_pixel(x1i, y1i);
        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            out[i] = top + (bottom - top) * ty;
        }
        out
    }
}

pub fn linear_to_srgb(x: f32) -> f32 {
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

pub fn srgb_to_linear(x: f32) -> f32 {
    if x <= 0.040_45 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_black_and_opaque() {
        let b = PixelBuffer::new(2, 2, ColorSpace::Srgb, BitDepth::Eight);
        assert_eq!(b.get_pixel(1, 1), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(b.channel_count(), 3);
    }

    #[test]
    fn sample_at_pixel_center_is_exact() {
        let mut b = PixelBuffer::new(2, 2, ColorSpace::NonColor, BitDepth::Eight);
        b.set_pixel(0, 1, [1.0, 0.0, 0.0, 1.0]);
        // bottom-left pixel center
        assert_eq!(b.sample([0.25, 0.25]), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn srgb_transfer_round_trips() {
        for x in [0.0, 0.001, 0.2, 0.5, 1.0] {
            assert!((srgb_to_linear(linear_to_srgb(x)) - x).abs() < 1e-5);
        }
    }

    #[test]
    fn from_rgba_checks_length() {
        assert!(PixelBuffer::from_rgba(2, 2, vec![0.0; 3], ColorSpace::Srgb, BitDepth::Eight).is_err());
    }
}
