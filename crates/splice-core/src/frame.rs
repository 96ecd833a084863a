use crate::{Color, SpliceError, SpliceResult};

/// A straight-alpha RGBA8 pixel buffer, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameBuffer {
    /// Create a frame buffer filled with zeros (transparent black).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; (width as usize) * (height as usize) * 4],
            width,
            height,
        }
    }

    /// Create a frame buffer filled with a solid color.
    pub fn solid(width: u32, height: u32, color: &Color) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    /// Wrap existing RGBA8 bytes, checking the length against the dimensions.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> SpliceResult<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if data.len() != expected {
            return Err(SpliceError::Validation(format!(
                "bitmap of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn fill(&mut self, color: &Color) {
        let px = color.to_rgba8();
        for chunk in self.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the RGBA value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + 4]);
        Some(px)
    }

    /// Set the RGBA value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        self.data[offset..offset + 4].copy_from_slice(&rgba);
    }

    /// Bilinearly sample at normalized coordinates with clamp-to-edge
    /// addressing. `u = 0` is the left edge of the first texel, `u = 1` the
    /// right edge of the last one. Returns straight RGBA in [0, 1].
    pub fn sample_bilinear(&self, u: f32, v: f32) -> [f32; 4] {
        if self.is_empty() {
            return [0.0; 4];
        }
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let fx = (u * self.width as f32 - 0.5).clamp(0.0, max_x);
        let fy = (v * self.height as f32 - 0.5).clamp(0.0, max_y);

        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let texel = |x: u32, y: u32| {
            let o = self.offset(x, y);
            [
                self.data[o] as f32 / 255.0,
                self.data[o + 1] as f32 / 255.0,
                self.data[o + 2] as f32 / 255.0,
                self.data[o + 3] as f32 / 255.0,
            ]
        };
        let (c00, c10, c01, c11) = (texel(x0, y0), texel(x1, y0), texel(x0, y1), texel(x1, y1));

        let mut out = [0.0f32; 4];
        for i in 0..4 {
            let top = c00[i] + (c10[i] - c00[i]) * tx;
            let bottom = c01[i] + (c11[i] - c01[i]) * tx;
            out[i] = top + (bottom - top) * ty;
        }
        out
    }

    /// Source-over blend of a straight-alpha color into one pixel.
    pub fn blend_pixel(&mut self, x: u32, y: u32, src: [f32; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let sa = src[3].clamp(0.0, 1.0);
        if sa <= 0.0 {
            return;
        }
        let o = self.offset(x, y);
        let dst = &mut self.data[o..o + 4];
        if sa >= 1.0 {
            for i in 0..3 {
                dst[i] = to_u8(src[i]);
            }
            dst[3] = 255;
            return;
        }

        let da = dst[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        for i in 0..3 {
            let d = dst[i] as f32 / 255.0;
            let c = (src[i].clamp(0.0, 1.0) * sa + d * da * (1.0 - sa)) / out_a;
            dst[i] = to_u8(c);
        }
        dst[3] = to_u8(out_a);
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * 4
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
