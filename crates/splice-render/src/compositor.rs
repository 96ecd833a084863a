//! Frame compositor.
//!
//! One drawing surface sized to the output, cleared to an opaque background
//! at the start of every frame. Each draw scales a source bitmap into a
//! destination rectangle, evaluates one effect per texel, and blends the
//! result over what is already there.

use tracing::trace;

use splice_core::{Color, FrameBuffer};
use splice_ir::EffectParams;

use crate::effects;

/// Destination rectangle in output pixel space. May extend past the
/// surface; anything outside is clipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Integer pixel span `[x0, x1) x [y0, y1)` whose centers fall inside
    /// the rect, clipped to a `width` x `height` surface.
    fn pixel_span(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        let clip = |lo: f64, hi: f64, max: u32| {
            let a = (lo - 0.5).ceil().max(0.0);
            let b = (hi - 0.5).ceil().min(max as f64);
            (a < b).then_some((a as u32, b as u32))
        };
        let (x0, x1) = clip(self.x, self.x + self.width, width)?;
        let (y0, y1) = clip(self.y, self.y + self.height, height)?;
        Some((x0, x1, y0, y1))
    }
}

pub struct Compositor {
    surface: FrameBuffer,
    background: Color,
    #[cfg(feature = "gpu")]
    gpu: Option<crate::gpu::GpuCompositor>,
}

impl Compositor {
    pub fn new(width: u32, height: u32, background: Color) -> Self {
        let background = background.opaque();
        Self {
            surface: FrameBuffer::solid(width, height, &background),
            background,
            #[cfg(feature = "gpu")]
            gpu: None,
        }
    }

    /// Route draws through a wgpu device. Stays on the CPU surface when no
    /// adapter can be initialised.
    #[cfg(feature = "gpu")]
    pub fn with_gpu(mut self) -> Self {
        match crate::gpu::GpuCompositor::new(self.surface.width, self.surface.height) {
            Ok(gpu) => {
                tracing::info!("compositor using wgpu surface");
                self.gpu = Some(gpu);
            }
            Err(e) => tracing::warn!("gpu compositor unavailable, using cpu: {:#}", e),
        }
        self
    }

    pub fn width(&self) -> u32 {
        self.surface.width
    }

    pub fn height(&self) -> u32 {
        self.surface.height
    }

    /// Reset the surface to the opaque background.
    pub fn clear(&mut self) {
        self.surface.fill(&self.background);
    }

    /// Draw `source` into `rect` through the transform `effect` selects.
    /// `time` is the timeline time in seconds.
    pub fn draw(&mut self, source: &FrameBuffer, rect: Rect, effect: EffectParams, time: f64) {
        if source.is_empty() {
            return;
        }
        #[cfg(feature = "gpu")]
        if let Some(gpu) = &self.gpu {
            match gpu.draw(&mut self.surface, source, rect, &effect, time) {
                Ok(()) => return,
                Err(e) => tracing::warn!("gpu draw failed, falling back to cpu: {:#}", e),
            }
        }
        self.draw_cpu(source, rect, &effect, time);
    }

    fn draw_cpu(&mut self, source: &FrameBuffer, rect: Rect, effect: &EffectParams, time: f64) {
        let Some((x0, x1, y0, y1)) = rect.pixel_span(self.surface.width, self.surface.height)
        else {
            return;
        };
        trace!(x0, x1, y0, y1, selector = ?effect.selector, "draw");
        for py in y0..y1 {
            let v = ((py as f64 + 0.5 - rect.y) / rect.height) as f32;
            for px in x0..x1 {
                let u = ((px as f64 + 0.5 - rect.x) / rect.width) as f32;
                let texel = source.sample_bilinear(u, v);
                let shaded = effects::shade(texel, effect, [u, v], time);
                self.surface.blend_pixel(px, py, shaded);
            }
        }
    }

    /// The composed frame.
    pub fn surface(&self) -> &FrameBuffer {
        &self.surface
    }
}
