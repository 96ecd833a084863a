//! Text rasterization.
//! Uses fontdue for CPU-based glyph rendering. Fonts come from the project
//! (registered by family) or a configured fallback file; nothing is
//! embedded in the binary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use fontdue::{Font, FontSettings};
use tracing::debug;

use splice_core::{Color, FrameBuffer, SpliceError, SpliceResult};
use splice_ir::{ContentHandle, FontAsset, TextStyle};

/// Line advance as a multiple of the font size.
const LINE_SPACING: f32 = 1.3;

/// Rasterizes text into tightly sized straight-alpha bitmaps.
pub struct TextRenderer {
    fonts: HashMap<String, Font>,
    fallback: Option<Font>,
}

impl TextRenderer {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
            fallback: None,
        }
    }

    /// A renderer with every font the project carries registered.
    pub fn with_fonts(fonts: &[FontAsset]) -> SpliceResult<Self> {
        let mut renderer = Self::new();
        for font in fonts {
            renderer.add_font(&font.family, &font.data)?;
        }
        Ok(renderer)
    }

    pub fn add_font(&mut self, family: &str, data: &[u8]) -> SpliceResult<()> {
        let font = parse_font(family, data)?;
        self.fonts.insert(family.to_string(), font);
        Ok(())
    }

    /// Load a font file and register it under `family`.
    pub fn load_font(&mut self, family: &str, path: &Path) -> SpliceResult<()> {
        let data = std::fs::read(path).map_err(|e| {
            SpliceError::asset(
                format!("failed to read font file {}: {}", path.display(), e),
                family,
            )
        })?;
        self.add_font(family, &data)
    }

    /// Font used for families the project doesn't carry.
    pub fn set_fallback(&mut self, path: &Path) -> SpliceResult<()> {
        let data = std::fs::read(path).map_err(|e| {
            SpliceError::asset(
                format!("failed to read font file {}: {}", path.display(), e),
                path.display().to_string(),
            )
        })?;
        self.fallback = Some(parse_font("fallback", &data)?);
        Ok(())
    }

    fn font(&self, family: &str) -> Option<&Font> {
        self.fonts.get(family).or(self.fallback.as_ref())
    }

    /// Render `text` in `style`. Splits on `\n`; lines are left-aligned.
    /// Empty text yields a 1x1 transparent bitmap.
    pub fn render(&self, text: &str, style: &TextStyle) -> SpliceResult<FrameBuffer> {
        if text.is_empty() {
            return Ok(FrameBuffer::new(1, 1));
        }
        let font = self.font(&style.font_family).ok_or_else(|| {
            SpliceError::asset("no font registered and no fallback configured", &style.font_family)
        })?;
        let size = style.font_size;
        let lines: Vec<&str> = text.split('\n').collect();
        let measures: Vec<LineMeasure> =
            lines.iter().map(|l| measure_line(font, l, size)).collect();

        let spacing = (size * LINE_SPACING) as i32;
        let max_width = measures.iter().map(|m| m.width).max().unwrap_or(0);
        let last = measures.last().map_or(0, |m| m.ascent + m.descent);
        let total_height = spacing * (lines.len() as i32 - 1) + last;

        let mut fb = FrameBuffer::new(max_width.max(1) as u32, total_height.max(1) as u32);
        let mut y_offset = 0;
        for (line, measure) in lines.iter().zip(&measures) {
            render_line_into(&mut fb, font, line, size, &style.color, y_offset, measure.ascent);
            y_offset += spacing;
        }
        Ok(fb)
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_font(family: &str, data: &[u8]) -> SpliceResult<Font> {
    Font::from_bytes(data, FontSettings::default())
        .map_err(|e| SpliceError::asset(format!("failed to parse font: {}", e), family))
}

#[derive(Debug, Clone, Copy)]
struct LineMeasure {
    width: i32,
    ascent: i32,
    descent: i32,
}

fn measure_line(font: &Font, text: &str, size: f32) -> LineMeasure {
    let mut m = LineMeasure {
        width: 0,
        ascent: 0,
        descent: 0,
    };
    // Empty lines still take a space's height.
    let probe = if text.is_empty() { " " } else { text };
    for ch in probe.chars() {
        let metrics = font.metrics(ch, size);
        m.ascent = m.ascent.max(metrics.height as i32 + metrics.ymin);
        m.descent = m.descent.max(-metrics.ymin);
        if !text.is_empty() {
            m.width += metrics.advance_width as i32;
        }
    }
    m
}

fn render_line_into(
    fb: &mut FrameBuffer,
    font: &Font,
    text: &str,
    size: f32,
    color: &Color,
    y_offset: i32,
    line_ascent: i32,
) {
    let [r, g, b, a] = color.to_rgba8();
    let mut cursor_x = 0i32;
    for ch in text.chars() {
        let (metrics, bitmap) = font.rasterize(ch, size);
        let glyph_x = cursor_x + metrics.xmin;
        let glyph_y = y_offset + line_ascent - (metrics.height as i32 + metrics.ymin);
        for gy in 0..metrics.height {
            for gx in 0..metrics.width {
                let coverage = bitmap[gy * metrics.width + gx];
                if coverage == 0 {
                    continue;
                }
                let px = glyph_x + gx as i32;
                let py = glyph_y + gy as i32;
                if px < 0 || py < 0 {
                    continue;
                }
                let alpha = (coverage as u32 * a as u32 / 255) as u8;
                fb.set_pixel(px as u32, py as u32, [r, g, b, alpha]);
            }
        }
        cursor_x += metrics.advance_width as i32;
    }
}

/// Text bitmaps rendered on first use and kept for the rest of the job.
#[derive(Default)]
pub struct TextCache {
    rendered: HashMap<ContentHandle, Arc<FrameBuffer>>,
}

impl TextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_render(
        &mut self,
        handle: ContentHandle,
        text: &str,
        style: &TextStyle,
        renderer: &TextRenderer,
    ) -> SpliceResult<Arc<FrameBuffer>> {
        if let Some(bitmap) = self.rendered.get(&handle) {
            return Ok(bitmap.clone());
        }
        let bitmap = Arc::new(renderer.render(text, style)?);
        debug!(content = ?handle, width = bitmap.width, height = bitmap.height, "text rendered");
        self.rendered.insert(handle, bitmap.clone());
        Ok(bitmap)
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}
