//! Image loading module.
//! Decodes PNG, JPEG, WebP, and other formats into RGBA frame buffers.

use std::path::Path;

use splice_core::{FrameBuffer, SpliceError, SpliceResult};

/// Load an image file and convert it to a FrameBuffer.
pub fn load_image(path: &Path) -> SpliceResult<FrameBuffer> {
    let img = image::open(path).map_err(|e| {
        SpliceError::asset(
            format!("failed to load image: {}", e),
            path.display().to_string(),
        )
    })?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    FrameBuffer::from_rgba(width, height, rgba.into_raw())
}

/// Decode an image held in memory. `id` names it in errors.
pub fn load_image_from_bytes(data: &[u8], id: &str) -> SpliceResult<FrameBuffer> {
    let img = image::load_from_memory(data)
        .map_err(|e| SpliceError::asset(format!("failed to decode image: {}", e), id))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    FrameBuffer::from_rgba(width, height, rgba.into_raw())
}

/// Shrink to fit within `max_width` x `max_height`, preserving aspect
/// ratio. Never upscales.
pub fn resize_to_fit(fb: &FrameBuffer, max_width: u32, max_height: u32) -> FrameBuffer {
    if fb.is_empty() {
        return fb.clone();
    }
    let scale_x = max_width as f64 / fb.width as f64;
    let scale_y = max_height as f64 / fb.height as f64;
    let scale = scale_x.min(scale_y).min(1.0);

    let new_width = ((fb.width as f64 * scale) as u32).max(1);
    let new_height = ((fb.height as f64 * scale) as u32).max(1);
    if new_width == fb.width && new_height == fb.height {
        return fb.clone();
    }

    let mut resized = FrameBuffer::new(new_width, new_height);
    for y in 0..new_height {
        let v = (y as f32 + 0.5) / new_height as f32;
        for x in 0..new_width {
            let u = (x as f32 + 0.5) / new_width as f32;
            let [r, g, b, a] = fb.sample_bilinear(u, v);
            resized.set_pixel(x, y, [to_u8(r), to_u8(g), to_u8(b), to_u8(a)]);
        }
    }
    resized
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
