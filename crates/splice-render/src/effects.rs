//! Per-pixel effect transforms.
//!
//! These mirror the three branches of `shaders/composite.wgsl` so the CPU
//! and GPU surfaces agree on what a draw call produces.

use splice_ir::{EffectParams, EffectSelector};

/// Noise is re-seeded this many times per second of timeline.
pub const NOISE_RATE: f64 = 60.0;

/// Shade one sampled texel. `uv` is the texel's position in the source,
/// normalized to `[0, 1]`, and `time` is the timeline time in seconds.
pub fn shade(texel: [f32; 4], params: &EffectParams, uv: [f32; 2], time: f64) -> [f32; 4] {
    match params.selector {
        EffectSelector::PassThrough => texel,
        EffectSelector::Glow => glow(texel, params.intensity),
        EffectSelector::Noise => noise(texel, params.intensity, uv, noise_seed(time)),
    }
}

/// Additive glow weighted by the texel's own alpha.
fn glow(texel: [f32; 4], intensity: f32) -> [f32; 4] {
    let boost = 1.0 + texel[3] * intensity;
    [
        (texel[0] * boost).min(1.0),
        (texel[1] * boost).min(1.0),
        (texel[2] * boost).min(1.0),
        texel[3],
    ]
}

/// Grey hash noise mixed over the color at `intensity`. Alpha is kept.
fn noise(texel: [f32; 4], intensity: f32, uv: [f32; 2], seed: f32) -> [f32; 4] {
    let n = hash(uv, seed);
    let t = intensity.clamp(0.0, 1.0);
    [
        texel[0] + (n - texel[0]) * t,
        texel[1] + (n - texel[1]) * t,
        texel[2] + (n - texel[2]) * t,
        texel[3],
    ]
}

/// Frame-quantized time, so noise holds still within one 1/60 s step.
pub fn noise_seed(time: f64) -> f32 {
    (time * NOISE_RATE).floor() as f32
}

/// `fract(sin(dot(uv, (12.9898, 78.233)) + seed) * 43758.5453)`.
pub fn hash(uv: [f32; 2], seed: f32) -> f32 {
    let dot = uv[0] * 12.9898 + uv[1] * 78.233 + seed;
    let v = dot.sin() * 43758.5453;
    v - v.floor()
}
