use std::sync::Arc;

use tracing::debug;

use splice_core::PcmBuffer;

/// One audible placement on the timeline. Times are in seconds.
#[derive(Clone, Debug)]
pub struct AudioClip {
    pub buffer: Arc<PcmBuffer>,
    pub start: f64,
    /// In-point within `buffer`.
    pub offset: f64,
    pub duration: f64,
}

/// Sum all clips onto one timeline of `total_duration` seconds.
///
/// Returns `None` when there is nothing to mix. Sources are resampled by
/// linear interpolation, clamped flat at their ends; a clip with fewer
/// channels than the output repeats its last channel. Contributions are
/// added without normalization, so overlapping clips may exceed full scale.
pub fn mix(clips: &[AudioClip], total_duration: f64) -> Option<PcmBuffer> {
    let clips: Vec<&AudioClip> = clips
        .iter()
        .filter(|c| c.buffer.sample_rate > 0 && c.buffer.frames() > 0)
        .collect();
    if clips.is_empty() {
        return None;
    }

    let rate = clips.iter().map(|c| c.buffer.sample_rate).max()?;
    let channels = clips.iter().map(|c| c.buffer.channel_count()).max()?;
    let out_rate = rate as f64;
    let frames = sample_index(total_duration, out_rate);
    let mut out = PcmBuffer::silent(rate, channels, frames);

    for clip in &clips {
        let src = clip.buffer.as_ref();
        let src_rate = src.sample_rate as f64;
        let step = src_rate / out_rate;
        let first = sample_index(clip.start, out_rate);
        let last = sample_index(clip.start + clip.duration, out_rate).min(frames);
        if first >= last {
            continue;
        }
        let base = clip.start * out_rate;
        let in_point = clip.offset * src_rate;

        for (ch, plane) in out.channels.iter_mut().enumerate() {
            let source = &src.channels[ch.min(src.channel_count() - 1)];
            for i in first..last {
                let pos = (i as f64 - base) * step + in_point;
                plane[i] += interpolate(source, pos);
            }
        }
        debug!(
            start = clip.start,
            offset = clip.offset,
            duration = clip.duration,
            src_rate = src.sample_rate,
            out_frames = last - first,
            "mixed clip"
        );
    }
    Some(out)
}

/// First output index at or after `seconds`. Float error below a millionth
/// of a sample never adds one more sample.
fn sample_index(seconds: f64, rate: f64) -> usize {
    (seconds * rate - 1e-6).ceil().max(0.0) as usize
}

fn interpolate(source: &[f32], pos: f64) -> f32 {
    let last = source.len() - 1;
    if pos <= 0.0 {
        return source[0];
    }
    let i0 = pos.floor() as usize;
    if i0 >= last {
        return source[last];
    }
    let frac = (pos - i0 as f64) as f32;
    let a = source[i0];
    if frac == 0.0 {
        return a;
    }
    a + (source[i0 + 1] - a) * frac
}
