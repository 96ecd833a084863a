use serde::{Deserialize, Serialize};

/// Decoded planar PCM: one `Vec<f32>` per channel, all the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// A silent buffer of `frames` samples per channel.
    pub fn silent(sample_rate: u32, channel_count: usize, frames: usize) -> Self {
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Copy frames `[start, start + len)` interleaved (L R L R ...),
    /// zero-padding past the end.
    pub fn interleaved(&self, start: usize, len: usize) -> Vec<f32> {
        let channels = self.channel_count();
        let mut out = vec![0.0f32; len * channels];
        for (c, samples) in self.channels.iter().enumerate() {
            for i in 0..len {
                if let Some(&s) = samples.get(start + i) {
                    out[i * channels + c] = s;
                }
            }
        }
        out
    }
}
