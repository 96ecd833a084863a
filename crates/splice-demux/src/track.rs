use std::sync::Arc;

use serde::Serialize;

use splice_core::codec::{ChunkKind, EncodedChunk};
use splice_core::time;

/// One coded access unit, with timing in its track's timescale.
#[derive(Debug, Clone)]
pub struct CodedSample {
    /// Composition timestamp, in ticks.
    pub cts: i64,
    /// Decode timestamp, in ticks.
    pub dts: i64,
    pub duration: u32,
    pub timescale: u32,
    pub is_sync: bool,
    pub data: Arc<[u8]>,
}

impl CodedSample {
    pub fn timestamp_us(&self) -> i64 {
        time::ticks_to_micros(self.cts, self.timescale)
    }

    /// Never less than 1.
    pub fn duration_us(&self) -> i64 {
        time::ticks_to_micros(self.duration as i64, self.timescale).max(1)
    }

    pub fn to_chunk(&self) -> EncodedChunk {
        EncodedChunk {
            kind: if self.is_sync {
                ChunkKind::Key
            } else {
                ChunkKind::Delta
            },
            timestamp_us: self.timestamp_us(),
            duration_us: self.duration_us(),
            data: self.data.clone(),
            decoder_config: None,
        }
    }
}

/// Everything downstream needs to decode one asset's video, populated once
/// at demux time.
#[derive(Debug, Clone)]
pub struct DecodedVideoTrack {
    pub track_id: u32,
    /// `avc1.PPCCLL` when a configuration record is known, otherwise the
    /// sample entry type.
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub timescale: u32,
    /// `avcC` record, if one was found or rebuilt.
    pub description: Option<Arc<[u8]>>,
    /// Decode order.
    pub samples: Vec<CodedSample>,
}

impl DecodedVideoTrack {
    /// Samples needed to present `[start_us, end_us)`.
    ///
    /// The range opens at the nearest sync sample at or before the first
    /// sample overlapping the window. With no such sync sample the first
    /// overlapping sample is used as is, even though it may not decode.
    pub fn samples_in_window(&self, start_us: i64, end_us: i64) -> &[CodedSample] {
        let Some(first) = self
            .samples
            .iter()
            .position(|s| s.timestamp_us() + s.duration_us() > start_us)
        else {
            return &[];
        };
        let lo = self.samples[..=first]
            .iter()
            .rposition(|s| s.is_sync)
            .unwrap_or(first);
        let hi = self
            .samples
            .iter()
            .rposition(|s| s.timestamp_us() < end_us)
            .map_or(lo, |last| last + 1)
            .max(lo);
        &self.samples[lo..hi]
    }

    pub fn duration_us(&self) -> i64 {
        self.samples
            .iter()
            .map(|s| s.timestamp_us() + s.duration_us())
            .max()
            .unwrap_or(0)
    }

    pub fn sync_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_sync).count()
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            track_id: self.track_id,
            codec: self.codec.clone(),
            coded_width: self.coded_width,
            coded_height: self.coded_height,
            timescale: self.timescale,
            samples: self.samples.len(),
            sync_samples: self.sync_count(),
            duration_us: self.duration_us(),
            has_description: self.description.is_some(),
        }
    }
}

/// Serializable overview of a demuxed track.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub track_id: u32,
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub timescale: u32,
    pub samples: usize,
    pub sync_samples: usize,
    pub duration_us: i64,
    pub has_description: bool,
}
