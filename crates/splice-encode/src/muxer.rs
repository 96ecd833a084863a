//! Progressive MP4 muxer.
//!
//! Chunks are buffered in memory as they leave the encoders. `finalize`
//! writes `ftyp`, one `mdat` holding every sample (video first, then
//! audio), and a `moov` whose sample tables point into it. There are no
//! fragments and no edit lists; the first sample of each track starts at
//! media time zero.

use std::sync::Arc;

use tracing::{debug, info};

use splice_core::codec::EncodedChunk;
use splice_core::time::micros_to_ticks;
use splice_core::{SpliceError, SpliceResult};

use crate::boxes::{descriptor_len, BoxWriter};

pub const VIDEO_TIMESCALE: u32 = 90_000;
const MOVIE_TIMESCALE: u32 = 1_000;

const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTrackParams {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrackParams {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
}

#[derive(Debug, Clone)]
struct Sample {
    data: Arc<[u8]>,
    timestamp_us: i64,
    duration_us: i64,
    sync: bool,
}

#[derive(Debug, Default)]
struct TrackBuffer {
    samples: Vec<Sample>,
    config: Option<Arc<[u8]>>,
}

impl TrackBuffer {
    fn push(&mut self, chunk: &EncodedChunk, what: &str) -> SpliceResult<()> {
        if let Some(last) = self.samples.last() {
            if chunk.timestamp_us < last.timestamp_us {
                return Err(SpliceError::Encode(format!(
                    "{} chunk at {}us arrived after {}us",
                    what, chunk.timestamp_us, last.timestamp_us
                )));
            }
        }
        if self.config.is_none() {
            self.config = chunk.decoder_config.clone();
        }
        self.samples.push(Sample {
            data: chunk.data.clone(),
            timestamp_us: chunk.timestamp_us,
            duration_us: chunk.duration_us.max(1),
            sync: chunk.is_key(),
        });
        Ok(())
    }

    fn byte_len(&self) -> u64 {
        self.samples.iter().map(|s| s.data.len() as u64).sum()
    }

    /// Per-sample durations in `timescale` ticks, taken from timestamp
    /// deltas so rounding never accumulates. The last sample keeps its own
    /// duration.
    fn tick_durations(&self, timescale: u32) -> Vec<u32> {
        let Some(first) = self.samples.first() else {
            return Vec::new();
        };
        let origin = first.timestamp_us;
        let starts: Vec<i64> = self
            .samples
            .iter()
            .map(|s| micros_to_ticks(s.timestamp_us - origin, timescale))
            .collect();
        let mut durations = Vec::with_capacity(starts.len());
        for (i, sample) in self.samples.iter().enumerate() {
            let ticks = match starts.get(i + 1) {
                Some(next) => next - starts[i],
                None => micros_to_ticks(sample.duration_us, timescale),
            };
            durations.push(ticks.clamp(1, u32::MAX as i64) as u32);
        }
        durations
    }
}

/// Layout facts for one track inside the finished file.
struct TrackLayout<'a> {
    buffer: &'a TrackBuffer,
    timescale: u32,
    durations: Vec<u32>,
    chunk_offset: u64,
    wide_offsets: bool,
}

impl TrackLayout<'_> {
    fn media_duration(&self) -> u64 {
        self.durations.iter().map(|d| *d as u64).sum()
    }

    fn movie_duration(&self) -> u32 {
        let micros = micros_from_ticks(self.media_duration(), self.timescale);
        micros_to_ticks(micros, MOVIE_TIMESCALE).clamp(0, u32::MAX as i64) as u32
    }
}

fn micros_from_ticks(ticks: u64, timescale: u32) -> i64 {
    splice_core::time::ticks_to_micros(ticks.min(i64::MAX as u64) as i64, timescale)
}

pub struct Mp4Muxer {
    video_params: VideoTrackParams,
    audio_params: Option<AudioTrackParams>,
    video: TrackBuffer,
    audio: TrackBuffer,
}

impl Mp4Muxer {
    pub fn new(video: VideoTrackParams, audio: Option<AudioTrackParams>) -> Self {
        Self {
            video_params: video,
            audio_params: audio,
            video: TrackBuffer::default(),
            audio: TrackBuffer::default(),
        }
    }

    pub fn add_video_chunk(&mut self, chunk: &EncodedChunk) -> SpliceResult<()> {
        self.video.push(chunk, "video")
    }

    pub fn add_audio_chunk(&mut self, chunk: &EncodedChunk) -> SpliceResult<()> {
        if self.audio_params.is_none() {
            return Err(SpliceError::Encode(
                "audio chunk for a muxer without an audio track".into(),
            ));
        }
        self.audio.push(chunk, "audio")
    }

    pub fn video_samples(&self) -> usize {
        self.video.samples.len()
    }

    pub fn audio_samples(&self) -> usize {
        self.audio.samples.len()
    }

    /// Close the container and return its bytes.
    ///
    /// A container without a single video sample is reported as
    /// [`SpliceError::MuxEmptyOutput`].
    pub fn finalize(self) -> SpliceResult<Vec<u8>> {
        if self.video.samples.is_empty() {
            return Err(SpliceError::MuxEmptyOutput);
        }
        let avcc = self.video_config()?;

        let audio = match self.audio_params {
            Some(params) if !self.audio.samples.is_empty() => {
                let asc = self.audio.config.clone().ok_or_else(|| {
                    SpliceError::Encode("audio encoder emitted no AudioSpecificConfig".into())
                })?;
                Some((params, asc))
            }
            Some(_) => {
                debug!("audio track has no samples, omitting it");
                None
            }
            None => None,
        };

        let mut head = BoxWriter::new();
        write_ftyp(&mut head);

        let video_bytes = self.video.byte_len();
        let audio_bytes = if audio.is_some() {
            self.audio.byte_len()
        } else {
            0
        };
        let payload = video_bytes + audio_bytes;
        let large = payload + 8 > u32::MAX as u64;
        let mdat_header = if large { 16 } else { 8 };
        let data_start = head.len() as u64 + mdat_header;
        let wide_offsets = data_start + payload > u32::MAX as u64;

        let video_layout = TrackLayout {
            buffer: &self.video,
            timescale: VIDEO_TIMESCALE,
            durations: self.video.tick_durations(VIDEO_TIMESCALE),
            chunk_offset: data_start,
            wide_offsets,
        };
        let audio_layout = audio.as_ref().map(|(params, _)| TrackLayout {
            buffer: &self.audio,
            timescale: params.sample_rate,
            durations: self.audio.tick_durations(params.sample_rate),
            chunk_offset: data_start + video_bytes,
            wide_offsets,
        });

        let mut out = head.into_bytes();
        out.reserve(mdat_header as usize + payload as usize + 4096);
        if large {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(b"mdat");
            out.extend_from_slice(&(payload + 16).to_be_bytes());
        } else {
            out.extend_from_slice(&((payload + 8) as u32).to_be_bytes());
            out.extend_from_slice(b"mdat");
        }
        for sample in &self.video.samples {
            out.extend_from_slice(&sample.data);
        }
        if audio.is_some() {
            for sample in &self.audio.samples {
                out.extend_from_slice(&sample.data);
            }
        }

        let mut moov = BoxWriter::new();
        let movie_duration = audio_layout
            .as_ref()
            .map_or(0, TrackLayout::movie_duration)
            .max(video_layout.movie_duration());
        let next_track_id = if audio.is_some() {
            AUDIO_TRACK_ID + 1
        } else {
            VIDEO_TRACK_ID + 1
        };
        moov.nest(b"moov", |w| {
            write_mvhd(w, movie_duration, next_track_id);
            write_video_trak(w, &video_layout, self.video_params, &avcc);
            if let (Some(layout), Some((params, asc))) = (&audio_layout, &audio) {
                write_audio_trak(w, layout, *params, asc);
            }
        });
        out.extend(moov.into_bytes());

        if out.is_empty() {
            return Err(SpliceError::MuxEmptyOutput);
        }
        info!(
            bytes = out.len(),
            video_samples = self.video.samples.len(),
            audio_samples = audio_layout.as_ref().map_or(0, |l| l.buffer.samples.len()),
            "mp4 finalized"
        );
        Ok(out)
    }

    /// The encoder's `avcC`, or one rebuilt from the coded samples.
    fn video_config(&self) -> SpliceResult<Arc<[u8]>> {
        if let Some(config) = &self.video.config {
            return Ok(config.clone());
        }
        splice_demux::reconstruct(self.video.samples.iter().take(8).map(|s| &s.data[..]))
            .and_then(|sets| sets.to_avcc())
            .map(Arc::from)
            .ok_or_else(|| {
                SpliceError::ParamSetMissing(
                    "video encoder emitted no decoder configuration".into(),
                )
            })
    }
}

fn write_ftyp(w: &mut BoxWriter) {
    w.nest(b"ftyp", |w| {
        w.bytes(b"isom").u32(0x200);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            w.bytes(brand);
        }
    });
}

fn write_mvhd(w: &mut BoxWriter, duration: u32, next_track_id: u32) {
    w.full(b"mvhd", 0, 0, |w| {
        w.u32(0).u32(0).u32(MOVIE_TIMESCALE).u32(duration);
        w.u32(0x0001_0000).u16(0x0100).zeros(10);
        w.unity_matrix();
        w.zeros(24).u32(next_track_id);
    });
}

fn write_tkhd(w: &mut BoxWriter, track_id: u32, duration: u32, volume: u16, size: (u32, u32)) {
    // enabled | in_movie
    w.full(b"tkhd", 0, 0x3, |w| {
        w.u32(0).u32(0).u32(track_id).u32(0).u32(duration);
        w.zeros(8).u16(0).u16(0).u16(volume).u16(0);
        w.unity_matrix();
        w.u32(size.0 << 16).u32(size.1 << 16);
    });
}

fn write_mdhd(w: &mut BoxWriter, layout: &TrackLayout<'_>) {
    let duration = layout.media_duration().min(u32::MAX as u64) as u32;
    w.full(b"mdhd", 0, 0, |w| {
        // language "und"
        w.u32(0).u32(0).u32(layout.timescale).u32(duration).u16(0x55C4).u16(0);
    });
}

fn write_hdlr(w: &mut BoxWriter, handler: &[u8; 4], name: &str) {
    w.full(b"hdlr", 0, 0, |w| {
        w.u32(0).bytes(handler).zeros(12).bytes(name.as_bytes()).u8(0);
    });
}

fn write_dinf(w: &mut BoxWriter) {
    w.nest(b"dinf", |w| {
        w.full(b"dref", 0, 0, |w| {
            // self-contained
            w.u32(1).full(b"url ", 0, 1, |_| {});
        });
    });
}

/// `stts`, optional `stss`, `stsz`, `stsc` and the chunk offset box for a
/// track stored as a single chunk.
fn write_sample_tables(w: &mut BoxWriter, layout: &TrackLayout<'_>, with_sync: bool) {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &d in &layout.durations {
        match runs.last_mut() {
            Some((count, delta)) if *delta == d => *count += 1,
            _ => runs.push((1, d)),
        }
    }
    w.full(b"stts", 0, 0, |w| {
        w.u32(runs.len() as u32);
        for (count, delta) in &runs {
            w.u32(*count).u32(*delta);
        }
    });

    let samples = &layout.buffer.samples;
    if with_sync {
        let sync: Vec<u32> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.sync)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        w.full(b"stss", 0, 0, |w| {
            w.u32(sync.len() as u32);
            for n in &sync {
                w.u32(*n);
            }
        });
    }

    w.full(b"stsz", 0, 0, |w| {
        w.u32(0).u32(samples.len() as u32);
        for s in samples {
            w.u32(s.data.len() as u32);
        }
    });
    w.full(b"stsc", 0, 0, |w| {
        w.u32(1).u32(1).u32(samples.len() as u32).u32(1);
    });
    if layout.wide_offsets {
        w.full(b"co64", 0, 0, |w| {
            w.u32(1).u64(layout.chunk_offset);
        });
    } else {
        w.full(b"stco", 0, 0, |w| {
            w.u32(1).u32(layout.chunk_offset as u32);
        });
    }
}

fn write_video_trak(
    w: &mut BoxWriter,
    layout: &TrackLayout<'_>,
    params: VideoTrackParams,
    avcc: &[u8],
) {
    w.nest(b"trak", |w| {
        write_tkhd(
            w,
            VIDEO_TRACK_ID,
            layout.movie_duration(),
            0,
            (params.width, params.height),
        );
        w.nest(b"mdia", |w| {
            write_mdhd(w, layout);
            write_hdlr(w, b"vide", "VideoHandler");
            w.nest(b"minf", |w| {
                w.full(b"vmhd", 0, 1, |w| {
                    w.u16(0).zeros(6);
                });
                write_dinf(w);
                w.nest(b"stbl", |w| {
                    w.full(b"stsd", 0, 0, |w| {
                        w.u32(1).nest(b"avc1", |w| {
                            w.zeros(6).u16(1).zeros(16);
                            w.u16(params.width as u16).u16(params.height as u16);
                            w.u32(0x0048_0000).u32(0x0048_0000).u32(0).u16(1);
                            w.zeros(32).u16(0x0018).u16(0xFFFF);
                            w.nest(b"avcC", |w| {
                                w.bytes(avcc);
                            });
                        });
                    });
                    write_sample_tables(w, layout, true);
                });
            });
        });
    });
}

fn write_audio_trak(
    w: &mut BoxWriter,
    layout: &TrackLayout<'_>,
    params: AudioTrackParams,
    asc: &[u8],
) {
    w.nest(b"trak", |w| {
        write_tkhd(w, AUDIO_TRACK_ID, layout.movie_duration(), 0x0100, (0, 0));
        w.nest(b"mdia", |w| {
            write_mdhd(w, layout);
            write_hdlr(w, b"soun", "SoundHandler");
            w.nest(b"minf", |w| {
                w.full(b"smhd", 0, 0, |w| {
                    w.u16(0).u16(0);
                });
                write_dinf(w);
                w.nest(b"stbl", |w| {
                    w.full(b"stsd", 0, 0, |w| {
                        w.u32(1).nest(b"mp4a", |w| {
                            w.zeros(6).u16(1).zeros(8);
                            w.u16(params.channels as u16).u16(16).u16(0).u16(0);
                            w.u32(params.sample_rate << 16);
                            w.full(b"esds", 0, 0, |w| {
                                w.bytes(&es_descriptor(params.bitrate, asc));
                            });
                        });
                    });
                    write_sample_tables(w, layout, false);
                });
            });
        });
    });
}

/// ES_Descriptor wrapping an AAC DecoderConfigDescriptor.
fn es_descriptor(bitrate: u32, asc: &[u8]) -> Vec<u8> {
    fn tagged(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(descriptor_len(body.len()));
        out.extend_from_slice(body);
        out
    }

    let specific = tagged(0x05, asc);
    let mut config = vec![0x40, 0x15, 0, 0, 0];
    config.extend_from_slice(&bitrate.to_be_bytes());
    config.extend_from_slice(&bitrate.to_be_bytes());
    config.extend(specific);
    let config = tagged(0x04, &config);

    let mut es = vec![0, 0, 0];
    es.extend(config);
    es.extend(tagged(0x06, &[0x02]));
    tagged(0x03, &es)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::codec::ChunkKind;

    fn chunk(kind: ChunkKind, ts: i64, dur: i64, data: &[u8]) -> EncodedChunk {
        EncodedChunk {
            kind,
            timestamp_us: ts,
            duration_us: dur,
            data: Arc::from(data),
            decoder_config: None,
        }
    }

    #[test]
    fn test_empty_video_is_reported() {
        let muxer = Mp4Muxer::new(VideoTrackParams { width: 16, height: 16 }, None);
        assert!(matches!(muxer.finalize(), Err(SpliceError::MuxEmptyOutput)));
    }

    #[test]
    fn test_out_of_order_chunk_rejected() {
        let mut muxer = Mp4Muxer::new(VideoTrackParams { width: 16, height: 16 }, None);
        muxer
            .add_video_chunk(&chunk(ChunkKind::Key, 1000, 1000, &[1]))
            .unwrap();
        let err = muxer
            .add_video_chunk(&chunk(ChunkKind::Delta, 0, 1000, &[2]))
            .unwrap_err();
        assert!(matches!(err, SpliceError::Encode(_)));
    }

    #[test]
    fn test_audio_chunk_without_audio_track() {
        let mut muxer = Mp4Muxer::new(VideoTrackParams { width: 16, height: 16 }, None);
        assert!(muxer
            .add_audio_chunk(&chunk(ChunkKind::Key, 0, 1000, &[1]))
            .is_err());
    }

    #[test]
    fn test_missing_video_config_without_param_sets() {
        let mut muxer = Mp4Muxer::new(VideoTrackParams { width: 16, height: 16 }, None);
        muxer
            .add_video_chunk(&chunk(ChunkKind::Key, 0, 1000, &[0, 0, 0, 1, 0x65]))
            .unwrap();
        assert!(matches!(
            muxer.finalize(),
            Err(SpliceError::ParamSetMissing(_))
        ));
    }

    #[test]
    fn test_tick_durations_follow_timestamps() {
        let mut track = TrackBuffer::default();
        for i in 0..3 {
            track
                .push(&chunk(ChunkKind::Key, i * 33_333, 33_333, &[0]), "video")
                .unwrap();
        }
        assert_eq!(track.tick_durations(VIDEO_TIMESCALE), vec![3000, 3000, 3000]);
    }

    #[test]
    fn test_es_descriptor_layout() {
        let es = es_descriptor(128_000, &[0x12, 0x10]);
        assert_eq!(es[0], 0x03);
        assert_eq!(es[1] as usize, es.len() - 2);
        assert_eq!(es[5], 0x04);
        assert_eq!(es[7], 0x40);
        let tail = &es[es.len() - 7..];
        assert_eq!(tail, &[0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02]);
    }
}
