//! The encode/mux driver: one export job from project snapshot to
//! finished container bytes.
//!
//! Phases run strictly in sequence on the calling task. Every decode
//! cursor and encoder opened along the way is closed exactly once when
//! `run` returns, whatever the outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use splice_audio::{mix, AudioClip};
use splice_core::codec::{
    AudioData, AudioEncodeCapability, AudioEncoderConfig, CodecFactory, VideoEncodeCapability,
    VideoEncoderConfig,
};
use splice_core::{time, ExportConfig, JobContext, PcmBuffer, SpliceError, SpliceResult};
use splice_demux::{demux_asset, DecodedVideoTrack, DemuxOptions};
use splice_encode::{AudioTrackParams, Mp4Muxer, VideoTrackParams};
use splice_ir::{AssetHandle, Content, EffectParams, Project};
use splice_render::{Compositor, CursorOptions, DecodeCursor, Rect, TextCache, TextRenderer};

use crate::progress::{self, ProgressReporter};
use crate::session::ChunkQueue;
use crate::state::{ExportState, StateMachine};

struct VideoSession {
    encoder: Box<dyn VideoEncodeCapability>,
    chunks: ChunkQueue,
}

struct AudioSession {
    encoder: Box<dyn AudioEncodeCapability>,
    chunks: ChunkQueue,
}

pub struct ExportDriver {
    ctx: JobContext,
    config: Arc<ExportConfig>,
    codecs: Arc<dyn CodecFactory>,
    progress: ProgressReporter,
    state: StateMachine,
    cursors: BTreeMap<AssetHandle, DecodeCursor>,
    video: Option<VideoSession>,
    audio: Option<AudioSession>,
}

impl ExportDriver {
    pub fn new(
        ctx: JobContext,
        config: Arc<ExportConfig>,
        codecs: Arc<dyn CodecFactory>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            ctx,
            config,
            codecs,
            progress,
            state: StateMachine::new(),
            cursors: BTreeMap::new(),
            video: None,
            audio: None,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state.state()
    }

    /// Export `project`. Returns the container bytes, or `Cancelled` once
    /// cancellation has been observed.
    pub async fn run(&mut self, project: &Project) -> SpliceResult<Vec<u8>> {
        info!(
            job = %self.ctx.id(),
            width = project.settings.width,
            height = project.settings.height,
            fps = project.settings.fps,
            frames = project.frame_count(),
            "export started"
        );
        let result = self.execute(project).await;
        self.teardown().await;

        match result {
            Ok(bytes) => {
                info!(job = %self.ctx.id(), bytes = bytes.len(), "export finalized");
                Ok(bytes)
            }
            Err(e) if e.is_cancelled() || self.ctx.is_cancelled() => {
                self.state.cancel();
                info!(job = %self.ctx.id(), state = %self.state.state(), "export cancelled");
                Err(SpliceError::Cancelled)
            }
            Err(e) => {
                self.state.fail();
                warn!(job = %self.ctx.id(), error = %e, "export failed");
                Err(e)
            }
        }
    }

    async fn execute(&mut self, project: &Project) -> SpliceResult<Vec<u8>> {
        let settings = project.settings;

        self.state.transition(ExportState::Demuxing)?;
        self.progress.report(progress::DEMUX_START);
        self.open_cursors(project).await?;

        let mixed =
            mix(&audio_clips(project), project.total_duration()).filter(|pcm| pcm.frames() > 0);
        self.open_video_encoder(settings.width, settings.height, settings.fps)
            .await?;
        if let Some(pcm) = &mixed {
            self.open_audio_encoder(pcm).await?;
        }

        let audio_params = mixed.as_ref().map(|pcm| AudioTrackParams {
            sample_rate: pcm.sample_rate,
            channels: pcm.channel_count() as u32,
            bitrate: self.config.audio.bitrate,
        });
        let mut muxer = Mp4Muxer::new(
            VideoTrackParams {
                width: settings.width,
                height: settings.height,
            },
            audio_params,
        );

        self.state.transition(ExportState::Rendering)?;
        self.render_frames(project, &mut muxer).await?;

        self.state.transition(ExportState::FlushingVideo)?;
        self.flush_video(&mut muxer).await?;
        self.progress.report(progress::VIDEO_FLUSHED);

        if let Some(pcm) = &mixed {
            self.state.transition(ExportState::EncodingAudio)?;
            self.encode_audio(pcm, &mut muxer).await?;
        }

        self.ctx.check_cancelled()?;
        let bytes = muxer.finalize()?;
        if bytes.is_empty() {
            return Err(SpliceError::MuxEmptyOutput);
        }
        self.state.transition(ExportState::Finalized)?;
        self.progress.report(progress::COMPLETE);
        Ok(bytes)
    }

    /// Demux every referenced asset and give it a decode cursor over the
    /// samples its items actually present.
    async fn open_cursors(&mut self, project: &Project) -> SpliceResult<()> {
        let windows = usage_windows(project);
        let options = DemuxOptions {
            scan_samples: self.config.decode.paramset_scan_samples,
        };
        let cursor_options = CursorOptions::from_config(&self.config.decode);

        for handle in project.referenced_assets() {
            self.ctx.check_cancelled()?;
            let id = project.assets.id(handle).to_string();
            self.ctx.diagnostic(format!("demuxing asset {}", id));
            let asset = project.asset(handle);
            let track = demux_asset(&self.ctx, &asset.data, asset.param_set.clone(), options)
                .await
                .map_err(|e| match e {
                    SpliceError::Demux(message) => {
                        SpliceError::Demux(format!("{}: {}", id, message))
                    }
                    other => other,
                })?;
            let track = match windows.get(&handle) {
                Some(&(start, end)) => trim_to_window(track, start, end),
                None => track,
            };
            debug!(asset = %id, samples = track.samples.len(), codec = %track.codec, "asset ready");

            let decoder = self.codecs.video_decoder()?;
            let cursor =
                DecodeCursor::open(&self.ctx, Arc::new(track), decoder, cursor_options).await?;
            self.cursors.insert(handle, cursor);
        }
        Ok(())
    }

    async fn open_video_encoder(&mut self, width: u32, height: u32, fps: f64) -> SpliceResult<()> {
        let video = &self.config.video;
        if width > video.max_width || height > video.max_height {
            return Err(SpliceError::ConfigUnsupported(format!(
                "{}x{} exceeds the {}x{} encode limit",
                width, height, video.max_width, video.max_height
            )));
        }
        let config = VideoEncoderConfig {
            codec: video.codec.clone(),
            width,
            height,
            bitrate: video.bitrate,
            framerate: fps,
            keyframe_interval: video.keyframe_interval,
        };

        let encoder = self.codecs.video_encoder()?;
        let (chunks, output, error) = ChunkQueue::new();
        let session = self.video.insert(VideoSession { encoder, chunks });
        if !session.encoder.is_config_supported(&config).await {
            return Err(SpliceError::ConfigUnsupported(format!(
                "video encoder rejected {} at {}x{} {}bps",
                config.codec, width, height, config.bitrate
            )));
        }
        session.encoder.configure(&config, output, error)?;
        debug!(codec = %config.codec, width, height, "video encoder configured");
        Ok(())
    }

    async fn open_audio_encoder(&mut self, pcm: &PcmBuffer) -> SpliceResult<()> {
        let config = AudioEncoderConfig {
            codec: self.config.audio.codec.clone(),
            sample_rate: pcm.sample_rate,
            channels: pcm.channel_count() as u32,
            bitrate: self.config.audio.bitrate,
        };

        let encoder = self.codecs.audio_encoder()?;
        let (chunks, output, error) = ChunkQueue::new();
        let session = self.audio.insert(AudioSession { encoder, chunks });
        if !session.encoder.is_config_supported(&config).await {
            return Err(SpliceError::ConfigUnsupported(format!(
                "audio encoder rejected {} at {}Hz x{}",
                config.codec, config.sample_rate, config.channels
            )));
        }
        session.encoder.configure(&config, output, error)?;
        debug!(
            codec = %config.codec,
            sample_rate = config.sample_rate,
            channels = config.channels,
            "audio encoder configured"
        );
        Ok(())
    }

    async fn render_frames(&mut self, project: &Project, muxer: &mut Mp4Muxer) -> SpliceResult<()> {
        let Self {
            ctx,
            config,
            progress,
            cursors,
            video,
            ..
        } = self;
        let config = config.as_ref();
        let Some(video) = video.as_mut() else {
            return Err(SpliceError::Render("video encoder is not open".into()));
        };

        let settings = project.settings;
        let fps = settings.fps;
        let frame_count = project.frame_count();
        let frame_duration = time::frame_duration_micros(fps);
        let keyframe_interval = u64::from(config.video.keyframe_interval.max(1));
        let cadence = progress::frames_per_report(config.render.progress_interval_secs, fps);

        let compositor = Compositor::new(
            settings.width,
            settings.height,
            config.render.background_color()?,
        );
        #[cfg(feature = "gpu")]
        let compositor = if config.render.gpu {
            compositor.with_gpu()
        } else {
            compositor
        };
        #[cfg(not(feature = "gpu"))]
        if config.render.gpu {
            warn!("render.gpu is set but splice was built without the gpu feature");
        }
        let mut compositor = compositor;
        let renderer = text_renderer(project, config)?;
        let mut text = TextCache::new();

        for i in 0..frame_count {
            ctx.check_cancelled()?;
            let t = i as f64 / fps;
            compositor.clear();

            let mut drawn = 0usize;
            for item in project.visual_items_at(t) {
                let effect = EffectParams::pick(&item.effects);
                match project.content(item.content) {
                    Content::Image { bitmap } => {
                        let rect = placed(item.x, item.y, bitmap.width, bitmap.height, item.scale);
                        compositor.draw(bitmap, rect, effect, t);
                    }
                    Content::Text { text: body, style } => {
                        let bitmap = text.get_or_render(item.content, body, style, &renderer)?;
                        let rect = placed(item.x, item.y, bitmap.width, bitmap.height, item.scale);
                        compositor.draw(&bitmap, rect, effect, t);
                    }
                    Content::Video {
                        asset,
                        width,
                        height,
                        ..
                    } => {
                        let Some(cursor) = cursors.get_mut(asset) else {
                            return Err(SpliceError::asset(
                                "no decode cursor for asset",
                                project.assets.id(*asset),
                            ));
                        };
                        let wanted = time::seconds_to_micros(item.source_time(t));
                        if let Some(frame) = cursor.ensure_frame_at(wanted).await? {
                            let rect = placed(item.x, item.y, *width, *height, item.scale);
                            compositor.draw(&frame.image, rect, effect, t);
                        }
                    }
                    Content::Audio { .. } => continue,
                }
                drawn += 1;
            }

            let timestamp_us = i as i64 * frame_duration;
            let keyframe = i % keyframe_interval == 0;
            video
                .encoder
                .encode(compositor.surface(), timestamp_us, frame_duration, keyframe)
                .await?;
            video.chunks.drain(|chunk| muxer.add_video_chunk(chunk))?;

            if i % cadence == 0 {
                progress.report_frame(i, frame_count);
            }
            ctx.verbose(|| {
                format!(
                    "frame {}/{} at {}us: {} draws{}",
                    i + 1,
                    frame_count,
                    timestamp_us,
                    drawn,
                    if keyframe { ", key" } else { "" }
                )
            });
            tokio::task::yield_now().await;
        }

        info!(frames = frame_count, texts = text.len(), "render complete");
        Ok(())
    }

    async fn flush_video(&mut self, muxer: &mut Mp4Muxer) -> SpliceResult<()> {
        let Some(video) = self.video.as_mut() else {
            return Err(SpliceError::Render("video encoder is not open".into()));
        };
        video.encoder.flush().await?;
        video.chunks.drain(|chunk| muxer.add_video_chunk(chunk))?;
        self.ctx.diagnostic(format!(
            "video flushed: {} chunks, {} samples muxed",
            video.chunks.received(),
            muxer.video_samples()
        ));
        Ok(())
    }

    async fn encode_audio(&mut self, pcm: &PcmBuffer, muxer: &mut Mp4Muxer) -> SpliceResult<()> {
        let chunk_frames = self.config.audio.chunk_frames.max(1);
        let Some(audio) = self.audio.as_mut() else {
            return Err(SpliceError::Encode("audio encoder is not open".into()));
        };

        let frames = pcm.frames();
        let rate = pcm.sample_rate as f64;
        for start in (0..frames).step_by(chunk_frames) {
            self.ctx.check_cancelled()?;
            let end = (start + chunk_frames).min(frames);
            let data = AudioData {
                sample_rate: pcm.sample_rate,
                timestamp_us: time::seconds_to_micros(start as f64 / rate),
                planes: pcm
                    .channels
                    .iter()
                    .map(|plane| plane[start..end].to_vec())
                    .collect(),
            };
            audio.encoder.encode(data).await?;
            audio.chunks.drain(|chunk| muxer.add_audio_chunk(chunk))?;
            tokio::task::yield_now().await;
        }

        audio.encoder.flush().await?;
        audio.chunks.drain(|chunk| muxer.add_audio_chunk(chunk))?;
        debug!(
            frames,
            chunks = audio.chunks.received(),
            samples = muxer.audio_samples(),
            "audio encoded"
        );
        Ok(())
    }

    /// Close everything still open. Failures are logged, never raised.
    async fn teardown(&mut self) {
        for (handle, mut cursor) in std::mem::take(&mut self.cursors) {
            if let Err(e) = cursor.close().await {
                warn!(asset = handle.index(), error = %e, "closing decode cursor failed");
            }
        }
        if let Some(mut video) = self.video.take() {
            if let Err(e) = video.encoder.close().await {
                warn!(error = %e, "closing video encoder failed");
            }
        }
        if let Some(mut audio) = self.audio.take() {
            if let Err(e) = audio.encoder.close().await {
                warn!(error = %e, "closing audio encoder failed");
            }
        }
    }
}

fn audio_clips(project: &Project) -> Vec<AudioClip> {
    project
        .audio_items()
        .map(|(item, buffer)| AudioClip {
            buffer: buffer.clone(),
            start: item.start,
            offset: item.offset,
            duration: item.duration,
        })
        .collect()
}

/// Source-time span `[start, end)` in microseconds that each asset's items
/// present.
fn usage_windows(project: &Project) -> HashMap<AssetHandle, (i64, i64)> {
    let mut windows: HashMap<AssetHandle, (i64, i64)> = HashMap::new();
    for track in &project.tracks {
        for item in &track.items {
            let Content::Video { asset, .. } = project.content(item.content) else {
                continue;
            };
            let start = time::seconds_to_micros(item.offset);
            let end = time::seconds_to_micros(item.offset + item.duration);
            windows
                .entry(*asset)
                .and_modify(|w| {
                    w.0 = w.0.min(start);
                    w.1 = w.1.max(end);
                })
                .or_insert((start, end));
        }
    }
    windows
}

fn trim_to_window(track: DecodedVideoTrack, start_us: i64, end_us: i64) -> DecodedVideoTrack {
    let window = track.samples_in_window(start_us, end_us);
    if window.len() == track.samples.len() {
        return track;
    }
    let samples = window.to_vec();
    DecodedVideoTrack { samples, ..track }
}

fn text_renderer(project: &Project, config: &ExportConfig) -> SpliceResult<TextRenderer> {
    let mut renderer = TextRenderer::with_fonts(&project.fonts)?;
    if let Some(path) = &config.text.default_font {
        renderer.set_fallback(path)?;
    }
    Ok(renderer)
}

fn placed(x: f64, y: f64, width: u32, height: u32, scale: f64) -> Rect {
    Rect::new(x, y, width as f64 * scale, height as f64 * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_demux::CodedSample;

    fn sample(cts: i64, sync: bool) -> CodedSample {
        CodedSample {
            cts,
            dts: cts,
            duration: 1000,
            timescale: 1000,
            is_sync: sync,
            data: Arc::from(vec![0u8; 4]),
        }
    }

    fn track(samples: Vec<CodedSample>) -> DecodedVideoTrack {
        DecodedVideoTrack {
            track_id: 1,
            codec: "avc1.42c01f".into(),
            coded_width: 16,
            coded_height: 16,
            timescale: 1000,
            description: None,
            samples,
        }
    }

    #[test]
    fn test_trim_starts_at_preceding_sync() {
        let samples = (0..6).map(|i| sample(i * 1000, i % 3 == 0)).collect();
        let trimmed = trim_to_window(track(samples), 4_000_000, 5_000_000);
        let stamps: Vec<i64> = trimmed.samples.iter().map(|s| s.cts).collect();
        assert_eq!(stamps, vec![3000, 4000]);
    }

    #[test]
    fn test_trim_keeps_full_track() {
        let samples = (0..3).map(|i| sample(i * 1000, i == 0)).collect();
        let trimmed = trim_to_window(track(samples), 0, 3_000_000);
        assert_eq!(trimmed.samples.len(), 3);
    }

    #[test]
    fn test_placed_scales_natural_size() {
        let rect = placed(4.0, 2.0, 100, 50, 0.5);
        assert_eq!(rect, Rect::new(4.0, 2.0, 50.0, 25.0));
    }
}
