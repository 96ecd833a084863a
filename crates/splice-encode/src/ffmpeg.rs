//! Encode capabilities that stream raw media through FFmpeg.
//!
//! Video: RGBA frames → libx264 baseline, Annex-B on stdout with access
//! unit delimiters, re-framed into length-prefixed samples plus an `avcC`.
//! Audio: interleaved f32le PCM → AAC-LC in ADTS, unwrapped into raw
//! frames plus an AudioSpecificConfig.
//!
//! Output chunks are delivered from a reader task that drains stdout, so
//! the callbacks run off the caller's task.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use splice_core::codec::{
    AudioData, AudioEncodeCapability, AudioEncoderConfig, ChunkKind, EncodedChunk, ErrorCallback,
    OutputCallback, VideoEncodeCapability, VideoEncoderConfig,
};
use splice_core::ffmpeg::{self, FfmpegProcess};
use splice_core::{FrameBuffer, SpliceError, SpliceResult};

use crate::adts::{self, AdtsParser, SAMPLES_PER_FRAME};
use crate::annexb::{AccessUnit, AccessUnitSplitter};

const READ_CHUNK: usize = 64 * 1024;

type Timing = Arc<Mutex<VecDeque<(i64, i64)>>>;

fn lock(timing: &Timing) -> MutexGuard<'_, VecDeque<(i64, i64)>> {
    timing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Session {
    process: FfmpegProcess,
    reader: JoinHandle<()>,
}

impl Session {
    async fn finish(mut self, what: &str) -> SpliceResult<()> {
        self.process.close_stdin();
        if let Err(e) = (&mut self.reader).await {
            warn!("{} reader task ended abnormally: {}", what, e);
        }
        self.process.finish().await?;
        Ok(())
    }

    async fn kill(mut self) {
        self.reader.abort();
        self.process.kill().await;
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub struct FfmpegVideoEncoder {
    binary: PathBuf,
    frame_size: usize,
    timing: Timing,
    session: Option<Session>,
}

impl FfmpegVideoEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            frame_size: 0,
            timing: Arc::new(Mutex::new(VecDeque::new())),
            session: None,
        }
    }

    fn command_args(config: &VideoEncoderConfig) -> Vec<String> {
        let gop = config.keyframe_interval.max(1).to_string();
        let mut list = args(&["-f", "rawvideo", "-pix_fmt", "rgba", "-s"]);
        list.push(format!("{}x{}", config.width, config.height));
        list.push("-r".into());
        list.push(config.framerate.to_string());
        list.extend(args(&["-i", "-", "-c:v", "libx264", "-profile:v", "baseline"]));
        list.extend(args(&["-pix_fmt", "yuv420p", "-b:v"]));
        list.push(config.bitrate.to_string());
        // Fixed GOP: key frames land exactly every `keyframe_interval` frames.
        list.extend(args(&[
            "-g",
            gop.as_str(),
            "-keyint_min",
            gop.as_str(),
            "-sc_threshold",
            "0",
            "-bf",
            "0",
        ]));
        list.extend(args(&["-bsf:v", "h264_metadata=aud=insert", "-f", "h264", "-"]));
        list
    }
}

#[async_trait]
impl VideoEncodeCapability for FfmpegVideoEncoder {
    async fn is_config_supported(&self, config: &VideoEncoderConfig) -> bool {
        config.codec.starts_with("avc1")
            && config.width > 0
            && config.height > 0
            && config.width % 2 == 0
            && config.height % 2 == 0
            && config.bitrate > 0
            && config.framerate > 0.0
            && ffmpeg::is_available(&self.binary).await
    }

    fn configure(
        &mut self,
        config: &VideoEncoderConfig,
        output: OutputCallback<EncodedChunk>,
        error: ErrorCallback,
    ) -> SpliceResult<()> {
        let (process, stdout) = FfmpegProcess::spawn(&self.binary, &Self::command_args(config))?;
        self.frame_size = config.width as usize * config.height as usize * 4;
        let reader = tokio::spawn(read_access_units(stdout, self.timing.clone(), output, error));
        self.session = Some(Session { process, reader });
        debug!(
            width = config.width,
            height = config.height,
            bitrate = config.bitrate,
            "ffmpeg video encoder configured"
        );
        Ok(())
    }

    async fn encode(
        &mut self,
        frame: &FrameBuffer,
        timestamp_us: i64,
        duration_us: i64,
        // The GOP is fixed at configure time to the same interval.
        _keyframe: bool,
    ) -> SpliceResult<()> {
        if frame.data.len() != self.frame_size {
            return Err(SpliceError::Encode(format!(
                "frame is {}x{}, encoder expects {} bytes",
                frame.width, frame.height, self.frame_size
            )));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SpliceError::Encode("video encoder is not configured".into()))?;
        lock(&self.timing).push_back((timestamp_us, duration_us.max(1)));
        session.process.write(&frame.data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> SpliceResult<()> {
        match self.session.take() {
            Some(session) => session.finish("video encoder").await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> SpliceResult<()> {
        if let Some(session) = self.session.take() {
            session.kill().await;
        }
        lock(&self.timing).clear();
        Ok(())
    }
}

async fn read_access_units(
    mut stdout: ChildStdout,
    timing: Timing,
    mut output: OutputCallback<EncodedChunk>,
    mut error: ErrorCallback,
) {
    let mut splitter = AccessUnitSplitter::new();
    let mut emitter = AccessUnitEmitter::new(timing);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for unit in splitter.push(&buf[..n]) {
                    if let Some(chunk) = emitter.emit(unit) {
                        output(chunk);
                    }
                }
            }
            Err(e) => {
                error(SpliceError::Encode(format!("reading encoded video: {}", e)));
                return;
            }
        }
    }
    if let Some(chunk) = splitter.finish().and_then(|unit| emitter.emit(unit)) {
        output(chunk);
    }
}

/// Pairs access units with the timing of the frames that produced them
/// and attaches `avcC` to the first key unit.
struct AccessUnitEmitter {
    timing: Timing,
    config_sent: bool,
}

impl AccessUnitEmitter {
    fn new(timing: Timing) -> Self {
        Self {
            timing,
            config_sent: false,
        }
    }

    fn emit(&mut self, unit: AccessUnit) -> Option<EncodedChunk> {
        let Some((timestamp_us, duration_us)) = lock(&self.timing).pop_front() else {
            warn!("encoder produced an access unit with no matching frame");
            return None;
        };
        let key = unit.is_key();
        let decoder_config = if key && !self.config_sent {
            match unit.param_sets() {
                (Some(sps), Some(pps)) => {
                    let record: Option<Arc<[u8]>> =
                        splice_demux::build_avcc(sps, pps, 4).map(Arc::from);
                    self.config_sent = record.is_some();
                    record
                }
                _ => None,
            }
        } else {
            None
        };
        Some(EncodedChunk {
            kind: if key { ChunkKind::Key } else { ChunkKind::Delta },
            timestamp_us,
            duration_us,
            data: Arc::from(unit.to_sample()),
            decoder_config,
        })
    }
}

pub struct FfmpegAudioEncoder {
    binary: PathBuf,
    channels: usize,
    sample_rate: u32,
    first_timestamp: Arc<Mutex<Option<i64>>>,
    session: Option<Session>,
}

impl FfmpegAudioEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            channels: 0,
            sample_rate: 0,
            first_timestamp: Arc::new(Mutex::new(None)),
            session: None,
        }
    }

    fn command_args(config: &AudioEncoderConfig) -> Vec<String> {
        let mut list = args(&["-f", "f32le", "-ar"]);
        list.push(config.sample_rate.to_string());
        list.push("-ac".into());
        list.push(config.channels.to_string());
        list.extend(args(&["-i", "-", "-c:a", "aac", "-b:a"]));
        list.push(config.bitrate.to_string());
        list.extend(args(&["-f", "adts", "-"]));
        list
    }
}

#[async_trait]
impl AudioEncodeCapability for FfmpegAudioEncoder {
    async fn is_config_supported(&self, config: &AudioEncoderConfig) -> bool {
        config.codec.starts_with("mp4a")
            && adts::sampling_index(config.sample_rate).is_some()
            && (1..=7).contains(&config.channels)
            && config.bitrate > 0
            && ffmpeg::is_available(&self.binary).await
    }

    fn configure(
        &mut self,
        config: &AudioEncoderConfig,
        output: OutputCallback<EncodedChunk>,
        error: ErrorCallback,
    ) -> SpliceResult<()> {
        let (process, stdout) = FfmpegProcess::spawn(&self.binary, &Self::command_args(config))?;
        self.channels = config.channels as usize;
        self.sample_rate = config.sample_rate;
        let reader = tokio::spawn(read_adts(
            stdout,
            config.sample_rate,
            self.first_timestamp.clone(),
            output,
            error,
        ));
        self.session = Some(Session { process, reader });
        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            "ffmpeg audio encoder configured"
        );
        Ok(())
    }

    async fn encode(&mut self, data: AudioData) -> SpliceResult<()> {
        if data.planes.len() != self.channels || data.sample_rate != self.sample_rate {
            return Err(SpliceError::Encode(format!(
                "audio chunk is {} ch @ {} Hz, encoder expects {} ch @ {} Hz",
                data.planes.len(),
                data.sample_rate,
                self.channels,
                self.sample_rate
            )));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SpliceError::Encode("audio encoder is not configured".into()))?;
        {
            let mut first = self
                .first_timestamp
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            first.get_or_insert(data.timestamp_us);
        }
        let frames = data.frames();
        let mut bytes = Vec::with_capacity(frames * self.channels * 4);
        for i in 0..frames {
            for plane in &data.planes {
                let sample = plane.get(i).copied().unwrap_or(0.0);
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        session.process.write(&bytes).await?;
        Ok(())
    }

    async fn flush(&mut self) -> SpliceResult<()> {
        match self.session.take() {
            Some(session) => session.finish("audio encoder").await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> SpliceResult<()> {
        if let Some(session) = self.session.take() {
            session.kill().await;
        }
        Ok(())
    }
}

async fn read_adts(
    mut stdout: ChildStdout,
    sample_rate: u32,
    first_timestamp: Arc<Mutex<Option<i64>>>,
    mut output: OutputCallback<EncodedChunk>,
    mut error: ErrorCallback,
) {
    let mut parser = AdtsParser::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut index: i64 = 0;
    let frame_us = |n: i64| n * SAMPLES_PER_FRAME as i64 * 1_000_000 / sample_rate.max(1) as i64;
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error(SpliceError::Encode(format!("reading encoded audio: {}", e)));
                return;
            }
        };
        let frames = match parser.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                error(e.into());
                return;
            }
        };
        let origin = first_timestamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .unwrap_or(0);
        for frame in frames {
            let timestamp_us = origin + frame_us(index);
            let duration_us = (frame_us(index + 1) - frame_us(index)).max(1);
            output(EncodedChunk {
                kind: ChunkKind::Key,
                timestamp_us,
                duration_us,
                data: Arc::from(frame.payload.as_slice()),
                decoder_config: if index == 0 {
                    Some(Arc::from(&frame.audio_specific_config()[..]))
                } else {
                    None
                },
            });
            index += 1;
        }
    }
    if parser.pending() > 0 {
        warn!(bytes = parser.pending(), "trailing partial ADTS frame dropped");
    }
}
