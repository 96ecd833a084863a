//! Codec capability seams.
//!
//! Decoders and encoders report results through output/error callbacks
//! registered at configure time, the way platform codec APIs do. Callers
//! that need request/response semantics wrap the callbacks in channels
//! (see the decode cursor and the export driver's encode sessions).

use std::sync::Arc;

use async_trait::async_trait;

use crate::{FrameBuffer, SpliceError, SpliceResult};

/// Key (sync) or delta chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// One coded access unit travelling into a decoder or out of an encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub kind: ChunkKind,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    /// Duration in microseconds, always >= 1.
    pub duration_us: i64,
    pub data: Arc<[u8]>,
    /// Decoder configuration record emitted alongside the first key chunk
    /// (`avcC` for video, AudioSpecificConfig for audio).
    pub decoder_config: Option<Arc<[u8]>>,
}

impl EncodedChunk {
    pub fn is_key(&self) -> bool {
        self.kind == ChunkKind::Key
    }
}

/// A decoded picture with its presentation time.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub image: FrameBuffer,
}

/// A slice of planar PCM handed to an audio encoder.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub sample_rate: u32,
    pub timestamp_us: i64,
    /// One entry per channel, each `frames` long.
    pub planes: Vec<Vec<f32>>,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Decoder configuration record (`avcC`), if one was found.
    pub description: Option<Arc<[u8]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub framerate: f64,
    pub keyframe_interval: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
}

pub type OutputCallback<T> = Box<dyn FnMut(T) + Send + Sync>;
pub type ErrorCallback = Box<dyn FnMut(SpliceError) + Send + Sync>;

#[async_trait]
pub trait VideoDecodeCapability: Send + Sync {
    /// Checked before `configure`; an unsupported config is never
    /// discovered mid-stream.
    async fn is_config_supported(&self, config: &VideoDecoderConfig) -> bool;

    fn configure(
        &mut self,
        config: &VideoDecoderConfig,
        output: OutputCallback<DecodedFrame>,
        error: ErrorCallback,
    ) -> SpliceResult<()>;

    /// Queue one chunk. Frames arrive later through the output callback.
    async fn decode(&mut self, chunk: EncodedChunk) -> SpliceResult<()>;

    /// Resolves after every queued chunk has produced its output.
    async fn flush(&mut self) -> SpliceResult<()>;

    /// Chunks accepted but not yet turned into frames, as far as the
    /// backend can tell.
    fn decode_queue_size(&self) -> usize {
        0
    }

    async fn close(&mut self) -> SpliceResult<()>;
}

#[async_trait]
pub trait VideoEncodeCapability: Send + Sync {
    async fn is_config_supported(&self, config: &VideoEncoderConfig) -> bool;

    fn configure(
        &mut self,
        config: &VideoEncoderConfig,
        output: OutputCallback<EncodedChunk>,
        error: ErrorCallback,
    ) -> SpliceResult<()>;

    async fn encode(
        &mut self,
        frame: &FrameBuffer,
        timestamp_us: i64,
        duration_us: i64,
        keyframe: bool,
    ) -> SpliceResult<()>;

    async fn flush(&mut self) -> SpliceResult<()>;

    async fn close(&mut self) -> SpliceResult<()>;
}

#[async_trait]
pub trait AudioEncodeCapability: Send + Sync {
    async fn is_config_supported(&self, config: &AudioEncoderConfig) -> bool;

    fn configure(
        &mut self,
        config: &AudioEncoderConfig,
        output: OutputCallback<EncodedChunk>,
        error: ErrorCallback,
    ) -> SpliceResult<()>;

    async fn encode(&mut self, data: AudioData) -> SpliceResult<()>;

    async fn flush(&mut self) -> SpliceResult<()>;

    async fn close(&mut self) -> SpliceResult<()>;
}

/// Builds fresh codec instances for each job.
pub trait CodecFactory: Send + Sync {
    fn video_decoder(&self) -> SpliceResult<Box<dyn VideoDecodeCapability>>;
    fn video_encoder(&self) -> SpliceResult<Box<dyn VideoEncodeCapability>>;
    fn audio_encoder(&self) -> SpliceResult<Box<dyn AudioEncodeCapability>>;
}
