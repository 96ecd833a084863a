use std::path::PathBuf;

use splice_core::codec::{
    AudioEncodeCapability, CodecFactory, VideoDecodeCapability, VideoEncodeCapability,
};
use splice_core::config::FfmpegConfig;
use splice_core::SpliceResult;
use splice_encode::{FfmpegAudioEncoder, FfmpegVideoEncoder};
use splice_render::FfmpegVideoDecoder;

/// Production codecs: one ffmpeg subprocess per decoder or encoder.
#[derive(Debug, Clone)]
pub struct FfmpegCodecs {
    binary: PathBuf,
}

impl FfmpegCodecs {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &FfmpegConfig) -> Self {
        Self::new(config.binary.clone())
    }
}

impl CodecFactory for FfmpegCodecs {
    fn video_decoder(&self) -> SpliceResult<Box<dyn VideoDecodeCapability>> {
        Ok(Box::new(FfmpegVideoDecoder::new(self.binary.clone())))
    }

    fn video_encoder(&self) -> SpliceResult<Box<dyn VideoEncodeCapability>> {
        Ok(Box::new(FfmpegVideoEncoder::new(self.binary.clone())))
    }

    fn audio_encoder(&self) -> SpliceResult<Box<dyn AudioEncodeCapability>> {
        Ok(Box::new(FfmpegAudioEncoder::new(self.binary.clone())))
    }
}
