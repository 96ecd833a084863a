//! # splice-encode
//!
//! The output half of an export: encode capabilities backed by FFmpeg and
//! the progressive MP4 muxer their chunks are written into.

pub mod adts;
pub mod annexb;
pub mod boxes;
pub mod ffmpeg;
pub mod muxer;

pub use ffmpeg::{FfmpegAudioEncoder, FfmpegVideoEncoder};
pub use muxer::{AudioTrackParams, Mp4Muxer, VideoTrackParams, VIDEO_TIMESCALE};
