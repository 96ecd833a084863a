//! # splice-core
//!
//! Core types and primitives for the Splice export engine.
//! Everything shared across the pipeline crates lives here: frame buffers,
//! colors, time arithmetic, PCM buffers, configuration, the per-job
//! context, the codec capability traits, and the error type.

pub mod audio;
pub mod codec;
pub mod color;
pub mod config;
pub mod context;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod supervise;
pub mod time;

pub use audio::PcmBuffer;
pub use color::Color;
pub use config::ExportConfig;
pub use context::JobContext;
pub use error::{SpliceError, SpliceResult};
pub use frame::FrameBuffer;
