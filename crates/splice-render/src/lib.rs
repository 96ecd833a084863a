//! # splice-render
//!
//! Everything between a demuxed asset and a composed output frame: the
//! forward-only decode cursor, the compositor and its effects, text
//! rasterization and image loading.

pub mod compositor;
pub mod decode_cursor;
pub mod effects;
pub mod ffmpeg_decoder;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod image_loader;
pub mod text;

pub use compositor::{Compositor, Rect};
pub use decode_cursor::{CursorOptions, DecodeCursor};
pub use ffmpeg_decoder::FfmpegVideoDecoder;
pub use text::{TextCache, TextRenderer};
