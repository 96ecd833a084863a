//! # splice-audio
//!
//! Mixes every audible clip on the timeline into a single planar PCM
//! buffer at the highest sample rate and channel count among the inputs.

pub mod mix;

pub use mix::{mix, AudioClip};
