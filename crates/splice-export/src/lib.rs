//! # splice-export
//!
//! Runs export jobs: the driver walks a project through demux, render,
//! video flush, audio encode and mux, and the worker exposes it over the
//! `start`/`cancel` message protocol with progress and terminal events.

pub mod driver;
pub mod ffmpeg_codecs;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod state;
pub mod worker;

pub use driver::ExportDriver;
pub use ffmpeg_codecs::FfmpegCodecs;
pub use progress::ProgressReporter;
pub use protocol::{Event, Request};
pub use state::{ExportState, StateMachine};
pub use worker::Worker;
