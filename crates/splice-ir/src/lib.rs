//! # splice-ir
//!
//! The timeline model for one export job: tracks of positioned items that
//! reference immutable contents, plus the embedded video assets those
//! contents point at. Pure data, no I/O.

pub mod asset;
pub mod content;
pub mod descriptor;
pub mod effect;
pub mod project;
pub mod track;
pub mod validate;

pub use asset::{Arena, AssetHandle, FontAsset, Handle, VideoAsset};
pub use content::{Content, ContentHandle, ContentKind, TextStyle};
pub use descriptor::ProjectDescriptor;
pub use effect::{Effect, EffectKind, EffectParams, EffectSelector};
pub use project::{Project, ProjectSettings};
pub use track::{Track, TrackItem};
pub use validate::validate_descriptor;
