//! Wire form of a project as handed over by the editor.
//!
//! Ids are free-form strings here; [`Project::from_descriptor`] validates
//! them and swaps every reference for an arena handle.
//!
//! [`Project::from_descriptor`]: crate::Project::from_descriptor

use serde::{Deserialize, Serialize};

use splice_core::PcmBuffer;

use crate::content::ContentKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Duration as the editor last computed it. Advisory: the engine derives
    /// the real duration from item extents.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
    #[serde(default)]
    pub contents: Vec<ContentDescriptor>,
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
    #[serde(default)]
    pub fonts: Vec<FontDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub items: Vec<ItemDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDescriptor {
    pub id: String,
    pub content_id: String,
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub effects: Vec<EffectDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default)]
    pub range: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentDescriptor {
    /// Straight-alpha RGBA8 pixels, row-major.
    #[serde(rename_all = "camelCase")]
    Image {
        id: String,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    Audio { id: String, audio: PcmBuffer },
    #[serde(rename_all = "camelCase")]
    Text {
        id: String,
        text: String,
        #[serde(default)]
        style: TextStyleDescriptor,
    },
    #[serde(rename_all = "camelCase")]
    Video {
        id: String,
        asset_id: String,
        width: u32,
        height: u32,
        #[serde(default)]
        audio: Option<PcmBuffer>,
    },
}

impl ContentDescriptor {
    pub fn id(&self) -> &str {
        match self {
            ContentDescriptor::Image { id, .. }
            | ContentDescriptor::Audio { id, .. }
            | ContentDescriptor::Text { id, .. }
            | ContentDescriptor::Video { id, .. } => id,
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentDescriptor::Image { .. } => ContentKind::Image,
            ContentDescriptor::Audio { .. } => ContentKind::Audio,
            ContentDescriptor::Text { .. } => ContentKind::Text,
            ContentDescriptor::Video { .. } => ContentKind::Video,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyleDescriptor {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// `#RRGGBB` or `#RRGGBBAA`.
    #[serde(default = "default_text_color")]
    pub color: String,
}

impl Default for TextStyleDescriptor {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_size: default_font_size(),
            color: default_text_color(),
        }
    }
}

/// An embedded video container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub id: String,
    pub data: Vec<u8>,
    /// Externally supplied decoder configuration record.
    #[serde(default)]
    pub param_set: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontDescriptor {
    pub family: String,
    pub data: Vec<u8>,
}

fn default_scale() -> f64 {
    1.0
}

fn default_intensity() -> f32 {
    1.0
}

fn default_font_family() -> String {
    "sans-serif".to_string()
}

fn default_font_size() -> f32 {
    48.0
}

fn default_text_color() -> String {
    "#FFFFFF".to_string()
}
