use serde::{Deserialize, Serialize};
use std::sync::Arc;

use splice_core::{Color, FrameBuffer, PcmBuffer};

use crate::asset::{AssetHandle, Handle};

/// The kind of content a track holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Audio,
    Text,
    Video,
}

impl ContentKind {
    /// Whether content of this kind is drawn by the compositor.
    pub fn is_visual(&self) -> bool {
        !matches!(self, ContentKind::Audio)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Image => write!(f, "image"),
            ContentKind::Audio => write!(f, "audio"),
            ContentKind::Text => write!(f, "text"),
            ContentKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f32,
    pub color: Color,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".to_string(),
            font_size: 48.0,
            color: Color::WHITE,
        }
    }
}

/// Immutable media referenced by track items. Many items may share one
/// content; nothing mutates it after load.
#[derive(Debug, Clone)]
pub enum Content {
    Image {
        bitmap: Arc<FrameBuffer>,
    },
    Audio {
        buffer: Arc<PcmBuffer>,
    },
    /// Rasterized lazily on first use.
    Text {
        text: String,
        style: TextStyle,
    },
    Video {
        asset: AssetHandle,
        width: u32,
        height: u32,
        audio: Option<Arc<PcmBuffer>>,
    },
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Image { .. } => ContentKind::Image,
            Content::Audio { .. } => ContentKind::Audio,
            Content::Text { .. } => ContentKind::Text,
            Content::Video { .. } => ContentKind::Video,
        }
    }

    /// Natural pixel size, where it is known without rendering.
    pub fn natural_size(&self) -> Option<(u32, u32)> {
        match self {
            Content::Image { bitmap } => Some((bitmap.width, bitmap.height)),
            Content::Video { width, height, .. } => Some((*width, *height)),
            Content::Audio { .. } | Content::Text { .. } => None,
        }
    }

    /// The PCM this content contributes to the mix, if any.
    pub fn audio(&self) -> Option<&Arc<PcmBuffer>> {
        match self {
            Content::Audio { buffer } => Some(buffer),
            Content::Video { audio, .. } => audio.as_ref(),
            _ => None,
        }
    }
}

pub type ContentHandle = Handle<Content>;
