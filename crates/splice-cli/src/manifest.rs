//! On-disk project manifests.
//!
//! A manifest is a project descriptor whose heavy payloads are file paths:
//! images, video containers, parameter sets and fonts are read from disk
//! (relative to the manifest) and inlined before the export starts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use splice_core::PcmBuffer;
use splice_ir::descriptor::{
    AssetDescriptor, ContentDescriptor, FontDescriptor, TextStyleDescriptor, TrackDescriptor,
};
use splice_ir::ProjectDescriptor;
use splice_render::image_loader;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
    #[serde(default)]
    pub contents: Vec<ContentManifest>,
    #[serde(default)]
    pub assets: Vec<AssetManifest>,
    #[serde(default)]
    pub fonts: Vec<FontManifest>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentManifest {
    #[serde(rename_all = "camelCase")]
    Image {
        id: String,
        path: PathBuf,
        /// Shrink to fit the output frame, keeping aspect.
        #[serde(default)]
        fit: bool,
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub param_set_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontManifest {
    pub family: String,
    pub path: PathBuf,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        serde_json::from_str(&source)
            .with_context(|| format!("failed to parse manifest: {}", path.display()))
    }

    /// Read every referenced file and produce the wire descriptor.
    pub fn resolve(self, base: &Path) -> Result<ProjectDescriptor> {
        let (width, height) = (self.width, self.height);
        let contents = self
            .contents
            .into_iter()
            .map(|content| resolve_content(content, base, width, height))
            .collect::<Result<Vec<_>>>()?;

        let assets = self
            .assets
            .into_iter()
            .map(|asset| {
                let data = read(base, &asset.path)?;
                let param_set = asset
                    .param_set_path
                    .as_deref()
                    .map(|p| read(base, p))
                    .transpose()?;
                Ok(AssetDescriptor {
                    id: asset.id,
                    data,
                    param_set,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let fonts = self
            .fonts
            .into_iter()
            .map(|font| {
                Ok(FontDescriptor {
                    data: read(base, &font.path)?,
                    family: font.family,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ProjectDescriptor {
            width,
            height,
            fps: self.fps,
            duration: self.duration,
            tracks: self.tracks,
            contents,
            assets,
            fonts,
        })
    }
}

fn resolve_content(
    content: ContentManifest,
    base: &Path,
    width: u32,
    height: u32,
) -> Result<ContentDescriptor> {
    Ok(match content {
        ContentManifest::Image { id, path, fit } => {
            let full = base.join(&path);
            let mut bitmap = image_loader::load_image(&full)
                .with_context(|| format!("image content '{}'", id))?;
            if fit {
                bitmap = image_loader::resize_to_fit(&bitmap, width, height);
            }
            ContentDescriptor::Image {
                id,
                width: bitmap.width,
                height: bitmap.height,
                pixels: bitmap.data,
            }
        }
        ContentManifest::Audio { id, audio } => ContentDescriptor::Audio { id, audio },
        ContentManifest::Text { id, text, style } => ContentDescriptor::Text { id, text, style },
        ContentManifest::Video {
            id,
            asset_id,
            width,
            height,
            audio,
        } => ContentDescriptor::Video {
            id,
            asset_id,
            width,
            height,
            audio,
        },
    })
}

fn read(base: &Path, path: &Path) -> Result<Vec<u8>> {
    let full = base.join(path);
    fs::read(&full).with_context(|| format!("failed to read {}", full.display()))
}
