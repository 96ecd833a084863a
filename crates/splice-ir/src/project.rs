use std::collections::HashSet;
use std::sync::Arc;

use splice_core::{time, Color, FrameBuffer, PcmBuffer, SpliceError, SpliceResult};
use tracing::debug;

use crate::asset::{Arena, AssetHandle, FontAsset, VideoAsset};
use crate::content::{Content, ContentHandle, ContentKind, TextStyle};
use crate::descriptor::{ContentDescriptor, ProjectDescriptor};
use crate::effect::{Effect, EffectKind};
use crate::track::{Track, TrackItem};
use crate::validate::validate_descriptor;

/// Output settings of one export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Immutable snapshot of a timeline handed to one export job.
#[derive(Debug, Clone)]
pub struct Project {
    pub settings: ProjectSettings,
    /// Draw order: track order, then item order.
    pub tracks: Vec<Track>,
    pub contents: Arena<Content>,
    pub assets: Arena<VideoAsset>,
    pub fonts: Vec<FontAsset>,
}

impl Project {
    /// Parse and validate a JSON project descriptor.
    pub fn load(json: &str) -> SpliceResult<Self> {
        let desc: ProjectDescriptor = serde_json::from_str(json)?;
        Self::from_descriptor(desc)
    }

    /// Validate a descriptor and resolve every id reference to a handle.
    pub fn from_descriptor(desc: ProjectDescriptor) -> SpliceResult<Self> {
        validate_descriptor(&desc).map_err(SpliceError::from_many)?;

        let mut assets = Arena::new();
        for asset in desc.assets {
            let entry = VideoAsset {
                data: Arc::from(asset.data),
                param_set: asset.param_set.map(Arc::from),
            };
            if assets.insert(asset.id.clone(), entry).is_none() {
                return Err(SpliceError::asset("duplicate asset", asset.id));
            }
        }

        let mut contents = Arena::new();
        for content in desc.contents {
            let id = content.id().to_string();
            let resolved = match content {
                ContentDescriptor::Image {
                    width,
                    height,
                    pixels,
                    ..
                } => Content::Image {
                    bitmap: Arc::new(FrameBuffer::from_rgba(width, height, pixels)?),
                },
                ContentDescriptor::Audio { audio, .. } => Content::Audio {
                    buffer: Arc::new(audio),
                },
                ContentDescriptor::Text { text, style, .. } => Content::Text {
                    text,
                    style: TextStyle {
                        font_family: style.font_family,
                        font_size: style.font_size,
                        color: Color::from_hex(&style.color)
                            .map_err(|e| SpliceError::asset(e.to_string(), id.clone()))?,
                    },
                },
                ContentDescriptor::Video {
                    asset_id,
                    width,
                    height,
                    audio,
                    ..
                } => Content::Video {
                    asset: assets
                        .resolve(&asset_id)
                        .ok_or_else(|| SpliceError::asset("unknown asset", asset_id.clone()))?,
                    width,
                    height,
                    audio: audio.map(Arc::new),
                },
            };
            if contents.insert(id.clone(), resolved).is_none() {
                return Err(SpliceError::asset("duplicate content", id));
            }
        }

        let mut tracks = Vec::with_capacity(desc.tracks.len());
        for track in desc.tracks {
            let mut items = Vec::with_capacity(track.items.len());
            for item in track.items {
                let content = contents.resolve(&item.content_id).ok_or_else(|| {
                    SpliceError::asset("unknown content", item.content_id.clone())
                })?;
                items.push(TrackItem {
                    id: item.id,
                    content,
                    start: item.start,
                    duration: item.duration,
                    offset: item.offset,
                    x: item.x,
                    y: item.y,
                    scale: item.scale,
                    effects: item
                        .effects
                        .iter()
                        .map(|e| Effect::new(EffectKind::from_tag(&e.kind), e.intensity, e.range))
                        .collect(),
                });
            }
            tracks.push(Track {
                id: track.id,
                name: track.name,
                kind: track.kind,
                items,
            });
        }

        let fonts = desc
            .fonts
            .into_iter()
            .map(|f| FontAsset {
                family: f.family,
                data: Arc::from(f.data),
            })
            .collect();

        let project = Self {
            settings: ProjectSettings {
                width: desc.width,
                height: desc.height,
                fps: desc.fps,
            },
            tracks,
            contents,
            assets,
            fonts,
        };
        debug!(
            tracks = project.tracks.len(),
            contents = project.contents.len(),
            assets = project.assets.len(),
            duration = project.total_duration(),
            "project loaded"
        );
        Ok(project)
    }

    /// Latest item end across all tracks, in seconds.
    pub fn total_duration(&self) -> f64 {
        self.tracks.iter().map(Track::end).fold(0.0, f64::max)
    }

    /// Frames to render; never less than one.
    pub fn frame_count(&self) -> u64 {
        time::frame_count(self.total_duration(), self.settings.fps)
    }

    pub fn content(&self, handle: ContentHandle) -> &Content {
        self.contents.get(handle)
    }

    pub fn asset(&self, handle: AssetHandle) -> &VideoAsset {
        self.assets.get(handle)
    }

    /// Assets placed on the timeline, in first-use order.
    pub fn referenced_assets(&self) -> Vec<AssetHandle> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for track in &self.tracks {
            for item in &track.items {
                if let Content::Video { asset, .. } = self.content(item.content) {
                    if seen.insert(*asset) {
                        out.push(*asset);
                    }
                }
            }
        }
        out
    }

    /// Visual items covering `time`, in draw order.
    pub fn visual_items_at(&self, time: f64) -> impl Iterator<Item = &TrackItem> {
        self.tracks
            .iter()
            .filter(|track| track.kind.is_visual())
            .flat_map(move |track| track.items_at(time))
    }

    /// Every item that contributes PCM to the mix, with its buffer.
    pub fn audio_items(&self) -> impl Iterator<Item = (&TrackItem, &Arc<PcmBuffer>)> {
        self.tracks
            .iter()
            .filter(|track| matches!(track.kind, ContentKind::Audio | ContentKind::Video))
            .flat_map(|track| track.items.iter())
            .filter_map(|item| self.content(item.content).audio().map(|pcm| (item, pcm)))
    }

    pub fn font(&self, family: &str) -> Option<&FontAsset> {
        self.fonts
            .iter()
            .find(|f| f.family.eq_ignore_ascii_case(family))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r##"{
        "width": 64, "height": 36, "fps": 30,
        "tracks": [
            {"id": "v", "kind": "video", "items": [
                {"id": "v1", "contentId": "clip", "start": 0, "duration": 1.5},
                {"id": "v2", "contentId": "clip", "start": 1.5, "duration": 0.5, "offset": 3}
            ]},
            {"id": "a", "kind": "audio", "items": [
                {"id": "a1", "contentId": "music", "start": 0.25, "duration": 1}
            ]},
            {"id": "t", "kind": "text", "items": [
                {"id": "t1", "contentId": "title", "start": 0, "duration": 1,
                 "effects": [{"type": "sepia"}, {"type": "glow", "intensity": 0.5}]}
            ]}
        ],
        "contents": [
            {"kind": "video", "id": "clip", "assetId": "a1", "width": 32, "height": 18,
             "audio": {"sampleRate": 48000, "channels": [[0.0, 0.0]]}},
            {"kind": "audio", "id": "music", "audio": {"sampleRate": 44100, "channels": [[0.5]]}},
            {"kind": "text", "id": "title", "text": "Hi", "style": {"color": "#FF0000"}}
        ],
        "assets": [{"id": "a1", "data": [1, 2, 3]}]
    }"##;

    #[test]
    fn test_load_resolves_handles() {
        let project = Project::load(PROJECT).unwrap();
        assert_eq!(project.tracks.len(), 3);
        assert_eq!(project.total_duration(), 2.0);
        assert_eq!(project.frame_count(), 60);
        assert_eq!(project.referenced_assets().len(), 1);

        let title = &project.tracks[2].items[0];
        match project.content(title.content) {
            Content::Text { style, .. } => assert_eq!(style.color, Color::RED),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(title.effects[0].kind, EffectKind::Unknown("sepia".into()));
    }

    #[test]
    fn test_visual_items_skip_audio_tracks() {
        let project = Project::load(PROJECT).unwrap();
        let ids: Vec<&str> = project
            .visual_items_at(0.5)
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["v1", "t1"]);
        let later: Vec<&str> = project
            .visual_items_at(1.5)
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(later, vec!["v2"]);
    }

    #[test]
    fn test_audio_items_include_video_audio() {
        let project = Project::load(PROJECT).unwrap();
        let ids: Vec<&str> = project.audio_items().map(|(i, _)| i.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2", "a1"]);
    }

    #[test]
    fn test_empty_project_renders_one_frame() {
        let project = Project::load(r#"{"width": 16, "height": 16, "fps": 24}"#).unwrap();
        assert_eq!(project.total_duration(), 0.0);
        assert_eq!(project.frame_count(), 1);
        assert!(project.referenced_assets().is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_descriptor() {
        let err = Project::load(r#"{"width": 0, "height": 16, "fps": 24}"#).unwrap_err();
        assert!(matches!(err, SpliceError::Validation(_)));
    }
}
