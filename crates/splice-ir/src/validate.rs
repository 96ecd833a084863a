use std::collections::{HashMap, HashSet};

use splice_core::{Color, SpliceError};

use crate::content::ContentKind;
use crate::descriptor::{ContentDescriptor, ProjectDescriptor};

/// Validate a project descriptor for structural correctness.
///
/// Every dangling reference and invariant violation is reported up front,
/// so rendering never discovers a broken project mid-job.
pub fn validate_descriptor(desc: &ProjectDescriptor) -> Result<(), Vec<SpliceError>> {
    let mut errors = Vec::new();
    let mut fail = |msg: String| errors.push(SpliceError::Validation(msg));

    if desc.width == 0 || desc.height == 0 {
        fail("project resolution must be non-zero".into());
    }
    if !(desc.fps.is_finite() && desc.fps > 0.0) {
        fail("project fps must be positive".into());
    }

    let mut asset_ids = HashSet::new();
    for asset in &desc.assets {
        if !asset_ids.insert(asset.id.as_str()) {
            fail(format!("duplicate asset id: {}", asset.id));
        }
        if asset.data.is_empty() {
            fail(format!("asset '{}' has no container bytes", asset.id));
        }
    }

    let mut content_kinds: HashMap<&str, ContentKind> = HashMap::new();
    for content in &desc.contents {
        if content_kinds.insert(content.id(), content.kind()).is_some() {
            fail(format!("duplicate content id: {}", content.id()));
        }
        match content {
            ContentDescriptor::Image {
                id,
                width,
                height,
                pixels,
            } => {
                let expected = (*width as usize) * (*height as usize) * 4;
                if *width == 0 || *height == 0 {
                    fail(format!("image '{}' has zero size", id));
                } else if pixels.len() != expected {
                    fail(format!(
                        "image '{}' needs {} RGBA bytes, got {}",
                        id,
                        expected,
                        pixels.len()
                    ));
                }
            }
            ContentDescriptor::Audio { id, audio } => {
                validate_pcm(id, audio, &mut fail);
            }
            ContentDescriptor::Text { id, style, .. } => {
                if !(style.font_size.is_finite() && style.font_size > 0.0) {
                    fail(format!("text '{}' font size must be positive", id));
                }
                if let Err(e) = Color::from_hex(&style.color) {
                    fail(format!("text '{}': {}", id, e));
                }
            }
            ContentDescriptor::Video {
                id,
                asset_id,
                width,
                height,
                audio,
            } => {
                if !asset_ids.contains(asset_id.as_str()) {
                    fail(format!(
                        "video '{}' references unknown asset '{}'",
                        id, asset_id
                    ));
                }
                if *width == 0 || *height == 0 {
                    fail(format!("video '{}' has zero size", id));
                }
                if let Some(audio) = audio {
                    validate_pcm(id, audio, &mut fail);
                }
            }
        }
    }

    let mut track_ids = HashSet::new();
    let mut item_ids = HashSet::new();
    for track in &desc.tracks {
        if !track_ids.insert(track.id.as_str()) {
            fail(format!("duplicate track id: {}", track.id));
        }
        for item in &track.items {
            if !item_ids.insert(item.id.as_str()) {
                fail(format!("duplicate item id: {}", item.id));
            }
            match content_kinds.get(item.content_id.as_str()) {
                None => fail(format!(
                    "item '{}' references unknown content '{}'",
                    item.id, item.content_id
                )),
                Some(kind) if *kind != track.kind => fail(format!(
                    "item '{}' holds {} content on {} track '{}'",
                    item.id, kind, track.kind, track.id
                )),
                Some(_) => {}
            }
            if !(item.start.is_finite() && item.start >= 0.0) {
                fail(format!("item '{}' start must be >= 0", item.id));
            }
            if !(item.duration.is_finite() && item.duration > 0.0) {
                fail(format!("item '{}' duration must be positive", item.id));
            }
            if !(item.offset.is_finite() && item.offset >= 0.0) {
                fail(format!("item '{}' offset must be >= 0", item.id));
            }
            if !(item.scale.is_finite() && item.scale > 0.0) {
                fail(format!("item '{}' scale must be positive", item.id));
            }
            if !(item.x.is_finite() && item.y.is_finite()) {
                fail(format!("item '{}' position must be finite", item.id));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_pcm(id: &str, pcm: &splice_core::PcmBuffer, fail: &mut impl FnMut(String)) {
    if pcm.sample_rate == 0 {
        fail(format!("audio of '{}' has zero sample rate", id));
    }
    if pcm.channels.is_empty() {
        fail(format!("audio of '{}' has no channels", id));
    }
    let frames = pcm.frames();
    if pcm.channels.iter().any(|c| c.len() != frames) {
        fail(format!("audio of '{}' has channels of unequal length", id));
    }
}
