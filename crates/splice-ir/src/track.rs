use crate::content::{ContentHandle, ContentKind};
use crate::effect::Effect;

/// One placement of a content on the timeline. Times are in seconds.
#[derive(Debug, Clone)]
pub struct TrackItem {
    pub id: String,
    pub content: ContentHandle,
    /// Timeline start, >= 0.
    pub start: f64,
    /// Play duration, > 0.
    pub duration: f64,
    /// In-point within the source for video/audio.
    pub offset: f64,
    pub x: f64,
    pub y: f64,
    /// Uniform scale applied to the content's natural size.
    pub scale: f64,
    pub effects: Vec<Effect>,
}

impl TrackItem {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Half-open `[start, start + duration)` coverage test.
    pub fn covers(&self, time: f64) -> bool {
        time >= self.start && time < self.end()
    }

    /// Map a timeline time onto the source's own clock.
    pub fn source_time(&self, time: f64) -> f64 {
        time - self.start + self.offset
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub kind: ContentKind,
    /// Draw order within the track.
    pub items: Vec<TrackItem>,
}

impl Track {
    /// Latest item end on this track, 0 when empty.
    pub fn end(&self) -> f64 {
        self.items.iter().map(TrackItem::end).fold(0.0, f64::max)
    }

    pub fn items_at(&self, time: f64) -> impl Iterator<Item = &TrackItem> {
        self.items.iter().filter(move |item| item.covers(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Arena;
    use crate::content::Content;
    use splice_core::FrameBuffer;
    use std::sync::Arc;

    fn item(content: ContentHandle, start: f64, duration: f64) -> TrackItem {
        TrackItem {
            id: format!("i{}", start),
            content,
            start,
            duration,
            offset: 0.5,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            effects: Vec::new(),
        }
    }

    fn handle() -> ContentHandle {
        let mut arena = Arena::new();
        arena
            .insert(
                "c",
                Content::Image {
                    bitmap: Arc::new(FrameBuffer::new(1, 1)),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_covers_is_half_open() {
        let it = item(handle(), 1.0, 2.0);
        assert!(!it.covers(0.999));
        assert!(it.covers(1.0));
        assert!(it.covers(2.999));
        assert!(!it.covers(3.0));
        assert!((it.source_time(1.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_track_end_and_items_at() {
        let h = handle();
        let track = Track {
            id: "t".into(),
            name: "Images".into(),
            kind: ContentKind::Image,
            items: vec![item(h, 0.0, 1.0), item(h, 0.5, 4.0)],
        };
        assert_eq!(track.end(), 4.5);
        assert_eq!(track.items_at(0.75).count(), 2);
        assert_eq!(track.items_at(2.0).count(), 1);
    }
}
