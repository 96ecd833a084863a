use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Color, SpliceError, SpliceResult};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Codec string handed to the encode capability (H.264 baseline).
    pub codec: String,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// A key frame is requested every this many frames.
    pub keyframe_interval: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: "avc1.42001f".to_string(),
            bitrate: 5_000_000,
            keyframe_interval: 60,
            max_width: 4096,
            max_height: 2304,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Codec string handed to the encode capability (AAC-LC).
    pub codec: String,
    pub bitrate: u32,
    /// PCM frames per encode call.
    pub chunk_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "mp4a.40.2".to_string(),
            bitrate: 128_000,
            chunk_frames: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Decode requests allowed in flight before the cursor waits.
    pub max_outstanding: usize,
    pub stall_timeout_ms: u64,
    /// Slack when comparing a produced frame against a requested time.
    pub epsilon_us: i64,
    /// How many leading samples to scan when rebuilding a parameter set.
    pub paramset_scan_samples: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 8,
            stall_timeout_ms: 2000,
            epsilon_us: 1000,
            paramset_scan_samples: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Opaque background the compositor clears to.
    pub background: String,
    /// Seconds of output between progress reports.
    pub progress_interval_secs: f64,
    /// Prefer the wgpu surface when built with the `gpu` feature.
    pub gpu: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            background: "#000000".to_string(),
            progress_interval_secs: 0.5,
            gpu: false,
        }
    }
}

impl RenderConfig {
    pub fn background_color(&self) -> SpliceResult<Color> {
        Color::from_hex(&self.background)
            .map(Color::opaque)
            .map_err(|e| SpliceError::Config(format!("render.background: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub binary: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TextConfig {
    /// Font used when a text item names a family the project doesn't carry.
    pub default_font: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct JobConfig {
    /// Emit per-frame `debug` diagnostics.
    pub debug: bool,
}

/// Settings for one export engine instance, loadable from `splice.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExportConfig {
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub job: JobConfig,
}

impl ExportConfig {
    pub fn load_from_file(path: &Path) -> SpliceResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ExportConfig = toml::from_str(&contents)
            .map_err(|e| SpliceError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> SpliceResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SpliceError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> SpliceResult<()> {
        let mut problems = Vec::new();
        if self.video.bitrate == 0 {
            problems.push("video.bitrate must be positive");
        }
        if self.video.keyframe_interval == 0 {
            problems.push("video.keyframe_interval must be positive");
        }
        if self.audio.bitrate == 0 {
            problems.push("audio.bitrate must be positive");
        }
        if self.audio.chunk_frames == 0 {
            problems.push("audio.chunk_frames must be positive");
        }
        if self.decode.max_outstanding == 0 {
            problems.push("decode.max_outstanding must be positive");
        }
        if self.decode.stall_timeout_ms == 0 {
            problems.push("decode.stall_timeout_ms must be positive");
        }
        if self.decode.paramset_scan_samples == 0 {
            problems.push("decode.paramset_scan_samples must be positive");
        }
        if !(self.render.progress_interval_secs > 0.0) {
            problems.push("render.progress_interval_secs must be positive");
        }
        if !problems.is_empty() {
            return Err(SpliceError::Config(problems.join("; ")));
        }
        self.render.background_color()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ExportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.decode.max_outstanding, 8);
        assert_eq!(config.audio.chunk_frames, 1024);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ExportConfig = toml::from_str(
            r##"
            [video]
            bitrate = 2000000

            [render]
            background = "#102030"
            "##,
        )
        .unwrap();
        assert_eq!(config.video.bitrate, 2_000_000);
        assert_eq!(config.video.codec, "avc1.42001f");
        assert_eq!(config.render.background_color().unwrap().to_rgba8(), [16, 32, 48, 255]);
        assert_eq!(config.decode.stall_timeout_ms, 2000);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ExportConfig::default();
        config.decode.max_outstanding = 0;
        config.audio.chunk_frames = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("decode.max_outstanding"));
        assert!(err.contains("audio.chunk_frames"));
    }

    #[test]
    fn test_validate_rejects_bad_background() {
        let mut config = ExportConfig::default();
        config.render.background = "not-a-color".into();
        assert!(config.validate().is_err());
    }
}
