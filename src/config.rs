use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum file size for uploads (in bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Edge length of the square thumbnails (in pixels)
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    /// JPEG quality used when encoding thumbnails (1-100)
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,

    /// ffmpeg executable used for video frame extraction
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Offset into the video at which the preview frame is taken (in seconds)
    #[serde(default = "default_video_frame_offset_secs")]
    pub video_frame_offset_secs: f64,

    /// Upper bound for a single ffmpeg run (in seconds)
    #[serde(default = "default_video_timeout_secs")]
    pub video_timeout_secs: u64,
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_thumbnail_size() -> u32 {
    150
}

fn default_thumbnail_quality() -> u8 {
    80
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_video_frame_offset_secs() -> f64 {
    1.0
}

fn default_video_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            thumbnail_size: default_thumbnail_size(),
            thumbnail_quality: default_thumbnail_quality(),
            ffmpeg_path: default_ffmpeg_path(),
            video_frame_offset_secs: default_video_frame_offset_secs(),
            video_timeout_secs: default_video_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_secs(self.video_timeout_secs)
    }

    /// JPEG quality clamped to the range the encoder accepts.
    pub fn jpeg_quality(&self) -> u8 {
        self.thumbnail_quality.clamp(1, 100)
    }
}
