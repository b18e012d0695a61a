//! Media pipelines producing thumbnail bytes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::Config;

/// Output geometry and encoding of a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    /// Edge length of the square output.
    pub size: u32,
    /// JPEG quality (1-100).
    pub quality: u8,
}

impl ThumbnailSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            size: config.thumbnail_size.max(1),
            quality: config.jpeg_quality(),
        }
    }
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Ffmpeg { status: String, stderr: String },

    #[error("ffmpeg produced no frame")]
    NoFrame,

    #[error("ffmpeg timed out after {0:?}")]
    Timeout(Duration),

    #[error("render task failed: {0}")]
    Task(String),
}

/// Turns source media into thumbnail bytes.
#[async_trait]
pub trait ThumbnailRenderer: Send + Sync {
    /// Cover-fit an encoded image into a square JPEG.
    async fn render_image(&self, data: Vec<u8>, spec: ThumbnailSpec) -> Result<Vec<u8>, RenderError>;

    /// Extract one still frame from a video, in any format
    /// [`render_image`](Self::render_image) can decode.
    async fn extract_frame(&self, source: &Path) -> Result<Vec<u8>, RenderError>;
}

/// Scale `data` so it covers a `size`×`size` square, centre-crop the
/// overflow and encode the result as JPEG.
pub fn cover_jpeg(data: &[u8], spec: ThumbnailSpec) -> Result<Vec<u8>, RenderError> {
    let source = image::load_from_memory(data).map_err(RenderError::Decode)?;
    let thumb = source.resize_to_fill(spec.size, spec.size, FilterType::CatmullRom);
    let rgb = thumb.to_rgb8();

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, spec.quality);
    encoder.encode_image(&rgb).map_err(RenderError::Encode)?;
    Ok(out)
}

/// Production renderer: `image` for stills, `ffmpeg` for video frames.
#[derive(Debug, Clone)]
pub struct MediaRenderer {
    ffmpeg: PathBuf,
    frame_offset_secs: f64,
    timeout: Duration,
}

impl MediaRenderer {
    pub fn new(ffmpeg: impl Into<PathBuf>, frame_offset_secs: f64, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            frame_offset_secs: frame_offset_secs.max(0.0),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            config.video_frame_offset_secs,
            config.video_timeout(),
        )
    }

    async fn run_ffmpeg(&self, source: &Path, offset_secs: f64) -> Result<Vec<u8>, RenderError> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(ffmpeg_args(source, offset_secs))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Running {} for {} at {:.3}s",
            self.ffmpeg.display(),
            source.display(),
            offset_secs
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))?
            .map_err(RenderError::Spawn)?;

        if !output.status.success() {
            return Err(RenderError::Ffmpeg {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// Arguments for grabbing a single PNG frame at `offset_secs` onto stdout.
fn ffmpeg_args(source: &Path, offset_secs: f64) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-ss"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(format!("{:.3}", offset_secs).into());
    args.push("-i".into());
    args.push(source.as_os_str().to_owned());
    args.extend(
        ["-frames:v", "1", "-an", "-f", "image2pipe", "-vcodec", "png", "pipe:1"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

#[async_trait]
impl ThumbnailRenderer for MediaRenderer {
    async fn render_image(&self, data: Vec<u8>, spec: ThumbnailSpec) -> Result<Vec<u8>, RenderError> {
        tokio::task::spawn_blocking(move || cover_jpeg(&data, spec))
            .await
            .map_err(|e| RenderError::Task(e.to_string()))?
    }

    async fn extract_frame(&self, source: &Path) -> Result<Vec<u8>, RenderError> {
        let mut frame = self.run_ffmpeg(source, self.frame_offset_secs).await?;

        // Clips shorter than the offset yield nothing; fall back to the first frame.
        if frame.is_empty() && self.frame_offset_secs > 0.0 {
            debug!("No frame at offset for {}, retrying at 0s", source.display());
            frame = self.run_ffmpeg(source, 0.0).await?;
        }

        if frame.is_empty() {
            return Err(RenderError::NoFrame);
        }
        Ok(frame)
    }
}
