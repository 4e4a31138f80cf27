use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{GalleryError, GalleryResult};
use crate::models::MediaKind;

/// Produces a thumbnail file for one source. Implementations must leave no
/// partial file at `target` on failure.
pub trait ThumbnailGenerator: Send + Sync {
    fn generate(&self, source: &Path, target: &Path) -> GalleryResult<()>;
}

/// Bounding box and limits for generated thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    pub width: u32,
    pub height: u32,
    pub max_duration: Duration,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            width: 300,
            height: 200,
            max_duration: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Thumbnails via the `ffmpeg`/`ffprobe` binaries for videos and the
/// `image` crate for stills.
#[derive(Debug, Clone)]
pub struct FfmpegGenerator {
    spec: ThumbnailSpec,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegGenerator {
    pub fn new(spec: ThumbnailSpec) -> Self {
        Self {
            spec,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    /// Use binaries other than the ones on `PATH`.
    #[must_use]
    pub fn with_binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    fn probe_duration(&self, source: &Path) -> GalleryResult<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| tool_error(source, "ffprobe", err))?;

        if !output.status.success() {
            return Err(GalleryError::Thumbnail {
                path: source.to_path_buf(),
                reason: "duration probe failed",
                detail: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = stdout.trim().parse::<f64>().map_err(|_| GalleryError::Thumbnail {
            path: source.to_path_buf(),
            reason: "duration probe returned no duration",
            detail: Some(stdout.trim().to_string()),
        })?;
        validate_duration(source, duration, self.spec.max_duration)?;
        Ok(duration)
    }

    fn extract_frame(&self, source: &Path, frame: &Path, at_secs: f64) -> GalleryResult<()> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .arg("-ss")
            .arg(format!("{at_secs:.3}"))
            .arg("-i")
            .arg(source)
            .args(["-frames:v", "1", "-f", "image2", "-c:v", "png"])
            .arg(frame)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| tool_error(source, "ffmpeg", err))?;

        if !output.status.success() || !is_non_empty(frame) {
            return Err(GalleryError::Thumbnail {
                path: source.to_path_buf(),
                reason: "frame extraction failed",
                detail: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }
        Ok(())
    }

    fn video_thumbnail(&self, source: &Path, target: &Path) -> GalleryResult<()> {
        let duration = self.probe_duration(source)?;
        let frame = scratch_file(target, ".frame-")?;
        self.extract_frame(source, frame.path(), duration / 2.0)?;

        let decoded = image::open(frame.path()).map_err(|source_err| GalleryError::Image {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        write_thumbnail(&decoded, source, target, self.spec)
    }

    fn image_thumbnail(&self, source: &Path, target: &Path) -> GalleryResult<()> {
        let decoded = image::open(source).map_err(|err| GalleryError::Image {
            path: source.to_path_buf(),
            source: err,
        })?;
        write_thumbnail(&decoded, source, target, self.spec)
    }
}

impl ThumbnailGenerator for FfmpegGenerator {
    fn generate(&self, source: &Path, target: &Path) -> GalleryResult<()> {
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        match MediaKind::from_name(name) {
            Some(MediaKind::Video) => self.video_thumbnail(source, target),
            Some(MediaKind::Image) => self.image_thumbnail(source, target),
            None => Err(GalleryError::Thumbnail {
                path: source.to_path_buf(),
                reason: "not a supported media file",
                detail: None,
            }),
        }
    }
}

/// Whether `ffmpeg` can be run from `PATH`. Logged once at startup; the
/// pipeline still runs without it and video jobs fail individually.
pub fn check_ffmpeg() -> bool {
    match Command::new("ffmpeg")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {
            info!("ffmpeg available");
            true
        }
        Ok(status) => {
            warn!(code = ?status.code(), "ffmpeg exited with an error; video thumbnails will fail");
            false
        }
        Err(err) => {
            warn!(error = %err, "ffmpeg not found; video thumbnails will fail");
            false
        }
    }
}

fn validate_duration(source: &Path, duration: f64, max: Duration) -> GalleryResult<()> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(GalleryError::Thumbnail {
            path: source.to_path_buf(),
            reason: "video has no usable duration",
            detail: Some(duration.to_string()),
        });
    }
    if duration > max.as_secs_f64() {
        return Err(GalleryError::Thumbnail {
            path: source.to_path_buf(),
            reason: "video exceeds the duration limit",
            detail: Some(format!("{duration:.0}s")),
        });
    }
    Ok(())
}

/// Downscale into the bounding box (aspect preserved, never upscaled) and
/// write PNG through a temporary file persisted over `target`.
fn write_thumbnail(
    decoded: &DynamicImage,
    source: &Path,
    target: &Path,
    spec: ThumbnailSpec,
) -> GalleryResult<()> {
    let thumbnail = if decoded.width() > spec.width || decoded.height() > spec.height {
        decoded.thumbnail(spec.width, spec.height)
    } else {
        decoded.clone()
    };

    let mut staging = scratch_file(target, ".thumb-")?;
    thumbnail
        .write_to(&mut staging, ImageFormat::Png)
        .map_err(|err| GalleryError::Image {
            path: source.to_path_buf(),
            source: err,
        })?;
    staging
        .persist(target)
        .map_err(|err| GalleryError::io("persist", target, err.error))?;

    debug!(
        source = %source.display(),
        width = thumbnail.width(),
        height = thumbnail.height(),
        "thumbnail written"
    );
    Ok(())
}

fn tool_error(source: &Path, tool: &'static str, err: std::io::Error) -> GalleryError {
    let reason = if err.kind() == ErrorKind::NotFound {
        "ffmpeg tools are not installed"
    } else {
        "failed to run ffmpeg tools"
    };
    GalleryError::Thumbnail {
        path: source.to_path_buf(),
        reason,
        detail: Some(format!("{tool}: {err}")),
    }
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.len() > 0).unwrap_or(false)
}

/// Empty `.png` scratch file in the target's directory, deleted on drop
/// unless persisted. Same directory keeps the final rename atomic.
fn scratch_file(target: &Path, prefix: &str) -> GalleryResult<NamedTempFile> {
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| GalleryError::io("create_dir_all", parent, err))?;

    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".png")
        .tempfile_in(parent)
        .map_err(|err| GalleryError::io("create_temp_file", parent, err))
}
