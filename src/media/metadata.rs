use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::ExpiringCache;
use crate::error::{GalleryError, GalleryResult, Rejection};
use crate::media::thumbnail::thumbnail_path_for;
use crate::models::MediaKind;
use crate::security::{PathGuard, ResolvedPath};
use crate::utils::{extract_date_taken, file_cache_key, get_image_dimensions};

pub type MetadataCache = ExpiringCache<String, MediaMetadata>;

/// Bounding edge used when scaling name-derived video sizes.
const VIDEO_THUMBNAIL_EDGE: u32 = 300;
/// Landscape 16:9 at thumbnail size, for videos with nothing better.
const DEFAULT_VIDEO_DIMENSIONS: (u32, u32) = (300, 169);

/// Details shown alongside a single media item.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub relative_path: String,
    pub file_name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub date_taken: Option<DateTime<Utc>>,
}

/// Memoized per-file metadata lookups under the media root.
pub struct MetadataService {
    guard: PathGuard,
    thumbnail_root: PathBuf,
    cache: Arc<MetadataCache>,
}

impl MetadataService {
    /// `thumbnail_root` is where generated video thumbnails are looked up
    /// for dimensions.
    pub fn new(
        guard: PathGuard,
        thumbnail_root: impl Into<PathBuf>,
        cache: Arc<MetadataCache>,
    ) -> Self {
        Self {
            guard,
            thumbnail_root: thumbnail_root.into(),
            cache,
        }
    }

    pub fn lookup(&self, relative: &str) -> GalleryResult<MediaMetadata> {
        let source = self.resolve(relative)?;
        let key = file_cache_key(source.as_path());
        if let Some(metadata) = self.cache.get(&key) {
            debug!(path = source.relative(), "metadata cache hit");
            return Ok(metadata);
        }

        let metadata = read_metadata(&source, &self.thumbnail_root)?;
        self.cache.set(key, metadata.clone());
        Ok(metadata)
    }

    /// Drop the cached entry for an absolute path under the root.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.cache.invalidate(&file_cache_key(path))
    }

    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    fn resolve(&self, relative: &str) -> GalleryResult<ResolvedPath> {
        let source = self.guard.resolve(relative).map_err(|reason| {
            if reason.is_security_relevant() {
                warn!(input = relative, %reason, "rejected metadata path");
            }
            GalleryError::rejected(relative, reason)
        })?;
        if !source.as_path().is_file() {
            return Err(GalleryError::rejected(relative, Rejection::NotFound));
        }
        Ok(source)
    }
}

fn read_metadata(source: &ResolvedPath, thumbnail_root: &Path) -> GalleryResult<MediaMetadata> {
    let path = source.as_path();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();
    let kind = MediaKind::from_name(&file_name)
        .ok_or_else(|| GalleryError::rejected(source.relative(), Rejection::DisallowedExtension))?;

    let stat = fs::metadata(path).map_err(|err| GalleryError::io("metadata", path, err))?;
    let modified_at = stat.modified().ok().map(DateTime::<Utc>::from);

    let (dimensions, date_taken) = match kind {
        MediaKind::Image => (get_image_dimensions(path), extract_date_taken(path)),
        MediaKind::Video => (
            Some(video_dimensions(thumbnail_root, source.relative(), &file_name)),
            None,
        ),
    };

    Ok(MediaMetadata {
        relative_path: source.relative().to_string(),
        file_name,
        kind,
        size_bytes: stat.len(),
        modified_at,
        width: dimensions.map(|(width, _)| width),
        height: dimensions.map(|(_, height)| height),
        date_taken,
    })
}

/// The generated thumbnail's size if one exists, else the name-derived size
/// scaled to thumbnail scale, else a 16:9 default.
fn video_dimensions(thumbnail_root: &Path, relative: &str, file_name: &str) -> (u32, u32) {
    if let Some(dimensions) = get_image_dimensions(&thumbnail_path_for(thumbnail_root, relative)) {
        return dimensions;
    }
    match dimensions_from_name(file_name) {
        Some((width, height)) if width > height => (
            VIDEO_THUMBNAIL_EDGE,
            (u64::from(VIDEO_THUMBNAIL_EDGE) * u64::from(height) / u64::from(width)) as u32,
        ),
        Some((width, height)) => (
            (u64::from(VIDEO_THUMBNAIL_EDGE) * u64::from(width) / u64::from(height)) as u32,
            VIDEO_THUMBNAIL_EDGE,
        ),
        None => DEFAULT_VIDEO_DIMENSIONS,
    }
}

/// Dimensions embedded in names such as `clip_1920x1080.mp4`. Each side
/// takes at most 5 digits next to the `x` (at least 3) and must land within
/// 10..=50000.
pub fn dimensions_from_name(name: &str) -> Option<(u32, u32)> {
    let bytes = name.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if !matches!(byte, b'x' | b'X') {
            continue;
        }
        let before = &name[..index];
        let after = &name[index + 1..];
        let width_digits = before
            .bytes()
            .rev()
            .take_while(u8::is_ascii_digit)
            .count()
            .min(5);
        let height_digits = after.bytes().take_while(u8::is_ascii_digit).count().min(5);
        if width_digits < 3 || height_digits < 3 {
            continue;
        }

        let width: u32 = before[before.len() - width_digits..].parse().ok()?;
        let height: u32 = after[..height_digits].parse().ok()?;
        if (10..=50_000).contains(&width) && (10..=50_000).contains(&height) {
            return Some((width, height));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::time::Duration;

    fn service(ttl: Duration) -> (tempfile::TempDir, MetadataService, ManualClock) {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("media");
        fs::create_dir_all(&media).unwrap();
        image::RgbImage::new(40, 30).save(media.join("photo.png")).unwrap();
        fs::write(media.join("trip_1920x1080.mp4"), b"video").unwrap();

        let clock = ManualClock::new();
        let cache = Arc::new(MetadataCache::with_clock(ttl, Arc::new(clock.clone())));
        let service = MetadataService::new(
            PathGuard::new(&media).unwrap(),
            temp.path().join("thumbs"),
            cache,
        );
        (temp, service, clock)
    }

    #[test]
    fn describes_images_and_videos() {
        let (_temp, service, _clock) = service(Duration::from_secs(600));

        let photo = service.lookup("photo.png").unwrap();
        assert_eq!(photo.kind, MediaKind::Image);
        assert_eq!((photo.width, photo.height), (Some(40), Some(30)));
        assert_eq!(photo.date_taken, None);
        assert!(photo.size_bytes > 0);

        let video = service.lookup("trip_1920x1080.mp4").unwrap();
        assert_eq!(video.kind, MediaKind::Video);
        assert_eq!((video.width, video.height), (Some(300), Some(168)));
        assert_eq!(video.size_bytes, 5);
    }

    #[test]
    fn video_dimensions_prefer_the_generated_thumbnail() {
        let (temp, service, _clock) = service(Duration::from_secs(600));
        let thumbs = temp.path().join("thumbs");
        fs::write(temp.path().join("media").join("portrait_720x1280.mov"), b"v").unwrap();
        fs::write(temp.path().join("media").join("untitled.mkv"), b"v").unwrap();

        let portrait = service.lookup("portrait_720x1280.mov").unwrap();
        assert_eq!((portrait.width, portrait.height), (Some(168), Some(300)));
        let untitled = service.lookup("untitled.mkv").unwrap();
        assert_eq!((untitled.width, untitled.height), (Some(300), Some(169)));

        fs::create_dir_all(&thumbs).unwrap();
        image::RgbImage::new(300, 120)
            .save_with_format(thumbs.join("trip_1920x1080.mp4.png"), image::ImageFormat::Png)
            .unwrap();
        let video = service.lookup("trip_1920x1080.mp4").unwrap();
        assert_eq!((video.width, video.height), (Some(300), Some(120)));
    }

    #[test]
    fn lookups_are_cached_until_expiry() {
        let (temp, service, clock) = service(Duration::from_secs(600));
        let path = temp.path().join("media").join("trip_1920x1080.mp4");

        assert_eq!(service.lookup("trip_1920x1080.mp4").unwrap().size_bytes, 5);
        fs::write(&path, b"longer video").unwrap();
        assert_eq!(service.lookup("trip_1920x1080.mp4").unwrap().size_bytes, 5);

        clock.advance(Duration::from_secs(601));
        assert_eq!(service.lookup("trip_1920x1080.mp4").unwrap().size_bytes, 12);

        fs::write(&path, b"v").unwrap();
        let canonical = fs::canonicalize(&path).unwrap();
        assert!(service.invalidate(&canonical));
        assert_eq!(service.lookup("trip_1920x1080.mp4").unwrap().size_bytes, 1);
    }

    #[test]
    fn rejects_untrusted_paths() {
        let (_temp, service, _clock) = service(Duration::from_secs(60));
        for (input, expected) in [
            ("../secret.jpg", Rejection::Traversal),
            ("nope.jpg", Rejection::NotFound),
            ("", Rejection::NotFound),
        ] {
            match service.lookup(input) {
                Err(GalleryError::Rejected { reason, .. }) => assert_eq!(reason, expected, "{input}"),
                other => panic!("{input}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn parses_dimensions_from_names() {
        assert_eq!(dimensions_from_name("1200x800.png"), Some((1200, 800)));
        assert_eq!(dimensions_from_name("photo_1080X1920.jpg"), Some((1080, 1920)));
        assert_eq!(dimensions_from_name("box_12x34.mp4"), None);
        assert_eq!(dimensions_from_name("xmas.mp4"), None);
        assert_eq!(dimensions_from_name("99999x100.mp4"), None);
        assert_eq!(dimensions_from_name("123456x789.mp4"), Some((23456, 789)));
        assert_eq!(dimensions_from_name("640x4801234.mp4"), Some((640, 48012)));
    }
}
