use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One media file discovered during a directory walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    /// Path relative to the media root, `/`-separated.
    pub relative_path: String,
    pub kind: MediaKind,
    /// `None` when the scan skipped modification times.
    pub modified_at: Option<DateTime<Utc>>,
}

impl MediaEntry {
    pub fn new(relative_path: String, kind: MediaKind, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            relative_path,
            kind,
            modified_at,
        }
    }

    /// URL the route layer renders as this entry's thumbnail. Images are
    /// served directly; videos go through the thumbnail endpoint.
    pub fn thumbnail_url(&self) -> String {
        match self.kind {
            MediaKind::Image => format!("/media/{}", self.relative_path),
            MediaKind::Video => format!("/thumbnail/{}", self.relative_path),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file name by extension, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "flv"];
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "mp4", "mov", "avi", "mkv", "webm", "flv",
];

/// A rendered gallery tile: the media path plus the URL of its thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub relative_path: String,
    pub kind: MediaKind,
    pub thumbnail_url: String,
}

impl From<&MediaEntry> for GalleryItem {
    fn from(entry: &MediaEntry) -> Self {
        Self {
            relative_path: entry.relative_path.clone(),
            kind: entry.kind,
            thumbnail_url: entry.thumbnail_url(),
        }
    }
}

/// Per-kind totals for the filter UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCounts {
    pub total: usize,
    pub images: usize,
    pub videos: usize,
}

impl MediaCounts {
    pub fn from_entries(entries: &[MediaEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut counts, entry| {
            counts.total += 1;
            match entry.kind {
                MediaKind::Image => counts.images += 1,
                MediaKind::Video => counts.videos += 1,
            }
            counts
        })
    }
}

/// Which kinds a gallery view shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindFilter {
    #[default]
    All,
    Images,
    Videos,
}

impl KindFilter {
    pub fn matches(self, kind: MediaKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Images => kind == MediaKind::Image,
            KindFilter::Videos => kind == MediaKind::Video,
        }
    }
}

impl FromStr for KindFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(KindFilter::All),
            "images" | "image" => Ok(KindFilter::Images),
            "videos" | "video" => Ok(KindFilter::Videos),
            other => Err(format!("unknown media filter: {other}")),
        }
    }
}
