use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

/// Generation state of one thumbnail. Only the thumbnail pipeline moves a
/// record between states.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailState {
    Missing,
    Pending,
    Ready,
    Failed,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailRecord {
    pub source_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub state: ThumbnailState,
}

/// A queued generation job.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub source_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub submitted_at: Instant,
}

impl WorkItem {
    pub fn new(source_path: PathBuf, thumbnail_path: PathBuf) -> Self {
        Self {
            source_path,
            thumbnail_path,
            submitted_at: Instant::now(),
        }
    }
}

/// What a caller should serve for a thumbnail request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThumbnailReference {
    /// The thumbnail file exists at this path.
    Ready(PathBuf),
    /// Generation is pending or failed; serve this stand-in and retry later.
    Placeholder(String),
}

impl ThumbnailReference {
    pub fn is_ready(&self) -> bool {
        matches!(self, ThumbnailReference::Ready(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ThumbnailReference::Ready(path) => Some(path),
            ThumbnailReference::Placeholder(_) => None,
        }
    }
}
