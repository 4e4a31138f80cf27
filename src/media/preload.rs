use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::GalleryResult;
use crate::media::scanner::DirectoryIndexer;
use crate::media::thumbnail::{thumbnail_path_for, ThumbnailPipeline};
use crate::models::{MediaKind, ThumbnailReference, ThumbnailState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadOptions {
    pub batch_size: usize,
    /// How long to wait for one batch to drain before queueing the next.
    pub batch_wait: Duration,
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_wait: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadReport {
    pub indexed: usize,
    pub videos: usize,
    pub already_present: usize,
    pub queued: usize,
    pub refused: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
}

/// Warm the directory cache for the whole root and queue thumbnails for every
/// video that lacks one, batch by batch.
pub fn preload(
    indexer: &DirectoryIndexer,
    pipeline: &ThumbnailPipeline,
    placeholder: &str,
    options: PreloadOptions,
) -> GalleryResult<PreloadReport> {
    let started = Instant::now();
    let entries = indexer.scan(None)?;
    info!(files = entries.len(), "directory cache warmed");

    let videos: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.kind == MediaKind::Video)
        .map(|entry| entry.relative_path.as_str())
        .collect();

    let mut report = PreloadReport {
        indexed: entries.len(),
        videos: videos.len(),
        ..PreloadReport::default()
    };

    let mut missing = Vec::new();
    for relative in videos {
        let thumbnail = thumbnail_path_for(pipeline.thumbnail_root(), relative);
        if thumbnail.is_file() {
            report.already_present += 1;
        } else {
            missing.push((relative, thumbnail));
        }
    }
    info!(
        needing = missing.len(),
        present = report.already_present,
        "videos needing thumbnails"
    );

    let batch_size = options.batch_size.max(1);
    let batch_count = missing.len().div_ceil(batch_size);
    for (index, batch) in missing.chunks(batch_size).enumerate() {
        report.batches += 1;
        info!(batch = index + 1, of = batch_count, size = batch.len(), "queueing thumbnail batch");

        for (relative, thumbnail) in batch {
            match pipeline.ensure_relative(relative, placeholder) {
                Ok(ThumbnailReference::Ready(_)) => report.already_present += 1,
                Ok(ThumbnailReference::Placeholder(_)) => {
                    // A fast worker may already have finished the job.
                    let accepted = pipeline.record(thumbnail).is_some_and(|record| {
                        matches!(record.state, ThumbnailState::Pending | ThumbnailState::Ready)
                    });
                    if accepted {
                        report.queued += 1;
                    } else {
                        report.refused += 1;
                    }
                }
                Err(err) => {
                    warn!(path = relative, error = %err, "failed to queue thumbnail");
                    report.refused += 1;
                }
            }
        }

        if index + 1 < batch_count && !pipeline.wait_idle(options.batch_wait) {
            warn!(batch = index + 1, "batch did not finish in time; continuing");
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        queued = report.queued,
        present = report.already_present,
        refused = report.refused,
        "thumbnail preload complete"
    );
    Ok(report)
}
