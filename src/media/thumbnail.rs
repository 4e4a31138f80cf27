//! Thumbnail state tracking and background generation.
//!
//! [`ThumbnailPipeline::ensure`] never generates anything itself: it either
//! reports a finished thumbnail or queues one job on the worker pool and hands
//! back the placeholder.

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{GalleryError, GalleryResult, Rejection};
use crate::media::extractor::ThumbnailGenerator;
use crate::models::{ThumbnailRecord, ThumbnailReference, ThumbnailState, WorkItem, MEDIA_EXTENSIONS};
use crate::security::{is_allowed_extension, PathGuard, ResolvedPath};
use crate::worker::{SubmitError, WorkerPool, WorkerStats};

type Records = Arc<Mutex<HashMap<PathBuf, ThumbnailRecord>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub threads: usize,
    pub queue_size: usize,
    /// Sources larger than this fail before any decoding.
    pub max_source_bytes: u64,
    pub drain_window: Duration,
    /// When off, `ensure` only reports existing thumbnails.
    pub generation_enabled: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threads: 2,
            queue_size: 500,
            max_source_bytes: 8 * 1024 * 1024 * 1024,
            drain_window: Duration::from_secs(5),
            generation_enabled: true,
        }
    }
}

pub struct ThumbnailPipeline {
    guard: PathGuard,
    thumbnail_root: PathBuf,
    records: Records,
    pool: WorkerPool<WorkItem>,
    generator: Arc<dyn ThumbnailGenerator>,
    options: PipelineOptions,
}

impl ThumbnailPipeline {
    /// Create the pipeline; the thumbnail root is created if missing. Jobs
    /// queue up until [`ThumbnailPipeline::start`] is called.
    pub fn new(
        guard: PathGuard,
        thumbnail_root: impl AsRef<Path>,
        generator: Arc<dyn ThumbnailGenerator>,
        options: PipelineOptions,
    ) -> GalleryResult<Self> {
        let thumbnail_root = thumbnail_root.as_ref();
        fs::create_dir_all(thumbnail_root)
            .map_err(|err| GalleryError::io("create_thumbnail_root", thumbnail_root, err))?;
        let thumbnail_root = fs::canonicalize(thumbnail_root)
            .map_err(|err| GalleryError::io("canonicalize_thumbnail_root", thumbnail_root, err))?;

        Ok(Self {
            guard,
            thumbnail_root,
            records: Arc::new(Mutex::new(HashMap::new())),
            pool: WorkerPool::new("thumbnail", options.threads, options.queue_size),
            generator,
            options,
        })
    }

    pub fn thumbnail_root(&self) -> &Path {
        &self.thumbnail_root
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> GalleryResult<()> {
        let records = Arc::clone(&self.records);
        let generator = Arc::clone(&self.generator);
        let max_bytes = self.options.max_source_bytes;

        self.pool.start(move |item: WorkItem| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_job(generator.as_ref(), &item, max_bytes)
            }))
            .unwrap_or_else(|_| {
                Err(GalleryError::Thumbnail {
                    path: item.source_path.clone(),
                    reason: "thumbnail generator panicked",
                    detail: None,
                })
            });

            let state = match &outcome {
                Ok(()) => {
                    info!(
                        source = %item.source_path.display(),
                        waited_ms = item.submitted_at.elapsed().as_millis() as u64,
                        "thumbnail generated"
                    );
                    ThumbnailState::Ready
                }
                Err(err) => {
                    let detail = match err {
                        GalleryError::Thumbnail { detail, .. } => detail.clone(),
                        other => std::error::Error::source(other).map(ToString::to_string),
                    };
                    error!(
                        source = %item.source_path.display(),
                        error = %err,
                        detail = detail.as_deref().unwrap_or_default(),
                        "thumbnail generation failed"
                    );
                    ThumbnailState::Failed
                }
            };
            set_state(&records, &item.source_path, &item.thumbnail_path, state);
            outcome.is_ok()
        })
    }

    /// Report the thumbnail at `thumbnail` for `source`, queueing its
    /// generation if needed. At most one job per thumbnail path is
    /// outstanding at a time.
    pub fn ensure(
        &self,
        source: &ResolvedPath,
        thumbnail: &Path,
        placeholder: &str,
    ) -> GalleryResult<ThumbnailReference> {
        if !self.is_under_thumbnail_root(thumbnail) {
            return Err(GalleryError::rejected(
                thumbnail.to_string_lossy(),
                Rejection::Traversal,
            ));
        }

        if is_non_empty(thumbnail) {
            set_state(&self.records, source.as_path(), thumbnail, ThumbnailState::Ready);
            return Ok(ThumbnailReference::Ready(thumbnail.to_path_buf()));
        }
        self.queue_unless_ready(source, thumbnail, placeholder)
    }

    /// Record-level half of [`ThumbnailPipeline::ensure`]. The file check is
    /// repeated under the lock since a worker may have finished meanwhile.
    fn queue_unless_ready(
        &self,
        source: &ResolvedPath,
        thumbnail: &Path,
        placeholder: &str,
    ) -> GalleryResult<ThumbnailReference> {
        let placeholder = ThumbnailReference::Placeholder(placeholder.to_string());
        let mut records = self.records.lock();
        let record = records
            .entry(thumbnail.to_path_buf())
            .or_insert_with(|| ThumbnailRecord {
                source_path: source.as_path().to_path_buf(),
                thumbnail_path: thumbnail.to_path_buf(),
                state: ThumbnailState::Missing,
            });

        match record.state {
            ThumbnailState::Pending => {
                debug!(thumbnail = %thumbnail.display(), "thumbnail already pending");
                return Ok(placeholder);
            }
            ThumbnailState::Ready => {
                if is_non_empty(thumbnail) {
                    return Ok(ThumbnailReference::Ready(thumbnail.to_path_buf()));
                }
                // Deleted out from under us; start over.
                record.state = ThumbnailState::Missing;
            }
            ThumbnailState::Missing | ThumbnailState::Failed => {}
        }

        if !self.options.generation_enabled {
            return Ok(placeholder);
        }

        let item = WorkItem::new(source.as_path().to_path_buf(), thumbnail.to_path_buf());
        match self.pool.submit(item) {
            Ok(()) => {
                record.state = ThumbnailState::Pending;
                debug!(source = source.relative(), "thumbnail queued");
            }
            Err(SubmitError::Full(_)) => {
                record.state = ThumbnailState::Failed;
                warn!(
                    source = source.relative(),
                    queue_len = self.pool.queue_len(),
                    "thumbnail queue full; serving placeholder"
                );
            }
            Err(SubmitError::Closed(_)) => {
                record.state = ThumbnailState::Missing;
                warn!(source = source.relative(), "thumbnail workers stopped; serving placeholder");
            }
        }
        Ok(placeholder)
    }

    /// Resolve an untrusted relative media path and ensure its thumbnail.
    pub fn ensure_relative(
        &self,
        relative: &str,
        placeholder: &str,
    ) -> GalleryResult<ThumbnailReference> {
        let source = self.resolve_source(relative)?;
        let thumbnail = thumbnail_path_for(&self.thumbnail_root, source.relative());
        self.ensure(&source, &thumbnail, placeholder)
    }

    /// Current record for a thumbnail path, if the pipeline has seen it.
    pub fn record(&self, thumbnail: &Path) -> Option<ThumbnailRecord> {
        self.records.lock().get(thumbnail).cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.pool.queue_len()
    }

    pub fn stats(&self) -> WorkerStats {
        self.pool.stats()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pool.wait_idle(timeout)
    }

    /// Stop the workers. Jobs that never started go back to `Missing`; the
    /// number of such jobs is returned.
    pub fn shutdown(&self, drain: bool) -> usize {
        let dropped = self.pool.shutdown(drain, self.options.drain_window);
        for item in &dropped {
            set_state(
                &self.records,
                &item.source_path,
                &item.thumbnail_path,
                ThumbnailState::Missing,
            );
        }
        dropped.len()
    }

    /// Strictly below the thumbnail root, with no `..` or other
    /// non-plain components after it.
    fn is_under_thumbnail_root(&self, thumbnail: &Path) -> bool {
        match thumbnail.strip_prefix(&self.thumbnail_root) {
            Ok(rest) => {
                rest.components().next().is_some()
                    && rest
                        .components()
                        .all(|component| matches!(component, Component::Normal(_)))
            }
            Err(_) => false,
        }
    }

    pub(crate) fn resolve_source(&self, relative: &str) -> GalleryResult<ResolvedPath> {
        let source = self.guard.resolve(relative).map_err(|reason| {
            if reason.is_security_relevant() {
                warn!(input = relative, %reason, "rejected thumbnail source");
            }
            GalleryError::rejected(relative, reason)
        })?;

        if source.is_root() || !is_allowed_extension(source.relative(), MEDIA_EXTENSIONS) {
            return Err(GalleryError::rejected(relative, Rejection::DisallowedExtension));
        }
        if !source.as_path().is_file() {
            return Err(GalleryError::rejected(relative, Rejection::NotFound));
        }
        Ok(source)
    }
}

impl Drop for ThumbnailPipeline {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

/// Where the thumbnail for `relative` lives: the same relative path under
/// `thumbnail_root` with `.png` appended.
pub fn thumbnail_path_for(thumbnail_root: &Path, relative: &str) -> PathBuf {
    let mut path = thumbnail_root.to_path_buf();
    let mut segments = relative
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            path.push(segment);
        } else {
            path.push(format!("{segment}.png"));
        }
    }
    path
}

fn run_job(generator: &dyn ThumbnailGenerator, item: &WorkItem, max_bytes: u64) -> GalleryResult<()> {
    let source = &item.source_path;
    let size = fs::metadata(source)
        .map_err(|err| GalleryError::io("metadata", source, err))?
        .len();
    if size > max_bytes {
        return Err(GalleryError::Thumbnail {
            path: source.clone(),
            reason: "source exceeds the size limit",
            detail: Some(format!("{size} bytes")),
        });
    }

    if let Some(parent) = item.thumbnail_path.parent() {
        fs::create_dir_all(parent).map_err(|err| GalleryError::io("create_dir_all", parent, err))?;
    }
    generator.generate(source, &item.thumbnail_path)?;

    if !is_non_empty(&item.thumbnail_path) {
        return Err(GalleryError::Thumbnail {
            path: source.clone(),
            reason: "generator produced no output",
            detail: None,
        });
    }
    Ok(())
}

fn set_state(records: &Records, source: &Path, thumbnail: &Path, state: ThumbnailState) {
    records
        .lock()
        .entry(thumbnail.to_path_buf())
        .and_modify(|record| record.state = state)
        .or_insert_with(|| ThumbnailRecord {
            source_path: source.to_path_buf(),
            thumbnail_path: thumbnail.to_path_buf(),
            state,
        });
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
