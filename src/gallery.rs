//! Composition root: builds every service from a [`Config`] and exposes the
//! operations the route layer calls.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::CacheStats;
use crate::config::Config;
use crate::error::GalleryResult;
use crate::file_watcher::{CacheInvalidator, MediaWatcher};
use crate::media::{
    check_ffmpeg, preload, sorted_view, DirectoryCache, DirectoryIndexer, FfmpegGenerator,
    MediaMetadata, MetadataCache, MetadataService, PipelineOptions, PreloadOptions,
    PreloadReport, SortMode, ThumbnailGenerator, ThumbnailPipeline, ThumbnailSpec,
};
use crate::models::{GalleryItem, KindFilter, MediaCounts, MediaEntry, ThumbnailReference};
use crate::security::PathGuard;
use crate::utils::{paginate, PageInfo};
use crate::worker::WorkerStats;

/// One gallery view request, straight from untrusted query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryQuery {
    pub folder: Option<String>,
    pub sort: SortMode,
    pub kind: KindFilter,
    /// 1-based; 0 is treated as 1.
    pub page: usize,
    /// Falls back to the configured page size.
    pub per_page: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPage {
    pub folder: String,
    pub items: Vec<GalleryItem>,
    /// Counts over the whole folder, before the kind filter.
    pub counts: MediaCounts,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryStats {
    pub directory_cache: CacheStats,
    pub metadata_cache: CacheStats,
    pub workers: WorkerStats,
    pub walks: usize,
    pub skipped_entries: usize,
}

pub struct Gallery {
    config: Config,
    indexer: Arc<DirectoryIndexer>,
    metadata: Arc<MetadataService>,
    metadata_cache: Arc<MetadataCache>,
    pipeline: ThumbnailPipeline,
    watcher: Mutex<Option<MediaWatcher>>,
}

impl Gallery {
    /// Validate `config` and build the gallery with the ffmpeg generator.
    pub fn build(config: Config) -> GalleryResult<Self> {
        let spec = ThumbnailSpec {
            width: config.thumbnail_width,
            height: config.thumbnail_height,
            max_duration: Duration::from_secs(config.max_video_duration_secs),
        };
        Self::with_generator(config, Arc::new(FfmpegGenerator::new(spec)))
    }

    pub fn with_generator(
        config: Config,
        generator: Arc<dyn ThumbnailGenerator>,
    ) -> GalleryResult<Self> {
        let config = config.validate()?;
        let guard = PathGuard::new(&config.media_dir)?.follow_symlinks(config.follow_symlinks);

        let indexer = Arc::new(
            DirectoryIndexer::new(
                guard.clone(),
                Arc::new(DirectoryCache::new(config.cache_ttl())),
            )
            .with_cache_enabled(config.cache_enabled),
        );
        let metadata_cache = Arc::new(MetadataCache::new(config.metadata_ttl()));
        let metadata = Arc::new(MetadataService::new(
            guard.clone(),
            &config.thumbnail_dir,
            Arc::clone(&metadata_cache),
        ));

        let options = PipelineOptions {
            threads: config.worker_threads,
            queue_size: config.worker_queue_size,
            max_source_bytes: config.max_video_bytes,
            drain_window: config.drain_timeout(),
            generation_enabled: config.worker_enabled,
        };
        let pipeline = ThumbnailPipeline::new(guard, &config.thumbnail_dir, generator, options)?;

        info!(
            media = %config.media_dir.display(),
            thumbnails = %config.thumbnail_dir.display(),
            cache = config.cache_enabled,
            workers = config.worker_enabled,
            "gallery built"
        );
        Ok(Self {
            config,
            indexer,
            metadata,
            metadata_cache,
            pipeline,
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start thumbnail workers and, if configured, the media watcher.
    pub fn start(&self) -> GalleryResult<()> {
        if self.config.worker_enabled {
            check_ffmpeg();
            self.pipeline.start()?;
        } else {
            info!("thumbnail workers disabled; placeholders will be served");
        }

        if self.config.watch_media {
            let invalidator = Arc::new(CacheInvalidator::new(
                Arc::clone(&self.indexer),
                Arc::clone(&self.metadata),
            ));
            *self.watcher.lock() = Some(MediaWatcher::start(invalidator)?);
        }
        Ok(())
    }

    pub fn page(&self, query: &GalleryQuery) -> GalleryResult<GalleryPage> {
        let entries = self.indexer.scan(query.folder.as_deref())?;
        let counts = MediaCounts::from_entries(&entries);

        let filtered: Vec<MediaEntry> = entries
            .into_iter()
            .filter(|entry| query.kind.matches(entry.kind))
            .collect();
        let ordered = sorted_view(&filtered, query.sort);

        let per_page = query.per_page.unwrap_or(self.config.items_per_page);
        let (slice, page_info) = paginate(&ordered, query.page, per_page);

        Ok(GalleryPage {
            folder: query.folder.clone().unwrap_or_default(),
            items: slice.iter().map(GalleryItem::from).collect(),
            counts,
            page_info,
        })
    }

    pub fn subfolders(&self, folder: Option<&str>) -> GalleryResult<Vec<String>> {
        Ok(self.indexer.list_subfolders(folder)?.into_iter().collect())
    }

    pub fn thumbnail(&self, relative: &str) -> GalleryResult<ThumbnailReference> {
        self.pipeline
            .ensure_relative(relative, &self.config.placeholder_url)
    }

    pub fn metadata(&self, relative: &str) -> GalleryResult<MediaMetadata> {
        self.metadata.lookup(relative)
    }

    /// Forget every cached listing and metadata entry.
    pub fn clear_caches(&self) -> usize {
        self.indexer.invalidate_all() + self.metadata.clear()
    }

    pub fn preload(&self) -> GalleryResult<PreloadReport> {
        let options = PreloadOptions {
            batch_size: self.config.preload_batch_size,
            ..PreloadOptions::default()
        };
        preload(&self.indexer, &self.pipeline, &self.config.placeholder_url, options)
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pipeline.wait_idle(timeout)
    }

    pub fn stats(&self) -> GalleryStats {
        GalleryStats {
            directory_cache: self.indexer.cache_stats(),
            metadata_cache: self.metadata_cache.stats(),
            workers: self.pipeline.stats(),
            walks: self.indexer.walk_count(),
            skipped_entries: self.indexer.skipped_count(),
        }
    }

    /// Stop watching and shut the workers down. Returns the number of queued
    /// jobs that were dropped.
    pub fn shutdown(&self, drain: bool) -> usize {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        let dropped = self.pipeline.shutdown(drain);
        if dropped > 0 {
            warn!(dropped, "thumbnail jobs dropped at shutdown");
        }
        info!("gallery stopped");
        dropped
    }
}
