use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::{CacheStats, ExpiringCache};
use crate::error::{GalleryError, GalleryResult};
use crate::models::{MediaEntry, MediaKind, MEDIA_EXTENSIONS};
use crate::security::{is_allowed_extension, relative_string, PathGuard, ResolvedPath};
use crate::utils::directory_cache_key;

/// Cached listings are shared read-only; callers always get their own copy.
pub type DirectoryCache = ExpiringCache<String, Arc<Vec<MediaEntry>>>;

/// Ordering applied on top of a scan result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Scan order (file-name order within each directory).
    #[default]
    Default,
    Random,
    /// Newest modification time first, ties by path.
    Newest,
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "" | "default" => Ok(SortMode::Default),
            "random" | "shuffle" => Ok(SortMode::Random),
            "new" | "newest" => Ok(SortMode::Newest),
            other => Err(format!("unknown sort mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub use_cache: bool,
    /// Stat each file for its modification time.
    pub with_modified: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            with_modified: true,
        }
    }
}

/// Walks the media root through a [`PathGuard`] and memoizes listings.
pub struct DirectoryIndexer {
    guard: PathGuard,
    cache: Arc<DirectoryCache>,
    cache_enabled: bool,
    walks: AtomicUsize,
    skipped: AtomicUsize,
}

impl DirectoryIndexer {
    pub fn new(guard: PathGuard, cache: Arc<DirectoryCache>) -> Self {
        Self {
            guard,
            cache,
            cache_enabled: true,
            walks: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    /// Disable memoization entirely, regardless of per-call options.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Media under `subfolder` (or the whole root), with default options.
    pub fn scan(&self, subfolder: Option<&str>) -> GalleryResult<Vec<MediaEntry>> {
        self.scan_with(subfolder, ScanOptions::default())
    }

    pub fn scan_with(
        &self,
        subfolder: Option<&str>,
        options: ScanOptions,
    ) -> GalleryResult<Vec<MediaEntry>> {
        let directory = self.resolve_dir(subfolder)?;
        let listing = self.listing(&directory, options)?;
        Ok(listing.as_ref().clone())
    }

    /// The cached listing for `subfolder`, if one is live. For inspection;
    /// the returned list is shared and immutable.
    pub fn cached(&self, subfolder: Option<&str>, with_modified: bool) -> Option<Arc<Vec<MediaEntry>>> {
        let directory = self.guard.resolve(subfolder.unwrap_or_default()).ok()?;
        self.cache
            .get(&directory_cache_key(directory.as_path(), with_modified))
    }

    /// Immediate child directories of `subfolder`, by name.
    pub fn list_subfolders(&self, subfolder: Option<&str>) -> GalleryResult<BTreeSet<String>> {
        let directory = self.resolve_dir(subfolder)?;
        let read_dir = fs::read_dir(directory.as_path())
            .map_err(|source| GalleryError::io("read_dir", directory.as_path(), source))?;

        let mut folders = BTreeSet::new();
        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %directory.as_path().display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let is_dir = match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => true,
                Ok(file_type) if file_type.is_symlink() && self.guard.follows_symlinks() => {
                    self.guard.resolve_absolute(&entry.path()).is_ok() && entry.path().is_dir()
                }
                _ => false,
            };
            if is_dir {
                folders.insert(name);
            }
        }
        Ok(folders)
    }

    /// Forget cached listings of `directory` (an absolute path under the
    /// root). Returns whether anything was removed.
    pub fn invalidate_dir(&self, directory: &Path) -> bool {
        let with = self.cache.invalidate(&directory_cache_key(directory, true));
        let without = self.cache.invalidate(&directory_cache_key(directory, false));
        with || without
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.clear()
    }

    /// Number of filesystem walks performed so far.
    pub fn walk_count(&self) -> usize {
        self.walks.load(Ordering::Relaxed)
    }

    /// Entries skipped because of per-file errors or rejected links.
    pub fn skipped_count(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn resolve_dir(&self, subfolder: Option<&str>) -> GalleryResult<ResolvedPath> {
        let input = subfolder.unwrap_or_default();
        let directory = self.guard.resolve(input).map_err(|reason| {
            if reason.is_security_relevant() {
                warn!(input, %reason, "rejected folder path");
            } else {
                debug!(input, %reason, "folder not resolvable");
            }
            GalleryError::rejected(input, reason)
        })?;

        if !directory.as_path().is_dir() {
            return Err(GalleryError::NotFound {
                path: directory.into_path_buf(),
            });
        }
        Ok(directory)
    }

    fn listing(
        &self,
        directory: &ResolvedPath,
        options: ScanOptions,
    ) -> GalleryResult<Arc<Vec<MediaEntry>>> {
        let use_cache = self.cache_enabled && options.use_cache;
        let key = directory_cache_key(directory.as_path(), options.with_modified);

        if use_cache {
            if let Some(listing) = self.cache.get(&key) {
                debug!(dir = directory.relative(), entries = listing.len(), "directory cache hit");
                return Ok(listing);
            }
        }

        let listing = Arc::new(self.walk(directory, options.with_modified)?);
        if use_cache {
            self.cache.set(key, Arc::clone(&listing));
        }
        Ok(listing)
    }

    fn walk(&self, directory: &ResolvedPath, with_modified: bool) -> GalleryResult<Vec<MediaEntry>> {
        self.walks.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let follow = self.guard.follows_symlinks();
        let mut skipped = 0usize;
        let mut pruned = 0usize;

        let mut candidates: Vec<(PathBuf, MediaKind)> = Vec::new();
        let walker = WalkDir::new(directory.as_path())
            .follow_links(follow)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Linked directories are checked before descending into them.
                if !follow || entry.depth() == 0 || !entry.path_is_symlink() {
                    return true;
                }
                if self.guard.resolve_absolute(entry.path()).is_ok() {
                    return true;
                }
                warn!(path = %entry.path().display(), "skipping link that leaves the media root");
                pruned += 1;
                false
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(GalleryError::Walk {
                        path: directory.as_path().to_path_buf(),
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(path = ?err.path(), error = %err, "skipping unreadable entry");
                    skipped += 1;
                    continue;
                }
            };

            if entry.path_is_symlink() && !follow {
                warn!(path = %entry.path().display(), "skipping symbolic link");
                skipped += 1;
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str() else {
                warn!(path = %entry.path().display(), "skipping non-UTF-8 file name");
                skipped += 1;
                continue;
            };
            if !is_allowed_extension(name, MEDIA_EXTENSIONS) {
                continue;
            }
            let Some(kind) = MediaKind::from_name(name) else {
                continue;
            };

            if follow && self.guard.resolve_absolute(entry.path()).is_err() {
                warn!(path = %entry.path().display(), "skipping link that leaves the media root");
                skipped += 1;
                continue;
            }

            candidates.push((entry.into_path(), kind));
        }

        let failures = AtomicUsize::new(0);
        let entries: Vec<MediaEntry> = candidates
            .par_iter()
            .filter_map(|(path, kind)| match self.describe(path, *kind, with_modified) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable media file");
                    failures.fetch_add(1, Ordering::Relaxed);
                    None
                }
            })
            .collect();

        skipped += pruned + failures.into_inner();
        self.skipped.fetch_add(skipped, Ordering::Relaxed);

        info!(
            dir = directory.relative(),
            entries = entries.len(),
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "directory scanned"
        );
        Ok(entries)
    }

    fn describe(&self, path: &Path, kind: MediaKind, with_modified: bool) -> GalleryResult<MediaEntry> {
        let relative = path
            .strip_prefix(self.guard.root())
            .ok()
            .and_then(relative_string)
            .ok_or_else(|| GalleryError::NotFound {
                path: path.to_path_buf(),
            })?;

        let modified_at = if with_modified {
            let metadata =
                fs::metadata(path).map_err(|source| GalleryError::io("metadata", path, source))?;
            let modified = metadata
                .modified()
                .map_err(|source| GalleryError::io("modified", path, source))?;
            Some(DateTime::<Utc>::from(modified))
        } else {
            None
        };

        Ok(MediaEntry::new(relative, kind, modified_at))
    }
}

/// A freshly allocated ordering of `entries`; the input is never touched.
pub fn sorted_view(entries: &[MediaEntry], mode: SortMode) -> Vec<MediaEntry> {
    let mut view = entries.to_vec();
    match mode {
        SortMode::Default => {}
        SortMode::Random => view.shuffle(&mut rand::thread_rng()),
        SortMode::Newest => view.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        }),
    }
    view
}
