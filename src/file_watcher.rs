use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use tracing::{debug, info, warn};

use crate::error::{GalleryError, GalleryResult};
use crate::media::{DirectoryIndexer, MetadataService};
use crate::models::MediaKind;

const DEBOUNCE: Duration = Duration::from_secs(2);

/// Drops cached listings and metadata affected by filesystem changes.
pub struct CacheInvalidator {
    root: PathBuf,
    indexer: Arc<DirectoryIndexer>,
    metadata: Arc<MetadataService>,
}

impl CacheInvalidator {
    pub fn new(indexer: Arc<DirectoryIndexer>, metadata: Arc<MetadataService>) -> Self {
        Self {
            root: indexer.guard().root().to_path_buf(),
            indexer,
            metadata,
        }
    }

    /// Apply one change event. Returns how many cache entries were dropped.
    pub fn handle_event(&self, event: &Event) -> usize {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
            _ => return 0,
        }

        let mut dropped = 0;
        for path in &event.paths {
            if !path.starts_with(&self.root) || !affects_listings(path) {
                continue;
            }
            debug!(path = %path.display(), kind = ?event.kind, "media change detected");

            if self.metadata.invalidate(path) {
                dropped += 1;
            }
            dropped += self.invalidate_ancestors(path);
        }
        dropped
    }

    fn invalidate_ancestors(&self, path: &Path) -> usize {
        let mut dropped = 0;
        for dir in path.ancestors().skip(1) {
            if !dir.starts_with(&self.root) {
                break;
            }
            if self.indexer.invalidate_dir(dir) {
                dropped += 1;
            }
        }
        dropped
    }
}

/// Media files, directories, and anything without an extension (which may
/// have been a directory before it was removed).
fn affects_listings(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    MediaKind::from_name(name).is_some() || path.is_dir() || path.extension().is_none()
}

/// Debounced recursive watcher over the media root.
pub struct MediaWatcher {
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    root: PathBuf,
}

impl MediaWatcher {
    pub fn start(invalidator: Arc<CacheInvalidator>) -> GalleryResult<Self> {
        let root = invalidator.root.clone();
        let handler = Arc::clone(&invalidator);

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let dropped: usize = events
                        .iter()
                        .map(|event| handler.handle_event(&event.event))
                        .sum();
                    if dropped > 0 {
                        info!(events = events.len(), dropped, "cache invalidated by media changes");
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!(error = %error, "media watcher error");
                    }
                }
            }
        })
        .map_err(|source| GalleryError::Watch {
            path: root.clone(),
            source,
        })?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| GalleryError::Watch {
                path: root.clone(),
                source,
            })?;

        info!(root = %root.display(), "watching media directory");
        Ok(Self { debouncer, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(mut self) {
        if let Err(err) = self.debouncer.watcher().unwatch(&self.root) {
            warn!(error = %err, "failed to unwatch media directory");
        }
        info!(root = %self.root.display(), "stopped watching media directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{DirectoryCache, MetadataCache};
    use crate::security::PathGuard;
    use notify::event::{CreateKind, RemoveKind};
    use std::fs;

    fn setup() -> (tempfile::TempDir, Arc<DirectoryIndexer>, Arc<MetadataService>, CacheInvalidator) {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("media");
        fs::create_dir_all(media.join("trips").join("2023")).unwrap();
        fs::write(media.join("trips").join("2023").join("beach.jpg"), b"j").unwrap();
        fs::write(media.join("trips").join("2023").join("notes.txt"), b"t").unwrap();

        let guard = PathGuard::new(&media).unwrap();
        let indexer = Arc::new(DirectoryIndexer::new(
            guard.clone(),
            Arc::new(DirectoryCache::new(Duration::from_secs(300))),
        ));
        let metadata = Arc::new(MetadataService::new(
            guard,
            temp.path().join("thumbs"),
            Arc::new(MetadataCache::new(Duration::from_secs(600))),
        ));
        let invalidator = CacheInvalidator::new(indexer.clone(), metadata.clone());
        (temp, indexer, metadata, invalidator)
    }

    #[test]
    fn new_media_invalidates_every_ancestor_listing() {
        let (_temp, indexer, _metadata, invalidator) = setup();
        indexer.scan(None).unwrap();
        indexer.scan(Some("trips")).unwrap();
        indexer.scan(Some("trips/2023")).unwrap();
        assert_eq!(indexer.cache_stats().size, 3);

        let added = indexer.guard().root().join("trips").join("2023").join("sunset.mp4");
        fs::write(&added, b"v").unwrap();
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(added);

        assert_eq!(invalidator.handle_event(&event), 3);
        assert_eq!(indexer.cache_stats().size, 0);
        assert_eq!(indexer.scan(Some("trips")).unwrap().len(), 2);
    }

    #[test]
    fn removed_media_drops_its_metadata() {
        let (_temp, indexer, metadata, invalidator) = setup();
        metadata.lookup("trips/2023/beach.jpg").unwrap();
        let removed = indexer.guard().root().join("trips").join("2023").join("beach.jpg");
        fs::remove_file(&removed).unwrap();

        let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path(removed);
        assert_eq!(invalidator.handle_event(&event), 1);
        assert!(metadata.lookup("trips/2023/beach.jpg").is_err());
    }

    #[test]
    fn unrelated_changes_are_ignored() {
        let (temp, indexer, _metadata, invalidator) = setup();
        indexer.scan(None).unwrap();

        let notes = indexer.guard().root().join("trips").join("2023").join("notes.txt");
        let outside = temp.path().join("elsewhere.jpg");
        let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(notes)
            .add_path(outside);
        assert_eq!(invalidator.handle_event(&event), 0);

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(indexer.guard().root().join("a.jpg"));
        assert_eq!(invalidator.handle_event(&access), 0);
        assert_eq!(indexer.cache_stats().size, 1);
    }
}
