use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use home_gallery::media::{thumbnail_path_for, DirectoryCache, PipelineOptions};
use home_gallery::security::is_allowed_extension;
use home_gallery::{
    sorted_view, DirectoryIndexer, ExpiringCache, GalleryError, GalleryResult, ManualClock,
    PathGuard, SortMode, ThumbnailGenerator, ThumbnailPipeline, ThumbnailReference,
};
use tempfile::TempDir;

const PLACEHOLDER: &str = "placeholder://x";

#[derive(Default)]
struct PngStub {
    calls: AtomicUsize,
}

impl ThumbnailGenerator for PngStub {
    fn generate(&self, _source: &Path, target: &Path) -> GalleryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(target, b"\x89PNG").map_err(|err| GalleryError::Io {
            operation: "write",
            path: target.to_path_buf(),
            source: err,
        })
    }
}

/// `media/a.jpg`, `media/sub/b.mp4`, and a link escaping to a secret file.
fn media_fixture() -> (TempDir, PathGuard) {
    let temp = tempfile::Builder::new().prefix("gallery-e2e-").tempdir().unwrap();
    let media = temp.path().join("media");
    fs::create_dir_all(media.join("sub")).unwrap();
    fs::write(media.join("a.jpg"), b"jpeg").unwrap();
    fs::write(media.join("sub").join("b.mp4"), b"mp4").unwrap();

    let etc = temp.path().join("etc");
    fs::create_dir_all(&etc).unwrap();
    fs::write(etc.join("passwd"), b"root:x:0:0").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(etc.join("passwd"), media.join("sub").join("passwd.jpg")).unwrap();

    let guard = PathGuard::new(&media).unwrap();
    (temp, guard)
}

fn indexer(guard: &PathGuard) -> DirectoryIndexer {
    DirectoryIndexer::new(
        guard.clone(),
        Arc::new(DirectoryCache::new(Duration::from_secs(300))),
    )
}

#[test]
fn scan_excludes_links_leaving_the_root() {
    let (_temp, guard) = media_fixture();
    let indexer = indexer(&guard);

    let paths: Vec<String> = indexer
        .scan(None)
        .unwrap()
        .into_iter()
        .map(|entry| entry.relative_path)
        .collect();
    assert_eq!(paths, vec!["a.jpg", "sub/b.mp4"]);

    #[cfg(unix)]
    assert_eq!(indexer.skipped_count(), 1);
}

#[test]
fn traversal_is_rejected_in_every_spelling() {
    let (_temp, guard) = media_fixture();
    for input in [
        "../etc/passwd",
        "sub/../../etc/passwd",
        "%2e%2e/etc/passwd",
        "sub%2F..%2F..%2Fetc%2Fpasswd",
        "..\\etc\\passwd",
        "sub\\..\\..\\etc/passwd",
    ] {
        assert!(guard.resolve(input).is_err(), "{input} resolved");
    }

    let resolved = guard.resolve("sub/./b.mp4").unwrap();
    let again = guard.resolve(resolved.relative()).unwrap();
    assert_eq!(resolved, again);
    assert_eq!(resolved.as_path(), guard.root().join("sub").join("b.mp4"));
}

#[test]
fn ensure_serves_placeholder_then_the_generated_file() {
    let (temp, guard) = media_fixture();
    let generator = Arc::new(PngStub::default());
    let pipeline = ThumbnailPipeline::new(
        guard.clone(),
        temp.path().join("thumbs"),
        generator.clone(),
        PipelineOptions::default(),
    )
    .unwrap();

    let source = guard.resolve("sub/b.mp4").unwrap();
    let thumbnail = thumbnail_path_for(pipeline.thumbnail_root(), source.relative());
    assert!(thumbnail.ends_with("sub/b.mp4.png"));

    let first = pipeline.ensure(&source, &thumbnail, PLACEHOLDER).unwrap();
    assert_eq!(first, ThumbnailReference::Placeholder(PLACEHOLDER.to_string()));
    pipeline.ensure(&source, &thumbnail, PLACEHOLDER).unwrap();
    assert_eq!(pipeline.queue_len(), 1);

    pipeline.start().unwrap();
    assert!(pipeline.wait_idle(Duration::from_secs(10)));

    let second = pipeline.ensure(&source, &thumbnail, PLACEHOLDER).unwrap();
    assert_eq!(second, ThumbnailReference::Ready(thumbnail.clone()));
    assert_eq!(fs::read(&thumbnail).unwrap(), b"\x89PNG");
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.shutdown(true), 0);
}

#[test]
fn extension_allowlist_is_case_insensitive() {
    let allow = home_gallery::models::MEDIA_EXTENSIONS;
    assert!(!is_allowed_extension("photo.PHP", allow));
    assert!(is_allowed_extension("photo.JPG", allow));
    assert!(!is_allowed_extension("photo.jpg.php", allow));
    assert!(!is_allowed_extension("jpg", allow));
}

#[test]
fn repeated_scans_within_ttl_walk_once() {
    let (_temp, guard) = media_fixture();
    let indexer = indexer(&guard);

    let first = indexer.scan(Some("sub")).unwrap();
    let second = indexer.scan(Some("sub")).unwrap();
    assert_eq!(first, second);
    assert_eq!(indexer.walk_count(), 1);

    for folder in indexer.list_subfolders(None).unwrap() {
        for entry in indexer.scan(Some(&folder)).unwrap() {
            assert!(entry.relative_path.starts_with(&format!("{folder}/")));
        }
    }
}

#[test]
fn expired_entries_are_absent() {
    let clock = ManualClock::new();
    let cache: ExpiringCache<&str, u32> =
        ExpiringCache::with_clock(Duration::from_secs(1), Arc::new(clock.clone()));
    cache.set("key", 7);
    assert_eq!(cache.get("key"), Some(7));

    clock.advance(Duration::from_millis(1001));
    assert_eq!(cache.get("key"), None);
    assert!(cache.is_empty());
}

#[test]
fn concurrent_random_views_leave_the_cache_untouched() {
    let (_temp, guard) = media_fixture();
    for i in 0..50 {
        fs::write(guard.root().join(format!("p{i:02}.png")), b"p").unwrap();
    }
    let indexer = Arc::new(indexer(&guard));
    indexer.scan(None).unwrap();
    let cached = indexer.cached(None, true).unwrap();
    let snapshot = cached.as_ref().clone();

    let expected = snapshot.len();
    std::thread::scope(|scope| {
        for _ in 0..2 {
            let cached = Arc::clone(&cached);
            scope.spawn(move || {
                for _ in 0..20 {
                    let view = sorted_view(&cached, SortMode::Random);
                    assert_eq!(view.len(), expected);
                }
            });
        }
    });

    assert_eq!(*indexer.cached(None, true).unwrap(), snapshot);
}
