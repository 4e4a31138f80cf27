//! Indexing and thumbnail pipeline behind a local home media gallery.
//!
//! Untrusted paths go through [`security::PathGuard`]; directory listings are
//! memoized in [`cache::ExpiringCache`]; video thumbnails are produced by a
//! bounded background [`worker::WorkerPool`]. [`gallery::Gallery`] wires the
//! pieces together from a [`config::Config`].

pub mod cache;
pub mod config;
pub mod error;
pub mod file_watcher;
pub mod gallery;
pub mod logging;
pub mod media;
pub mod models;
pub mod security;
pub mod utils;
pub mod worker;

pub use cache::{CacheStats, Clock, ExpiringCache, ManualClock, MonotonicClock};
pub use config::Config;
pub use error::{ErrorCategory, GalleryError, GalleryResult, Rejection};
pub use gallery::{Gallery, GalleryPage, GalleryQuery, GalleryStats};
pub use media::{
    sorted_view, DirectoryIndexer, ScanOptions, SortMode, ThumbnailGenerator, ThumbnailPipeline,
};
pub use models::{MediaEntry, MediaKind, ThumbnailRecord, ThumbnailReference, ThumbnailState};
pub use security::{PathGuard, ResolvedPath};
