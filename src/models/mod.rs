pub mod media;
pub mod thumbnail;

pub use media::{
    GalleryItem, KindFilter, MediaCounts, MediaEntry, MediaKind, IMAGE_EXTENSIONS,
    MEDIA_EXTENSIONS, VIDEO_EXTENSIONS,
};
pub use thumbnail::{ThumbnailRecord, ThumbnailReference, ThumbnailState, WorkItem};
