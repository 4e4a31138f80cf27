pub mod extractor;
pub mod metadata;
pub mod preload;
pub mod scanner;
pub mod thumbnail;

pub use extractor::{check_ffmpeg, FfmpegGenerator, ThumbnailGenerator, ThumbnailSpec};
pub use metadata::{MediaMetadata, MetadataCache, MetadataService};
pub use preload::{preload, PreloadOptions, PreloadReport};
pub use scanner::{sorted_view, DirectoryCache, DirectoryIndexer, ScanOptions, SortMode};
pub use thumbnail::{thumbnail_path_for, PipelineOptions, ThumbnailPipeline};
