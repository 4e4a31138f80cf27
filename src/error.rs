//! Errors for the indexing and thumbnail pipeline.
//!
//! Messages are constant; the offending path travels as a field so logs can
//! record it while user-facing responses only see an [`ErrorCategory`].

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations.
pub type GalleryResult<T> = Result<T, GalleryError>;

/// Why an untrusted path was refused by the path guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The path resolves outside the media root.
    #[error("path escapes the media root")]
    Traversal,
    /// A component of the path is a symbolic link and links are not followed.
    #[error("symbolic links are not allowed")]
    Symlink,
    /// The path does not exist or could not be canonicalized.
    #[error("path does not exist")]
    NotFound,
    /// The media root itself is gone.
    #[error("media root is missing")]
    RootMissing,
    /// Escape sequences or characters that cannot form a path.
    #[error("path is not valid")]
    InvalidEncoding,
    /// The file name does not carry an allowed media extension.
    #[error("file type is not allowed")]
    DisallowedExtension,
}

impl Rejection {
    /// User-safe category for this rejection.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::Traversal | Self::Symlink => ErrorCategory::AccessDenied,
            Self::NotFound | Self::RootMissing => ErrorCategory::NotFound,
            Self::InvalidEncoding | Self::DisallowedExtension => ErrorCategory::InvalidType,
        }
    }

    /// Whether the rejection points at a possible attack rather than a typo.
    #[must_use]
    pub fn is_security_relevant(self) -> bool {
        matches!(self, Self::Traversal | Self::Symlink | Self::InvalidEncoding)
    }
}

/// Coarse error classes safe to show to gallery visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    AccessDenied,
    InvalidType,
    Unavailable,
    Internal,
}

/// Errors produced by the gallery pipeline.
#[derive(Debug, Error)]
pub enum GalleryError {
    /// An untrusted path failed validation.
    #[error("path rejected")]
    Rejected {
        /// The input as received.
        input: String,
        /// Reason for the rejection.
        reason: Rejection,
    },
    /// A directory that must exist for the request is missing.
    #[error("directory not found")]
    NotFound {
        /// Directory that was expected.
        path: PathBuf,
    },
    /// IO failures while interacting with the filesystem.
    #[error("gallery io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The directory walk failed at its root.
    #[error("directory walk failure")]
    Walk {
        /// Root of the walk.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Image decoding or encoding failures.
    #[error("image processing failure")]
    Image {
        /// Image that was being processed.
        path: PathBuf,
        /// Underlying image error.
        source: image::ImageError,
    },
    /// Frame extraction could not produce a thumbnail.
    #[error("thumbnail generation failed")]
    Thumbnail {
        /// Source media file.
        path: PathBuf,
        /// Static reason for the failure.
        reason: &'static str,
        /// Extra detail such as tool output, when available.
        detail: Option<String>,
    },
    /// The worker pool is not accepting jobs.
    #[error("thumbnail workers unavailable")]
    WorkerUnavailable {
        /// Static reason the job was refused.
        reason: &'static str,
    },
    /// Configuration validation failures.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// File watcher failures.
    #[error("media watcher failure")]
    Watch {
        /// Path being watched.
        path: PathBuf,
        /// Underlying notify error.
        source: notify::Error,
    },
}

impl GalleryError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn rejected(input: impl Into<String>, reason: Rejection) -> Self {
        Self::Rejected {
            input: input.into(),
            reason,
        }
    }

    /// User-safe category; never includes filesystem paths.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected { reason, .. } => reason.category(),
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => ErrorCategory::NotFound,
                io::ErrorKind::PermissionDenied => ErrorCategory::AccessDenied,
                _ => ErrorCategory::Internal,
            },
            Self::Walk { source, .. } => match source.io_error().map(io::Error::kind) {
                Some(io::ErrorKind::NotFound) => ErrorCategory::NotFound,
                Some(io::ErrorKind::PermissionDenied) => ErrorCategory::AccessDenied,
                _ => ErrorCategory::Internal,
            },
            Self::WorkerUnavailable { .. } => ErrorCategory::Unavailable,
            Self::Image { .. }
            | Self::Thumbnail { .. }
            | Self::InvalidConfig { .. }
            | Self::Watch { .. } => ErrorCategory::Internal,
        }
    }
}
