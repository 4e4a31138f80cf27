//! Validation of untrusted paths against the media root.
//!
//! Every filesystem access in the pipeline goes through a [`ResolvedPath`],
//! which only [`PathGuard`] can construct.

use std::borrow::Cow;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{GalleryError, GalleryResult, Rejection};

const DANGEROUS_NAME_PARTS: &[&str] = &["/", "\\", "..", "<", ">", ":", "\"", "|", "?", "*", "\0"];

/// Resolves user-supplied relative paths inside a canonical media root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    follow_symlinks: bool,
}

/// A path proven to live under the guard's root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    absolute: PathBuf,
    relative: String,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }

    /// `/`-separated path relative to the root; empty for the root itself.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.absolute
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.absolute
    }
}

impl PathGuard {
    /// Canonicalize `root` and guard it. Symlinks are not followed unless
    /// [`PathGuard::follow_symlinks`] enables them.
    pub fn new(root: impl AsRef<Path>) -> GalleryResult<Self> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root)
            .map_err(|source| GalleryError::io("canonicalize_root", root, source))?;
        if !canonical.is_dir() {
            return Err(GalleryError::NotFound { path: canonical });
        }

        Ok(Self {
            root: canonical,
            follow_symlinks: false,
        })
    }

    #[must_use]
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn follows_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Resolve an untrusted, possibly percent-encoded relative path.
    ///
    /// Backslashes count as separators. The result must exist; `..` that
    /// climbs above the root, symlinks (unless followed) and canonical
    /// targets outside the root are all rejected.
    pub fn resolve(&self, user_path: &str) -> Result<ResolvedPath, Rejection> {
        let decoded = decode(user_path)?;
        let relative = normalize_segments(&decoded)?;
        self.resolve_normalized(relative)
    }

    /// Resolve an absolute path that claims to live under the root.
    pub fn resolve_absolute(&self, path: &Path) -> Result<ResolvedPath, Rejection> {
        let relative = path.strip_prefix(&self.root).map_err(|_| Rejection::Traversal)?;
        let relative = relative.to_str().ok_or(Rejection::InvalidEncoding)?;
        let relative = normalize_segments(relative)?;
        self.resolve_normalized(relative)
    }

    /// Lexical containment check that touches no filesystem state.
    pub fn contains(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rest) => rest
                .to_str()
                .map(|rest| normalize_segments(rest).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn resolve_normalized(&self, relative: String) -> Result<ResolvedPath, Rejection> {
        if !self.root.is_dir() {
            return Err(Rejection::RootMissing);
        }

        let absolute = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&relative)
        };

        if !self.follow_symlinks {
            self.reject_symlinks(&relative)?;
            return Ok(ResolvedPath { absolute, relative });
        }

        let canonical = fs::canonicalize(&absolute).map_err(|_| Rejection::NotFound)?;
        let rest = canonical
            .strip_prefix(&self.root)
            .map_err(|_| Rejection::Traversal)?;
        let relative = relative_string(rest).ok_or(Rejection::InvalidEncoding)?;

        Ok(ResolvedPath {
            absolute: canonical,
            relative,
        })
    }

    fn reject_symlinks(&self, relative: &str) -> Result<(), Rejection> {
        let mut current = self.root.clone();
        for segment in relative.split('/').filter(|segment| !segment.is_empty()) {
            current.push(segment);
            let metadata = fs::symlink_metadata(&current).map_err(|_| Rejection::NotFound)?;
            if metadata.file_type().is_symlink() {
                return Err(Rejection::Symlink);
            }
        }
        Ok(())
    }
}

/// Case-insensitive suffix match of `filename` against `allowlist`
/// (extensions without the leading dot).
pub fn is_allowed_extension(filename: &str, allowlist: &[&str]) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => allowlist.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Strip separators, parent references and shell-hostile characters from a
/// single file name.
pub fn sanitize_name(filename: &str) -> String {
    DANGEROUS_NAME_PARTS
        .iter()
        .fold(filename.to_string(), |name, part| name.replace(part, ""))
}

fn decode(input: &str) -> Result<Cow<'_, str>, Rejection> {
    urlencoding::decode(input).map_err(|_| Rejection::InvalidEncoding)
}

/// Collapse `.`, `..` and repeated separators without touching the
/// filesystem. Fails if `..` would climb above the starting point.
pub(crate) fn normalize_segments(input: &str) -> Result<String, Rejection> {
    if input.contains('\0') {
        return Err(Rejection::InvalidEncoding);
    }

    let unified = input.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Rejection::Traversal);
                }
            }
            name => {
                // Drive prefixes and other non-plain components.
                if !matches!(Path::new(name).components().next(), Some(Component::Normal(_))) {
                    return Err(Rejection::InvalidEncoding);
                }
                parts.push(name);
            }
        }
    }

    Ok(parts.join("/"))
}

pub(crate) fn relative_string(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IMAGE_EXTENSIONS, MEDIA_EXTENSIONS};
    use anyhow::Result;
    use tempfile::TempDir;

    type TestResult<T> = Result<T>;

    fn media_tree() -> TestResult<(TempDir, PathGuard)> {
        let temp = tempfile::Builder::new().prefix("gallery-guard-").tempdir()?;
        let media = temp.path().join("media");
        fs::create_dir_all(media.join("sub"))?;
        fs::write(media.join("a.jpg"), b"jpg")?;
        fs::write(media.join("sub").join("b.mp4"), b"mp4")?;
        fs::create_dir_all(temp.path().join("media-evil"))?;
        fs::write(temp.path().join("media-evil").join("x.jpg"), b"evil")?;
        fs::write(temp.path().join("secret"), b"secret")?;
        let guard = PathGuard::new(&media)?;
        Ok((temp, guard))
    }

    #[test]
    fn rejects_traversal_in_every_spelling() -> TestResult<()> {
        let (_temp, guard) = media_tree()?;
        for input in [
            "../secret",
            "sub/../../secret",
            "%2e%2e/secret",
            "%2E%2E%2Fsecret",
            "..\\secret",
            "sub\\..\\..\\secret",
            "..%5csecret",
            "/../secret",
            "./sub/./../../secret",
            "../media-evil/x.jpg",
        ] {
            assert_eq!(guard.resolve(input), Err(Rejection::Traversal), "{input}");
        }
        Ok(())
    }

    #[test]
    fn resolves_inside_root_idempotently() -> TestResult<()> {
        let (_temp, guard) = media_tree()?;
        let expected = guard.root().join("sub").join("b.mp4");

        for input in ["sub/b.mp4", "sub/./b.mp4", "sub/../sub/b.mp4", "/sub//b.mp4", "sub\\b.mp4"] {
            let resolved = guard.resolve(input).map_err(anyhow::Error::new)?;
            assert_eq!(resolved.as_path(), expected.as_path(), "{input}");
            assert_eq!(resolved.relative(), "sub/b.mp4");

            let again = guard.resolve(resolved.relative()).map_err(anyhow::Error::new)?;
            assert_eq!(again, resolved);
        }
        Ok(())
    }

    #[test]
    fn empty_path_is_root() -> TestResult<()> {
        let (_temp, guard) = media_tree()?;
        let resolved = guard.resolve("").map_err(anyhow::Error::new)?;
        assert!(resolved.is_root());
        assert_eq!(resolved.as_path(), guard.root());
        Ok(())
    }

    #[test]
    fn rejects_missing_and_malformed_paths() -> TestResult<()> {
        let (_temp, guard) = media_tree()?;
        assert_eq!(guard.resolve("nope.jpg"), Err(Rejection::NotFound));
        assert_eq!(guard.resolve("a.jpg\0.png"), Err(Rejection::InvalidEncoding));
        assert_eq!(guard.resolve("a%00.jpg"), Err(Rejection::InvalidEncoding));
        assert_eq!(guard.resolve("%ff.jpg"), Err(Rejection::InvalidEncoding));
        Ok(())
    }

    #[test]
    fn rejects_when_root_disappears() -> TestResult<()> {
        let (_temp, guard) = media_tree()?;
        fs::remove_dir_all(guard.root())?;
        assert_eq!(guard.resolve("a.jpg"), Err(Rejection::RootMissing));
        Ok(())
    }

    #[test]
    fn absolute_paths_must_stay_under_root() -> TestResult<()> {
        let (temp, guard) = media_tree()?;
        let inside = guard.root().join("sub").join("b.mp4");
        let resolved = guard.resolve_absolute(&inside).map_err(anyhow::Error::new)?;
        assert_eq!(resolved.relative(), "sub/b.mp4");

        let sibling = guard.root().with_file_name("media-evil").join("x.jpg");
        assert_eq!(guard.resolve_absolute(&sibling), Err(Rejection::Traversal));
        assert_eq!(
            guard.resolve_absolute(&guard.root().join("..").join("secret")),
            Err(Rejection::Traversal)
        );
        assert!(!guard.contains(&temp.path().join("secret")));
        assert!(guard.contains(&guard.root().join("not-yet-there.png")));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_rejected_unless_followed() -> TestResult<()> {
        let (temp, guard) = media_tree()?;
        std::os::unix::fs::symlink(temp.path().join("media-evil"), guard.root().join("evil"))?;
        std::os::unix::fs::symlink(guard.root().join("a.jpg"), guard.root().join("alias.jpg"))?;

        assert_eq!(guard.resolve("evil/x.jpg"), Err(Rejection::Symlink));
        assert_eq!(guard.resolve("alias.jpg"), Err(Rejection::Symlink));

        let following = guard.clone().follow_symlinks(true);
        assert_eq!(following.resolve("evil/x.jpg"), Err(Rejection::Traversal));
        let alias = following.resolve("alias.jpg").map_err(anyhow::Error::new)?;
        assert_eq!(alias.relative(), "a.jpg");
        Ok(())
    }

    #[test]
    fn extension_checks_ignore_case() {
        assert!(!is_allowed_extension("photo.PHP", MEDIA_EXTENSIONS));
        assert!(is_allowed_extension("photo.JPG", MEDIA_EXTENSIONS));
        assert!(is_allowed_extension("clip.MkV", MEDIA_EXTENSIONS));
        assert!(!is_allowed_extension("clip.mp4", IMAGE_EXTENSIONS));
        assert!(!is_allowed_extension("jpg", MEDIA_EXTENSIONS));
    }

    #[test]
    fn sanitize_strips_dangerous_parts() {
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("photo<script>.jpg"), "photoscript.jpg");
        assert_eq!(sanitize_name("a|b?c*d:e\"f\0.png"), "abcdef.png");
        assert_eq!(sanitize_name("plain.jpg"), "plain.jpg");
    }
}
