use std::path::Path;

/// BLAKE3 hex digest of a path's bytes.
pub fn hash_path(path: &Path) -> String {
    let hash = blake3::hash(path.as_os_str().as_encoded_bytes());
    hash.to_hex().to_string()
}

/// Generate a shorter hash for cache keys (first 16 chars)
pub fn short_hash(full_hash: &str) -> String {
    full_hash.chars().take(16).collect()
}

/// Cache key for a directory listing. Listings with and without
/// modification times are cached separately.
pub fn directory_cache_key(directory: &Path, with_modified: bool) -> String {
    let suffix = if with_modified { "mtime" } else { "plain" };
    format!("dir:{}:{}", short_hash(&hash_path(directory)), suffix)
}

/// Cache key for per-file metadata.
pub fn file_cache_key(file: &Path) -> String {
    format!("file:{}", short_hash(&hash_path(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_distinct() {
        let media = Path::new("/media");
        assert_eq!(directory_cache_key(media, true), directory_cache_key(media, true));
        assert_ne!(directory_cache_key(media, true), directory_cache_key(media, false));
        assert_ne!(
            directory_cache_key(media, true),
            directory_cache_key(Path::new("/media-evil"), true)
        );
        assert!(file_cache_key(Path::new("/media/a.jpg")).starts_with("file:"));
        assert_eq!(short_hash(&hash_path(media)).len(), 16);
    }
}
