use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};

use crate::error::{GalleryError, GalleryResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub media_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub placeholder_url: String,
    pub items_per_page: usize,
    pub cache_enabled: bool,
    /// Directory listings live this long; metadata lookups twice as long.
    pub cache_ttl_secs: u64,
    pub worker_enabled: bool,
    pub worker_threads: usize,
    pub worker_queue_size: usize,
    pub drain_timeout_secs: u64,
    pub preload_batch_size: usize,
    pub max_video_bytes: u64,
    pub max_video_duration_secs: u64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub follow_symlinks: bool,
    pub watch_media: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let thumbnail_dir = get_default_thumbnail_dir()
            .unwrap_or_else(|_| PathBuf::from(".home-gallery/thumbnails"));

        Self {
            media_dir: PathBuf::from("./media"),
            thumbnail_dir,
            placeholder_url: String::from("https://via.placeholder.com/300x200"),
            items_per_page: 50,
            cache_enabled: true,
            cache_ttl_secs: 300,
            worker_enabled: true,
            worker_threads: 2,
            worker_queue_size: 500,
            drain_timeout_secs: 5,
            preload_batch_size: 500,
            max_video_bytes: 8 * 1024 * 1024 * 1024,
            max_video_duration_secs: 6 * 60 * 60,
            thumbnail_width: 300,
            thumbnail_height: 200,
            follow_symlinks: false,
            watch_media: false,
            log_level: String::from("info"),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults there on first run.
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    /// Check values and prepare directories. The media directory is
    /// canonicalized; the thumbnail directory is created if missing.
    pub fn validate(mut self) -> GalleryResult<Self> {
        let non_zero: [(&'static str, u64); 8] = [
            ("items_per_page", self.items_per_page as u64),
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("worker_threads", self.worker_threads as u64),
            ("worker_queue_size", self.worker_queue_size as u64),
            ("preload_batch_size", self.preload_batch_size as u64),
            ("max_video_duration_secs", self.max_video_duration_secs),
            ("thumbnail_width", u64::from(self.thumbnail_width)),
            ("thumbnail_height", u64::from(self.thumbnail_height)),
        ];
        if let Some(&(field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(GalleryError::InvalidConfig {
                field,
                reason: "must be greater than zero",
                value: Some(String::from("0")),
            });
        }

        let media_dir = fs::canonicalize(&self.media_dir).map_err(|_| GalleryError::InvalidConfig {
            field: "media_dir",
            reason: "directory does not exist",
            value: Some(self.media_dir.display().to_string()),
        })?;
        if !media_dir.is_dir() {
            return Err(GalleryError::InvalidConfig {
                field: "media_dir",
                reason: "not a directory",
                value: Some(media_dir.display().to_string()),
            });
        }
        self.media_dir = media_dir;

        fs::create_dir_all(&self.thumbnail_dir).map_err(|_| GalleryError::InvalidConfig {
            field: "thumbnail_dir",
            reason: "cannot create directory",
            value: Some(self.thumbnail_dir.display().to_string()),
        })?;
        if let Ok(thumbnail_dir) = fs::canonicalize(&self.thumbnail_dir) {
            self.thumbnail_dir = thumbnail_dir;
        }
        if self.thumbnail_dir.starts_with(&self.media_dir) {
            return Err(GalleryError::InvalidConfig {
                field: "thumbnail_dir",
                reason: "must not live inside the media directory",
                value: Some(self.thumbnail_dir.display().to_string()),
            });
        }

        Ok(self)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.saturating_mul(2))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
    Ok(home.join(".home-gallery").join("config.toml"))
}

pub fn get_default_thumbnail_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
    Ok(home.join(".home-gallery").join("thumbnails"))
}
