use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use home_gallery::config::{get_config_path, Config};
use home_gallery::logging::init_logging;
use home_gallery::Gallery;

/// Upper bound for the startup preload to finish generating thumbnails.
const PRELOAD_WAIT: Duration = Duration::from_secs(60 * 60);

fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_logging(&config.log_level)?;
    if let Some(path) = config_path.or_else(|| get_config_path().ok()) {
        info!(config = %path.display(), "configuration loaded");
    }

    let gallery = Gallery::build(config).context("building gallery")?;
    gallery.start().context("starting gallery")?;

    match gallery.preload() {
        Ok(report) => info!(
            indexed = report.indexed,
            queued = report.queued,
            present = report.already_present,
            "preload finished"
        ),
        Err(err) => error!(error = %err, "preload failed"),
    }

    if gallery.config().worker_enabled && !gallery.wait_idle(PRELOAD_WAIT) {
        error!("thumbnail queue did not drain in time");
    }

    let stats = gallery.stats();
    info!(
        walks = stats.walks,
        completed = stats.workers.completed,
        failed = stats.workers.failed,
        "gallery statistics"
    );
    debug!(stats = %serde_json::to_string(&stats)?, "statistics snapshot");

    gallery.shutdown(true);
    Ok(())
}
