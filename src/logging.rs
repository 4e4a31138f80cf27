use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Default level when neither the config nor `RUST_LOG` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global fmt subscriber. `RUST_LOG` wins over `level`.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let level = if level.trim().is_empty() {
        DEFAULT_LOG_LEVEL
    } else {
        level
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| anyhow!("invalid log level {level:?}: {err}"))?;

    fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails() {
        let _ = init_logging("debug");
        assert!(init_logging("info").is_err());
    }
}
