//! Logging utilities for table_sync
//!
//! This module provides logging setup and configuration.

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter applying `level` to this crate on top of `RUST_LOG`
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    let directive = format!("table_sync={}", parse_level(level))
        .parse()
        .map_err(|e| Error::ConfigError(format!("Invalid log directive: {}", e)))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Initialize logging based on configuration.
///
/// Returns `false` when there is no logging section, leaving the caller to
/// install its own default.
pub fn init_logging(config: &Option<LoggingConfig>) -> Result<bool> {
    let Some(config) = config else {
        return Ok(false);
    };

    let env_filter = env_filter(&config.level)?;
    let json = config.format.eq_ignore_ascii_case("json");

    let installed = if let Some(file_path) = &config.file {
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(file_path)?;

        let builder = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(file)
            .with_ansi(false);
        if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        }
    } else if config.stdout {
        let builder = fmt::Subscriber::builder().with_env_filter(env_filter);
        if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        }
    } else {
        return Ok(false);
    };

    installed.map_err(|e| Error::Unknown(e.to_string()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn missing_section_installs_nothing() {
        assert!(!init_logging(&None).unwrap());
    }

    #[test]
    fn builds_crate_filter() {
        let filter = env_filter("warn").unwrap();
        assert!(filter.to_string().to_lowercase().contains("table_sync=warn"));
    }
}
