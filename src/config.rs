//! Environment driven configuration for the CLI.

use crate::model::{DEFAULT_PAGE_SIZE, ModelConfig};
use std::env;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

pub const DIR_ENV: &str = "QUICK_TAGS_DIR";
pub const PAGE_SIZE_ENV: &str = "QUICK_TAGS_PAGE_SIZE";
pub const LOG_ENV: &str = "QUICK_TAGS_LOG";

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: PathBuf,
    pub page_size: usize,
    pub use_color: bool,
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Ok(Self {
            dir: tags_dir()?,
            page_size: parse_page_size(env::var(PAGE_SIZE_ENV).ok().as_deref()),
            use_color: env::var("NO_COLOR").is_err(),
        })
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig { page_size: self.page_size, ..ModelConfig::default() }
    }
}

fn tags_dir() -> io::Result<PathBuf> {
    if let Ok(dir) = env::var(DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = env::var("HOME").map_err(|_| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("HOME not set; set {DIR_ENV} explicitly"),
        )
    })?;
    Ok(PathBuf::from(home).join(".quick_tags"))
}

/// Unparseable or zero values fall back to the default.
fn parse_page_size(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

/// Install the stderr log subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_parsing() {
        assert_eq!(parse_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("25")), 25);
        assert_eq!(parse_page_size(Some("0")), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("lots")), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_model_config_carries_page_size() {
        let config = Config { dir: PathBuf::from("/tmp/x"), page_size: 7, use_color: false };
        assert_eq!(config.model_config().page_size, 7);
    }
}
