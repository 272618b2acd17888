use crate::error::{Result, ScrapeError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.lotsawahouse.org/bo/topics/prayers/";
pub const DEFAULT_OUTPUT_DIR: &str = "lotsawahouse_prayers";
/// Longest accepted pause between actions, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Static scraper configuration.
///
/// Loaded from an optional TOML file; command line flags are applied on top
/// with [`ScrapeConfig::apply_overrides`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapeConfig {
    /// Landing page listing every topic section.
    pub base_url: String,

    /// Output root. Also used as the browser's download directory.
    pub output_dir: PathBuf,

    /// Seconds to wait after page loads and between documents.
    pub delay_secs: f64,

    pub headless: bool,

    /// Upper bound for every DOM wait.
    pub wait_timeout_secs: u64,

    /// Upper bound for a single download to land on disk.
    pub download_timeout_secs: u64,

    pub poll_interval_ms: u64,

    pub log_dir: PathBuf,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            delay_secs: 1.0,
            headless: false,
            wait_timeout_secs: 20,
            download_timeout_secs: 120,
            poll_interval_ms: 500,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Values given on the command line; `None` leaves the file/default value alone.
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub delay_secs: Option<f64>,
    pub headless: bool,
}

impl ScrapeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| ScrapeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Loads `path` if given, otherwise starts from the defaults.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(delay) = overrides.delay_secs {
            self.delay_secs = delay;
        }
        if overrides.headless {
            self.headless = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| ScrapeError::Config(format!("base_url `{}`: {}", self.base_url, e)))?;
        if !(0.0..=MAX_DELAY_SECS).contains(&self.delay_secs) {
            return Err(ScrapeError::Config(format!(
                "delay must be between 0 and {} seconds, got {}",
                MAX_DELAY_SECS, self.delay_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ScrapeError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_secs.min(MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
