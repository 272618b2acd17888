use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while scraping.
///
/// Only [`ScrapeError::Browser`] and [`ScrapeError::Interrupted`] end a run;
/// the rest are per-document or per-step failures.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("sections container `{selector}` not found on {url}")]
    SectionsNotFound { url: String, selector: String },

    #[error("could not load {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("download control not found on {url}")]
    DownloadControlNotFound { url: String },

    #[error("timed out after {secs}s waiting for a download from {url}")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("failed to place {path}: {source}")]
    Placement {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    pub fn browser(err: impl std::fmt::Display) -> Self {
        ScrapeError::Browser(err.to_string())
    }

    /// Whether the whole run has to stop, as opposed to a single document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScrapeError::Browser(_) | ScrapeError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
