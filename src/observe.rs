//! Run-level events, decoupled from how they are reported.

use crate::run::RunStats;
use std::path::Path;
use tracing::{info, warn};

/// Receives progress events from the coordinator and the orchestrator.
pub trait Observer: Send + Sync {
    fn run_started(&self, _base_url: &str, _documents: usize) {}
    fn document_started(&self, _index: usize, _total: usize, _url: &str) {}
    fn language_detected(&self, _url: &str, _language: &str) {}
    fn placed(&self, _path: &Path, _primary: bool) {}
    fn document_failed(&self, _url: &str, _reason: &str) {}
    fn run_finished(&self, _stats: &RunStats, _output_dir: &Path) {}
}

/// Discards every event.
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Reports events through `tracing`.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn run_started(&self, base_url: &str, documents: usize) {
        info!("Base URL: {}", base_url);
        info!("Collected {} text links", documents);
    }

    fn document_started(&self, index: usize, total: usize, url: &str) {
        info!("[{}/{}] {}", index, total, url);
    }

    fn language_detected(&self, url: &str, language: &str) {
        info!("Detected single-language page ({}): {}", language, url);
    }

    fn placed(&self, path: &Path, primary: bool) {
        if primary {
            info!("Placed {}", path.display());
        } else {
            info!("Copied to {}", path.display());
        }
    }

    fn document_failed(&self, url: &str, reason: &str) {
        warn!("Failed {}: {}", url, reason);
    }

    fn run_finished(&self, stats: &RunStats, output_dir: &Path) {
        info!("Total texts processed: {}", stats.total);
        info!("Successfully downloaded: {}", stats.succeeded);
        info!("Failed: {}", stats.failed);
        info!("Output directory: {}", output_dir.display());
    }
}
