use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::browser::Session;
use crate::download::{Orchestrator, Timing};
use crate::error::{Result, ScrapeError};
use crate::lotsawa::{collect_links, expand_all, DocumentLink};
use crate::observe::Observer;

/// Per-run counters: one increment of `succeeded` or `failed` per document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Processes documents one after the other, carrying on past failures.
pub struct Coordinator<'a, S: Session + ?Sized> {
    orchestrator: Orchestrator<'a, S>,
    output_dir: PathBuf,
    delay: Duration,
    cancel: &'a AtomicBool,
    observer: &'a dyn Observer,
}

impl<'a, S: Session + ?Sized> Coordinator<'a, S> {
    pub fn new(
        session: &'a mut S,
        output_dir: &Path,
        timing: Timing,
        cancel: &'a AtomicBool,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(session, output_dir, timing, observer).with_cancel(cancel),
            output_dir: output_dir.to_path_buf(),
            delay: timing.delay,
            cancel,
            observer,
        }
    }

    /// Runs every link in order. Only a fatal error (a dead browser session
    /// or an interrupt) stops early; the stats gathered so far are still
    /// reported before that error is returned.
    pub async fn run_all(&mut self, links: &[DocumentLink]) -> Result<RunStats> {
        let mut stats = RunStats {
            total: links.len(),
            ..Default::default()
        };

        let mut outcome = Ok(());
        for (idx, link) in links.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Scraping interrupted by user");
                outcome = Err(ScrapeError::Interrupted);
                break;
            }
            self.observer.document_started(idx + 1, stats.total, &link.url);

            if link.topics.is_empty() {
                warn!("No subheading found; skipping");
                self.observer.document_failed(&link.url, "no topic label");
                stats.failed += 1;
            } else {
                match self.orchestrator.process(link).await {
                    Ok(result) => {
                        debug!("{} -> {}", result.source_url, result.final_path.display());
                        if let Some(counterpart) = &result.counterpart {
                            debug!("Tibetan counterpart: {}", counterpart.display());
                        }
                        stats.succeeded += 1;
                    }
                    Err(e) => {
                        stats.failed += 1;
                        self.observer.document_failed(&link.url, &e.to_string());
                        if e.is_fatal() {
                            error!("Stopping run: {}", e);
                            outcome = Err(e);
                            break;
                        }
                    }
                }
            }

            async_std::task::sleep(self.delay).await;
        }

        info!("SCRAPING COMPLETE");
        self.observer.run_finished(&stats, &self.output_dir);
        outcome.map(|_| stats)
    }
}

/// Records an interrupt request. Returns true when one was already pending,
/// meaning the user asked twice and the process should exit right away.
pub fn request_cancel(cancel: &AtomicBool) -> bool {
    cancel.swap(true, Ordering::SeqCst)
}

/// Expands the landing page, collects its links and downloads every one.
///
/// A landing page without sections yields an empty run rather than an error.
pub async fn scrape<S: Session + ?Sized>(
    session: &mut S,
    base_url: &str,
    output_dir: &Path,
    timing: Timing,
    cancel: &AtomicBool,
    observer: &dyn Observer,
) -> Result<RunStats> {
    let links = match expand_all(session, base_url, timing.wait_timeout, timing.delay).await {
        Ok(_) => collect_links(session, base_url).await?,
        Err(e @ ScrapeError::SectionsNotFound { .. }) => {
            error!("{}", e);
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    observer.run_started(base_url, links.len());

    Coordinator::new(session, output_dir, timing, cancel, observer)
        .run_all(&links)
        .await
}
