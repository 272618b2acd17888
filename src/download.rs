//! Per-document download protocol.
//!
//! A document goes through
//! `Navigated -> LanguageNegotiated -> ContentClassified -> DownloadTriggered
//! -> DownloadCompleted -> Placed`; any error returned along the way is the
//! `Failed` outcome. Language negotiation, classification and the Tibetan
//! counterpart fetch are advisory and never fail the document.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::{wait_for, wait_for_url_change, Locator, Session};
use crate::config::ScrapeConfig;
use crate::error::{Result, ScrapeError};
use crate::language::{classify, is_source_language_url, LanguageDir, PageSignals};
use crate::lotsawa::{click_with_fallback, dismiss_cookie_banner, scroll_to, DocumentLink};
use crate::observe::Observer;
use crate::placement::Placer;
use crate::poller::CompletionPoller;
use crate::util::attempt;

pub const LANGUAGE_LIST: &str = "#lang-list";
pub const LANGUAGE_LINK: &str = "#lang-list a";
pub const TIBETAN_LINK: &str = "#lang-list a:has(span.TibetanInlineEnglish)";
pub const MAIN_TEXT: &str = "#maintext";
pub const BO_PARAGRAPH: &str = "#maintext p.bo";
pub const EN_PARAGRAPH: &str = "#maintext p.en";
pub const EN_TRANS_PARAGRAPH: &str = "#maintext p.en-trans";
pub const DOWNLOADS: &str = "#downloads";
pub const DOWNLOAD_LINK: &str = "#downloads a";
pub const EPUB_EXTENSION: &str = "epub";

/// Outcome of a successfully processed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub source_url: String,
    /// Where the download was moved to, in the first topic's folder.
    pub final_path: PathBuf,
    pub language: Option<LanguageDir>,
    /// The Tibetan counterpart, fetched when the page was English-only.
    pub counterpart: Option<PathBuf>,
}

/// Waits and delays used while processing documents.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub delay: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub download_timeout: Duration,
}

impl From<&ScrapeConfig> for Timing {
    fn from(config: &ScrapeConfig) -> Self {
        Self {
            delay: config.delay(),
            wait_timeout: config.wait_timeout(),
            poll_interval: config.poll_interval(),
            download_timeout: config.download_timeout(),
        }
    }
}

enum State {
    Start,
    Navigated,
    LanguageNegotiated,
    ContentClassified {
        language: Option<LanguageDir>,
    },
    DownloadTriggered {
        language: Option<LanguageDir>,
        before: HashSet<PathBuf>,
    },
    DownloadCompleted {
        language: Option<LanguageDir>,
        file: PathBuf,
    },
    Placed(DownloadResult),
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Start => "Start",
            State::Navigated => "Navigated",
            State::LanguageNegotiated => "LanguageNegotiated",
            State::ContentClassified { .. } => "ContentClassified",
            State::DownloadTriggered { .. } => "DownloadTriggered",
            State::DownloadCompleted { .. } => "DownloadCompleted",
            State::Placed(_) => "Placed",
        };
        f.write_str(name)
    }
}

/// Runs the download protocol for one document at a time over a shared
/// session and download directory.
pub struct Orchestrator<'a, S: Session + ?Sized> {
    session: &'a mut S,
    placer: Placer<'a>,
    poller: CompletionPoller,
    timing: Timing,
    observer: &'a dyn Observer,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, S: Session + ?Sized> Orchestrator<'a, S> {
    pub fn new(
        session: &'a mut S,
        output_dir: &Path,
        timing: Timing,
        observer: &'a dyn Observer,
    ) -> Self {
        let poller = CompletionPoller::new(session.download_dir(), EPUB_EXTENSION, timing.poll_interval);
        Self {
            session,
            placer: Placer::new(output_dir, observer),
            poller,
            timing,
            observer,
            cancel: None,
        }
    }

    /// Abandons a pending download wait with `Interrupted` once `cancel` is set.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::SeqCst))
    }

    /// Downloads `link`'s EPUB and places it under every one of its topics.
    pub async fn process(&mut self, link: &DocumentLink) -> Result<DownloadResult> {
        let url = link.url.as_str();
        let mut state = State::Start;
        loop {
            state = match state {
                State::Start => {
                    self.navigate(url).await?;
                    State::Navigated
                }
                State::Navigated => {
                    self.negotiate_language().await;
                    State::LanguageNegotiated
                }
                State::LanguageNegotiated => State::ContentClassified {
                    language: self.classify_content(url).await,
                },
                State::ContentClassified { language } => State::DownloadTriggered {
                    language,
                    before: self.trigger_download(url).await?,
                },
                State::DownloadTriggered { language, before } => State::DownloadCompleted {
                    language,
                    file: self.await_download(url, &before).await?,
                },
                State::DownloadCompleted { language, file } => {
                    info!("Downloaded: {}", file.display());
                    State::Placed(DownloadResult {
                        source_url: link.url.clone(),
                        final_path: self.placer.place(&file, &link.topics, language),
                        language,
                        counterpart: None,
                    })
                }
                State::Placed(mut result) => {
                    if result.language == Some(LanguageDir::English) {
                        result.counterpart = self.fetch_tibetan_counterpart(url).await;
                    }
                    return Ok(result);
                }
            };
            debug!("{} -> {}", url, state);
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        info!("Visiting: {}", url);
        self.session.navigate(url).await?;
        dismiss_cookie_banner(&*self.session).await;
        Ok(())
    }

    /// Switches to the English version of the page when one is offered.
    async fn negotiate_language(&self) -> bool {
        let session = &*self.session;
        wait_for(
            session,
            &Locator::css(LANGUAGE_LIST),
            self.timing.wait_timeout,
            self.timing.poll_interval,
        )
        .await;

        let english = Locator::with_exact_text(LANGUAGE_LINK, "English");
        if !matches!(session.count(&english).await, Ok(n) if n > 0) {
            debug!("No English link; staying on the current page");
            return false;
        }

        info!("Switching to English");
        scroll_to(session, &english).await;
        if !attempt("switching to English", click_with_fallback(session, &english)).await {
            info!("English link click failed; proceeding with the current page");
            return false;
        }

        let english_content = Locator::css(EN_PARAGRAPH);
        let start = Instant::now();
        while start.elapsed() < self.timing.wait_timeout {
            let left_source = matches!(session.current_url().await, Ok(u) if !is_source_language_url(&u));
            let has_english = matches!(session.count(&english_content).await, Ok(n) if n > 0);
            if left_source || has_english {
                break;
            }
            async_std::task::sleep(self.timing.poll_interval).await;
        }
        async_std::task::sleep(self.timing.delay).await;
        true
    }

    async fn page_signals(&self) -> Result<PageSignals> {
        let session = &*self.session;
        wait_for(
            session,
            &Locator::css(MAIN_TEXT),
            self.timing.wait_timeout,
            self.timing.poll_interval,
        )
        .await;

        Ok(PageSignals {
            url: session.current_url().await?,
            has_bo_class: session.count(&Locator::css(BO_PARAGRAPH)).await? > 0,
            has_en_class: session.count(&Locator::css(EN_PARAGRAPH)).await? > 0,
            has_en_trans_class: session.count(&Locator::css(EN_TRANS_PARAGRAPH)).await? > 0,
            main_text: session
                .text(&Locator::css(MAIN_TEXT))
                .await?
                .unwrap_or_default(),
        })
    }

    /// Decides whether the page needs an extra copy in a language folder.
    async fn classify_content(&self, url: &str) -> Option<LanguageDir> {
        let signals = match self.page_signals().await {
            Ok(signals) => signals,
            Err(e) => {
                debug!("Verse tag detection failed; no extra language copy: {}", e);
                return None;
            }
        };
        debug!(
            "Page url='{}', tib_page={} | classes -> bo={}, en={}, en-trans={}",
            signals.url,
            signals.is_source_language_page(),
            signals.has_bo_class,
            signals.has_en_class,
            signals.has_en_trans_class
        );

        let language = classify(&signals);
        if let Some(language) = language {
            self.observer.language_detected(url, language.folder_name());
        }
        language
    }

    /// Clicks the EPUB link and returns the download directory as it was
    /// just before the click.
    async fn trigger_download(&self, url: &str) -> Result<HashSet<PathBuf>> {
        let session = &*self.session;
        let not_found = || ScrapeError::DownloadControlNotFound {
            url: url.to_string(),
        };

        if !wait_for(
            session,
            &Locator::css(DOWNLOADS),
            self.timing.wait_timeout,
            self.timing.poll_interval,
        )
        .await
        {
            warn!("No downloads block on {}", url);
            return Err(not_found());
        }
        dismiss_cookie_banner(session).await;

        let epub = Locator::with_text(DOWNLOAD_LINK, "EPUB");
        if !wait_for(session, &epub, self.timing.wait_timeout, self.timing.poll_interval).await {
            warn!("EPUB button not found on {}", url);
            return Err(not_found());
        }
        scroll_to(session, &epub).await;

        let before = self.poller.snapshot();
        debug!("Clicking EPUB button...");
        click_with_fallback(session, &epub)
            .await
            .map_err(|_| not_found())?;
        Ok(before)
    }

    async fn await_download(&self, url: &str, before: &HashSet<PathBuf>) -> Result<PathBuf> {
        let waited = match self.cancel {
            Some(cancel) => {
                self.poller
                    .wait_until_cancelled(before, self.timing.download_timeout, cancel)
                    .await
            }
            None => {
                self.poller
                    .wait_for_new_stable_file(before, self.timing.download_timeout)
                    .await
            }
        };
        if waited.is_none() && self.cancelled() {
            return Err(ScrapeError::Interrupted);
        }
        waited.ok_or_else(|| {
            warn!("Timed out waiting for download to complete");
            ScrapeError::DownloadTimeout {
                url: url.to_string(),
                secs: self.timing.download_timeout.as_secs(),
            }
        })
    }

    /// Follows the page's Tibetan link and files that EPUB under the
    /// top-level Tibetan folder. Failures are logged and swallowed.
    async fn fetch_tibetan_counterpart(&mut self, url: &str) -> Option<PathBuf> {
        let link = Locator::css(TIBETAN_LINK);
        if !matches!(self.session.count(&link).await, Ok(n) if n > 0) {
            info!("No Tibetan counterpart link on {}", url);
            return None;
        }

        let from = match self.session.current_url().await {
            Ok(from) => from,
            Err(e) => {
                warn!("Cannot read the current URL before switching to Tibetan: {}", e);
                return None;
            }
        };
        scroll_to(&*self.session, &link).await;
        if !attempt("opening Tibetan page", click_with_fallback(&*self.session, &link)).await {
            warn!("Failed to open the Tibetan page from {}", url);
            return None;
        }

        // The English page and its EPUB link stay queryable until the
        // Tibetan page has committed.
        let Some(tibetan_url) = wait_for_url_change(
            &*self.session,
            &from,
            self.timing.wait_timeout,
            self.timing.poll_interval,
        )
        .await
        else {
            warn!("Tibetan page never loaded from {}; skipping counterpart", url);
            return None;
        };

        let fetched = async {
            let before = self.trigger_download(&tibetan_url).await?;
            let file = self.await_download(&tibetan_url, &before).await?;
            self.placer.place_language_only(&file, LanguageDir::Tibetan)
        }
        .await;

        match fetched {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to fetch Tibetan EPUB via language switch: {}", e);
                None
            }
        }
    }
}
