use async_trait::async_trait;
use chromiumoxide::{
    browser::BrowserConfig,
    cdp::browser_protocol::browser::{SetDownloadBehaviorBehavior, SetDownloadBehaviorParams},
    Browser, Element, Page,
};
use futures::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};

/// How an element is found: a CSS selector, optionally narrowed down by the
/// element's visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub css: String,
    pub text: Option<TextMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Whitespace-normalized text equals the needle.
    Exact(String),
    Contains(String),
}

impl Locator {
    pub fn css(css: &str) -> Self {
        Self {
            css: css.to_string(),
            text: None,
        }
    }

    pub fn with_text(css: &str, needle: &str) -> Self {
        Self {
            css: css.to_string(),
            text: Some(TextMatch::Contains(needle.to_string())),
        }
    }

    pub fn with_exact_text(css: &str, text: &str) -> Self {
        Self {
            css: css.to_string(),
            text: Some(TextMatch::Exact(text.to_string())),
        }
    }

    pub fn matches_text(&self, text: &str) -> bool {
        match &self.text {
            None => true,
            Some(TextMatch::Contains(needle)) => text.contains(needle.as_str()),
            Some(TextMatch::Exact(expected)) => {
                text.split_whitespace().collect::<Vec<_>>().join(" ") == *expected
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            None => write!(f, "{}", self.css),
            Some(TextMatch::Exact(t)) => write!(f, "{} [text = {:?}]", self.css, t),
            Some(TextMatch::Contains(t)) => write!(f, "{} [text ~ {:?}]", self.css, t),
        }
    }
}

/// A collapsible section as read off the landing page, before any
/// resolution or deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub label: String,
    /// `href` attribute of every document anchor, in page order.
    pub hrefs: Vec<Option<String>>,
}

/// The browser primitives the scraper relies on.
///
/// Every call acts on the first element matching the locator unless stated
/// otherwise.
#[async_trait]
pub trait Session: Send + Sync {
    /// Directory the browser saves downloads into.
    fn download_dir(&self) -> &Path;

    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Number of elements matching the locator.
    async fn count(&self, locator: &Locator) -> Result<usize>;

    async fn is_visible(&self, locator: &Locator) -> Result<bool>;

    async fn text(&self, locator: &Locator) -> Result<Option<String>>;

    /// Native (mouse event) click.
    async fn click(&self, locator: &Locator) -> Result<()>;

    /// `element.click()` from script; not subject to overlays.
    async fn script_click(&self, locator: &Locator) -> Result<()>;

    async fn scroll_into_view(&self, locator: &Locator) -> Result<()>;

    /// Sets an attribute on every match, returns how many were touched.
    async fn set_attribute_all(&self, locator: &Locator, name: &str, value: &str) -> Result<usize>;

    /// Forces `display: none` on the element.
    async fn hide(&self, locator: &Locator) -> Result<()>;

    /// Reads every section matching `section`, its label from `label_css`
    /// and the hrefs of every `anchor_css` inside it.
    async fn sections(
        &self,
        section: &Locator,
        label_css: &str,
        anchor_css: &str,
    ) -> Result<Vec<RawSection>>;

    /// Releases the browser. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Polls until something matches `locator`, returns false on timeout.
pub async fn wait_for<S: Session + ?Sized>(
    session: &S,
    locator: &Locator,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let start = Instant::now();
    loop {
        if matches!(session.count(locator).await, Ok(n) if n > 0) {
            return true;
        }
        if start.elapsed() >= timeout {
            debug!("Timed out after {:?} waiting for {}", timeout, locator);
            return false;
        }
        async_std::task::sleep(interval).await;
    }
}

/// Polls the page URL until it differs from `from`, returns the new URL or
/// `None` on timeout. Clicks return before the navigation they start has
/// committed.
pub async fn wait_for_url_change<S: Session + ?Sized>(
    session: &S,
    from: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<String> {
    let start = Instant::now();
    loop {
        if let Ok(url) = session.current_url().await {
            if url != from {
                return Some(url);
            }
        }
        if start.elapsed() >= timeout {
            debug!("Still on {} after {:?}", from, timeout);
            return None;
        }
        async_std::task::sleep(interval).await;
    }
}

/// Settings for launching a [`ChromiumSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub download_dir: PathBuf,
    pub action_delay: Duration,
}

/// A single Chromium instance with one page and a fixed download directory.
pub struct ChromiumSession {
    browser: Option<Browser>,
    handle: Option<async_std::task::JoinHandle<()>>,
    page: Option<Page>,
    download_dir: PathBuf,
    action_delay: Duration,
}

impl ChromiumSession {
    /// Launches the browser, opens a blank page and routes downloads to
    /// `config.download_dir`.
    pub async fn start(config: &SessionConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(1200, 900)
            .viewport(None)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(ScrapeError::browser)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(ScrapeError::browser)?;

        let handle = async_std::task::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let download_dir = config.download_dir.clone();
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().to_string())
            .build()
            .map_err(ScrapeError::browser)?;
        browser.execute(behavior).await.map_err(ScrapeError::browser)?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(ScrapeError::browser)?;

        info!(
            "Launched browser (headless={}), downloads go to {}",
            config.headless,
            download_dir.display()
        );

        Ok(Self {
            browser: Some(browser),
            handle: Some(handle),
            page: Some(page),
            download_dir,
            action_delay: config.action_delay,
        })
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::browser("session not started"))
    }

    async fn matching(&self, locator: &Locator) -> Result<Vec<Element>> {
        let elements = self
            .page()?
            .find_elements(locator.css.as_str())
            .await
            .map_err(ScrapeError::browser)?;

        if locator.text.is_none() {
            return Ok(elements);
        }

        let mut matched = Vec::new();
        for element in elements {
            let text = element.inner_text().await.ok().flatten().unwrap_or_default();
            if locator.matches_text(&text) {
                matched.push(element);
            }
        }
        Ok(matched)
    }

    async fn first(&self, locator: &Locator) -> Result<Element> {
        self.matching(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScrapeError::browser(format!("no element matches {}", locator)))
    }

    async fn call(&self, locator: &Locator, function: &str) -> Result<Option<serde_json::Value>> {
        let element = self.first(locator).await?;
        let returns = element
            .call_js_fn(function, false)
            .await
            .map_err(ScrapeError::browser)?;
        Ok(returns.result.value)
    }
}

#[async_trait]
impl Session for ChromiumSession {
    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        self.page()?
            .goto(url)
            .await
            .map_err(|e| ScrapeError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        // Let scripts on the page settle before anything queries the DOM.
        async_std::task::sleep(self.action_delay).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page()?
            .url()
            .await
            .map_err(ScrapeError::browser)?
            .unwrap_or_default())
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        Ok(self.matching(locator).await?.len())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        let value = self
            .call(
                locator,
                "function() { \
                    const s = window.getComputedStyle(this); \
                    const r = this.getBoundingClientRect(); \
                    return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0 && r.height > 0; \
                }",
            )
            .await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn text(&self, locator: &Locator) -> Result<Option<String>> {
        match self.matching(locator).await?.into_iter().next() {
            Some(element) => element.inner_text().await.map_err(ScrapeError::browser),
            None => Ok(None),
        }
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        self.first(locator)
            .await?
            .click()
            .await
            .map_err(ScrapeError::browser)?;
        Ok(())
    }

    async fn script_click(&self, locator: &Locator) -> Result<()> {
        self.call(locator, "function() { this.click(); }").await?;
        Ok(())
    }

    async fn scroll_into_view(&self, locator: &Locator) -> Result<()> {
        self.call(locator, "function() { this.scrollIntoView({block: 'center'}); }")
            .await?;
        Ok(())
    }

    async fn set_attribute_all(&self, locator: &Locator, name: &str, value: &str) -> Result<usize> {
        let function = format!(
            "function() {{ this.setAttribute({}, {}); }}",
            serde_json::Value::from(name),
            serde_json::Value::from(value)
        );
        let mut touched = 0;
        for element in self.matching(locator).await? {
            match element.call_js_fn(function.as_str(), false).await {
                Ok(_) => touched += 1,
                Err(e) => debug!("Could not set {} on {}: {}", name, locator, e),
            }
        }
        Ok(touched)
    }

    async fn hide(&self, locator: &Locator) -> Result<()> {
        self.call(locator, "function() { this.style.display = 'none'; }")
            .await?;
        Ok(())
    }

    async fn sections(
        &self,
        section: &Locator,
        label_css: &str,
        anchor_css: &str,
    ) -> Result<Vec<RawSection>> {
        let mut sections = Vec::new();
        for element in self.matching(section).await? {
            let label = match element.find_element(label_css).await {
                Ok(summary) => summary.inner_text().await.ok().flatten().unwrap_or_default(),
                Err(_) => String::new(),
            };

            let mut hrefs = Vec::new();
            for anchor in element.find_elements(anchor_css).await.unwrap_or_default() {
                hrefs.push(anchor.attribute("href").await.ok().flatten());
            }

            sections.push(RawSection {
                label: label.trim().to_string(),
                hrefs,
            });
        }
        Ok(sections)
    }

    async fn close(&mut self) -> Result<()> {
        self.page = None;
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        let closed = browser.close().await.map_err(ScrapeError::browser);
        let _ = browser.wait().await;
        if let Some(handle) = self.handle.take() {
            handle.await;
        }
        info!("Browser closed");
        closed.map(|_| ())
    }
}
