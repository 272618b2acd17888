//! In-memory stand-in for a browser session.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::browser::{Locator, RawSection, Session};
use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone)]
pub enum ClickAction {
    Hide(String),
    Navigate(String),
    /// Navigation that only lands after the page has been queried `after`
    /// more times, like a click that returns before the load commits.
    NavigateLater { url: String, after: usize },
    Download { name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    css: String,
    text: String,
    visible: bool,
    clickable: bool,
    script_clickable: bool,
    actions: Vec<ClickAction>,
}

impl FakeElement {
    pub fn new(css: &str) -> Self {
        Self {
            css: css.to_string(),
            text: String::new(),
            visible: true,
            clickable: true,
            script_clickable: true,
            actions: Vec::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Native clicks fail, script clicks still work.
    pub fn intercepted(mut self) -> Self {
        self.clickable = false;
        self
    }

    pub fn unclickable(mut self) -> Self {
        self.clickable = false;
        self.script_clickable = false;
        self
    }

    pub fn hides_on_click(mut self, css: &str) -> Self {
        self.actions.push(ClickAction::Hide(css.to_string()));
        self
    }

    pub fn navigates_to(mut self, url: &str) -> Self {
        self.actions.push(ClickAction::Navigate(url.to_string()));
        self
    }

    pub fn navigates_after(mut self, url: &str, after: usize) -> Self {
        self.actions.push(ClickAction::NavigateLater {
            url: url.to_string(),
            after,
        });
        self
    }

    pub fn downloads(mut self, name: &str, bytes: &[u8]) -> Self {
        self.actions.push(ClickAction::Download {
            name: name.to_string(),
            bytes: bytes.to_vec(),
        });
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    elements: Vec<FakeElement>,
    sections: Vec<RawSection>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_section(mut self, section: RawSection) -> Self {
        self.sections.push(section);
        self
    }
}

#[derive(Default)]
struct State {
    current: Option<String>,
    pending: Option<(String, usize)>,
    visited: Vec<String>,
    clicks: Vec<String>,
    attribute_writes: Vec<(String, String)>,
    close_calls: usize,
    closed: bool,
}

pub struct FakeSession {
    pages: Mutex<HashMap<String, FakePage>>,
    state: Mutex<State>,
    download_dir: PathBuf,
    _dir: Option<tempfile::TempDir>,
}

impl FakeSession {
    /// A session downloading into a fresh temporary directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            pages: Mutex::new(HashMap::new()),
            state: Mutex::new(State::default()),
            download_dir: dir.path().to_path_buf(),
            _dir: Some(dir),
        }
    }

    pub fn with_page(self, url: &str, page: FakePage) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), page);
        self
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn attribute_writes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().attribute_writes.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    fn current(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ScrapeError::browser("session not started"));
        }
        match state.pending.take() {
            Some((url, after)) if after <= 1 => {
                state.visited.push(url.clone());
                state.current = Some(url);
            }
            Some((url, after)) => state.pending = Some((url, after - 1)),
            None => {}
        }
        state
            .current
            .clone()
            .ok_or_else(|| ScrapeError::browser("no page loaded"))
    }

    fn with_matches<T>(&self, locator: &Locator, f: impl FnOnce(Vec<&mut FakeElement>) -> T) -> Result<T> {
        let url = self.current()?;
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .get_mut(&url)
            .ok_or_else(|| ScrapeError::browser(format!("no page at {}", url)))?;
        let matches = page
            .elements
            .iter_mut()
            .filter(|e| e.css == locator.css && locator.matches_text(&e.text))
            .collect();
        Ok(f(matches))
    }

    fn first_clickable(&self, locator: &Locator, script: bool) -> Result<Vec<ClickAction>> {
        self.with_matches(locator, |matches| {
            let element = matches
                .into_iter()
                .next()
                .ok_or_else(|| ScrapeError::browser(format!("no element matches {}", locator)))?;
            let allowed = if script { element.script_clickable } else { element.clickable };
            if !allowed {
                return Err(ScrapeError::browser(format!("click on {} intercepted", locator)));
            }
            Ok(element.actions.clone())
        })?
    }

    fn perform(&self, locator: &Locator, actions: Vec<ClickAction>) -> Result<()> {
        self.state.lock().unwrap().clicks.push(locator.css.clone());
        for action in actions {
            match action {
                ClickAction::Hide(css) => {
                    self.with_matches(&Locator::css(&css), |matches| {
                        for element in matches {
                            element.visible = false;
                        }
                    })?;
                }
                ClickAction::Navigate(url) => {
                    let mut state = self.state.lock().unwrap();
                    state.visited.push(url.clone());
                    state.current = Some(url);
                }
                ClickAction::NavigateLater { url, after } => {
                    self.state.lock().unwrap().pending = Some((url, after));
                }
                ClickAction::Download { name, bytes } => {
                    fs::write(self.download_dir.join(name), bytes)?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ScrapeError::browser("session not started"));
        }
        if !self.pages.lock().unwrap().contains_key(url) {
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        state.pending = None;
        state.visited.push(url.to_string());
        state.current = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.current()
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        self.with_matches(locator, |matches| matches.len())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        self.with_matches(locator, |matches| matches.first().map(|e| e.visible))?
            .ok_or_else(|| ScrapeError::browser(format!("no element matches {}", locator)))
    }

    async fn text(&self, locator: &Locator) -> Result<Option<String>> {
        self.with_matches(locator, |matches| matches.first().map(|e| e.text.clone()))
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let actions = self.first_clickable(locator, false)?;
        self.perform(locator, actions)
    }

    async fn script_click(&self, locator: &Locator) -> Result<()> {
        let actions = self.first_clickable(locator, true)?;
        self.perform(locator, actions)
    }

    async fn scroll_into_view(&self, locator: &Locator) -> Result<()> {
        if self.count(locator).await? == 0 {
            return Err(ScrapeError::browser(format!("no element matches {}", locator)));
        }
        Ok(())
    }

    async fn set_attribute_all(&self, locator: &Locator, name: &str, _value: &str) -> Result<usize> {
        let touched = self.count(locator).await?;
        self.state
            .lock()
            .unwrap()
            .attribute_writes
            .push((locator.css.clone(), name.to_string()));
        Ok(touched)
    }

    async fn hide(&self, locator: &Locator) -> Result<()> {
        self.with_matches(locator, |matches| {
            for element in matches {
                element.visible = false;
            }
        })
    }

    async fn sections(
        &self,
        _section: &Locator,
        _label_css: &str,
        _anchor_css: &str,
    ) -> Result<Vec<RawSection>> {
        let url = self.current()?;
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&url)
            .map(|p| p.sections.clone())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }
}
