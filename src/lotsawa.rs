use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::browser::{wait_for, Locator, RawSection, Session};
use crate::error::{Result, ScrapeError};
use crate::util::{attempt, resolve_url};

pub const SECTIONS_CONTAINER: &str = "div.subheadings";
pub const SECTION: &str = "div.subheadings details.accordion[name='accordion']";
pub const SECTION_LABEL: &str = "summary";
pub const TEXT_CARD_LINK: &str = "div.text-card a.title";
pub const COOKIE_BANNER: &str = "#tasty-cookies";
pub const COOKIE_ACCEPT: &str = "#tasty-cookies button, #tasty-cookies a";

/// A document page and every topic it was listed under, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLink {
    pub url: String,
    pub topics: Vec<String>,
}

/// Accepts or hides the cookie banner if one is showing. Never fails;
/// returns whether the banner was dealt with.
pub async fn dismiss_cookie_banner<S: Session + ?Sized>(session: &S) -> bool {
    let banner = Locator::css(COOKIE_BANNER);
    if !matches!(session.is_visible(&banner).await, Ok(true)) {
        return false;
    }

    let accept = Locator::with_text(COOKIE_ACCEPT, "Accept");
    if matches!(session.count(&accept).await, Ok(n) if n > 0) {
        info!("Accepting cookie banner");
        if attempt("cookie accept click", session.click(&accept)).await
            || attempt("cookie accept script click", session.script_click(&accept)).await
        {
            async_std::task::sleep(Duration::from_millis(500)).await;
            return true;
        }
    }

    info!("Hiding cookie banner via JavaScript");
    let hidden = attempt("hiding cookie banner", session.hide(&banner)).await;
    if hidden {
        async_std::task::sleep(Duration::from_millis(200)).await;
    }
    hidden
}

/// Clicks the element, falling back to a script click once the cookie banner
/// has been dismissed again.
pub async fn click_with_fallback<S: Session + ?Sized>(session: &S, locator: &Locator) -> Result<()> {
    match session.click(locator).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("Click on {} failed ({}); retrying from script", locator, e);
            dismiss_cookie_banner(session).await;
            session.script_click(locator).await.map_err(|e2| {
                error!("Script click fallback also failed: {}", e2);
                e2
            })
        }
    }
}

/// Best-effort scroll, followed by a short pause for layout to settle.
pub async fn scroll_to<S: Session + ?Sized>(session: &S, locator: &Locator) {
    if attempt("scroll into view", session.scroll_into_view(locator)).await {
        async_std::task::sleep(Duration::from_millis(200)).await;
    }
}

/// Opens the landing page and forces every topic section open.
///
/// Sections are opened by setting their `open` attribute, which is all the
/// accordion needs to render its links.
pub async fn expand_all<S: Session + ?Sized>(
    session: &mut S,
    page_url: &str,
    wait_timeout: Duration,
    delay: Duration,
) -> Result<usize> {
    info!("Opening topic page: {}", page_url);
    session.navigate(page_url).await?;
    dismiss_cookie_banner(session).await;

    let container = Locator::css(SECTIONS_CONTAINER);
    if !wait_for(session, &container, wait_timeout, Duration::from_millis(250)).await {
        error!("Subheadings container not found on {}", page_url);
        return Err(ScrapeError::SectionsNotFound {
            url: page_url.to_string(),
            selector: SECTIONS_CONTAINER.to_string(),
        });
    }

    let sections = Locator::css(SECTION);
    let found = session.count(&sections).await?;
    info!("Found {} sections", found);

    let opened = session.set_attribute_all(&sections, "open", "").await?;
    if opened < found {
        warn!("Only {} of {} sections could be expanded", opened, found);
    }
    info!("Expanded all sections");
    async_std::task::sleep(delay).await;

    Ok(opened)
}

/// Reads every expanded section and groups its document links by URL.
pub async fn collect_links<S: Session + ?Sized>(session: &S, page_url: &str) -> Result<Vec<DocumentLink>> {
    let sections = session
        .sections(&Locator::css(SECTION), SECTION_LABEL, TEXT_CARD_LINK)
        .await?;
    let links = group_links(page_url, &sections);

    info!("Collected {} text links", links.len());
    if !links.is_empty() {
        debug!(
            "First few links: {:?}",
            links.iter().take(5).map(|l| l.url.as_str()).collect::<Vec<_>>()
        );
    }
    Ok(links)
}

/// Resolves hrefs against `page_url` and merges duplicates: a URL keeps the
/// position of its first appearance and collects every distinct label it
/// was listed under. A blank label is kept as `""` and ends up in the
/// fallback folder.
pub fn group_links(page_url: &str, sections: &[RawSection]) -> Vec<DocumentLink> {
    let mut links: Vec<DocumentLink> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for section in sections {
        let label = section.label.trim();
        for href in section.hrefs.iter().flatten() {
            if href.trim().is_empty() {
                continue;
            }
            let Some(url) = resolve_url(page_url, href) else {
                debug!("Skipping unresolvable href {:?}", href);
                continue;
            };

            let position = *index.entry(url.clone()).or_insert_with(|| {
                links.push(DocumentLink {
                    url,
                    topics: Vec::new(),
                });
                links.len() - 1
            });

            let topics = &mut links[position].topics;
            if !topics.iter().any(|t| t == label) {
                topics.push(label.to_string());
            }
        }
    }

    links
}
