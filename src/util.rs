use std::fmt::Display;
use std::future::Future;
use tracing::debug;
use url::Url;

/// Resolves a possibly relative `href` against the page it was found on.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(String::from)
}

/// Runs a best-effort step: failures are logged at debug level and reported
/// as `false`, never propagated.
pub async fn attempt<F, T, E>(what: &str, step: F) -> bool
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match step.await {
        Ok(_) => true,
        Err(e) => {
            debug!("{} failed: {}", what, e);
            false
        }
    }
}
