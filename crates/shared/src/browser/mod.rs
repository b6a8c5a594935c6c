//! Browser-driving primitives shared by UI-automated publishers.
//!
//! Destination UIs drift between releases and locales, so every control is
//! described by an ordered list of [`Locator`]s. [`try_locate`] polls the list
//! until the first match or a deadline; a missing control is `None`, and the
//! caller decides whether that is fatal.

pub mod chromium;

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BrowserSettings;
use crate::error::PublishError;

pub use chromium::ChromiumLauncher;

/// One strategy for finding an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locator {
    XPath(&'static str),
    Css(&'static str),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::XPath(x) => write!(f, "xpath:{}", x),
            Locator::Css(c) => write!(f, "css:{}", c),
        }
    }
}

/// Handle to an element found in the current page.
/// Handles are invalidated by the next navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRef(pub usize);

/// A live, exclusively owned browser page.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), PublishError>;

    async fn current_url(&mut self) -> Result<String, PublishError>;

    /// Look the locator up once; `None` when nothing matches.
    async fn find(&mut self, locator: &Locator) -> Option<ElementRef>;

    async fn click(&mut self, element: ElementRef) -> Result<(), PublishError>;

    /// Remove whatever the field already holds, autofill included.
    async fn clear(&mut self, element: ElementRef) -> Result<(), PublishError>;

    /// Insert `text` into the focused element as-is. Any Unicode is accepted,
    /// and `\n` becomes a line break rather than a key press.
    async fn type_text(&mut self, element: ElementRef, text: &str) -> Result<(), PublishError>;

    async fn press_enter(&mut self, element: ElementRef) -> Result<(), PublishError>;

    /// Hand a local file to an `<input type="file">`.
    async fn set_files(&mut self, element: ElementRef, path: &Path) -> Result<(), PublishError>;

    async fn text(&mut self, element: ElementRef) -> Result<String, PublishError>;

    async fn close(&mut self) -> Result<(), PublishError>;
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, settings: &BrowserSettings)
        -> Result<Box<dyn BrowserSession>, PublishError>;
}

/// Poll `strategies` in order until one matches or `timeout` elapses.
/// A zero timeout makes exactly one pass.
pub async fn try_locate(
    session: &mut dyn BrowserSession,
    strategies: &[Locator],
    timeout: Duration,
    poll: Duration,
) -> Option<ElementRef> {
    let deadline = Instant::now() + timeout;
    loop {
        for locator in strategies {
            if let Some(element) = session.find(locator).await {
                debug!(%locator, "located element");
                return Some(element);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Click the first matching control if one shows up. Never fails.
pub async fn dismiss(
    session: &mut dyn BrowserSession,
    what: &str,
    strategies: &[Locator],
    timeout: Duration,
    poll: Duration,
) -> bool {
    let Some(element) = try_locate(session, strategies, timeout, poll).await else {
        debug!(dialog = what, "dialog not present");
        return false;
    };

    match session.click(element).await {
        Ok(()) => {
            debug!(dialog = what, "dismissed dialog");
            true
        }
        Err(e) => {
            warn!(dialog = what, error = %e, "failed to dismiss dialog");
            false
        }
    }
}

/// Wait until the page URL satisfies `done`, returning that URL.
pub async fn wait_until_url<F>(
    session: &mut dyn BrowserSession,
    done: F,
    timeout: Duration,
    poll: Duration,
) -> Result<String, PublishError>
where
    F: Fn(&str) -> bool + Send,
{
    let deadline = Instant::now() + timeout;
    loop {
        let url = session.current_url().await?;
        if done(&url) {
            return Ok(url);
        }
        if Instant::now() >= deadline {
            return Err(PublishError::Timeout(format!(
                "page stayed on {} for {:?}",
                url, timeout
            )));
        }
        tokio::time::sleep(poll).await;
    }
}
