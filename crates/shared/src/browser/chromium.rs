//! Chrome/Chromium sessions over CDP.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig as CdpBrowserConfig, Element, Page};
use futures::StreamExt;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, BrowserSession, ElementRef, Locator};
use crate::config::BrowserSettings;
use crate::error::PublishError;

/// Launches a local Chrome/Chromium per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        settings: &BrowserSettings,
    ) -> Result<Box<dyn BrowserSession>, PublishError> {
        let mut builder = CdpBrowserConfig::builder();

        // chromiumoxide runs headless unless asked for a window
        if !settings.headless {
            builder = builder.with_head();
        }

        builder = builder
            .window_size(settings.viewport_width, settings.viewport_height)
            .viewport(Viewport {
                width: settings.viewport_width,
                height: settings.viewport_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .request_timeout(settings.element_timeout.max(std::time::Duration::from_secs(30)))
            .arg(format!("--user-agent={}", settings.user_agent))
            .arg(format!("--lang={}", settings.locale))
            .arg("--disable-notifications")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox");

        if let Some(ref path) = settings.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(|e| {
            PublishError::Config(format!("failed to build browser config: {}", e))
        })?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| PublishError::Transport(format!("browser launch failed: {}", e)))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        info!(
            headless = settings.headless,
            viewport_width = settings.viewport_width,
            viewport_height = settings.viewport_height,
            "launched browser"
        );

        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            page,
            events: Some(events),
            found: Vec::new(),
        }))
    }
}

/// Empties an input or contenteditable and lets the page's framework see it.
const CLEAR_FIELD_JS: &str = "function() { \
    if ('value' in this) { this.value = ''; } else { this.textContent = ''; } \
    this.dispatchEvent(new Event('input', { bubbles: true })); \
}";

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Page,
    events: Option<JoinHandle<()>>,
    found: Vec<Element>,
}

impl ChromiumSession {
    fn element(&self, element: ElementRef) -> Result<&Element, PublishError> {
        self.found
            .get(element.0)
            .ok_or_else(|| PublishError::Ui("element handle is stale".to_string()))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<(), PublishError> {
        self.found.clear();
        self.page.goto(url).await?;
        // Some destinations keep long-polling; a missing load event is not fatal.
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!(url, error = %e, "navigation did not settle");
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, PublishError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn find(&mut self, locator: &Locator) -> Option<ElementRef> {
        let found = match locator {
            Locator::XPath(xpath) => self.page.find_xpath(*xpath).await,
            Locator::Css(css) => self.page.find_element(*css).await,
        };

        match found {
            Ok(element) => {
                self.found.push(element);
                Some(ElementRef(self.found.len() - 1))
            }
            Err(_) => None,
        }
    }

    async fn click(&mut self, element: ElementRef) -> Result<(), PublishError> {
        self.element(element)?.click().await?;
        Ok(())
    }

    async fn clear(&mut self, element: ElementRef) -> Result<(), PublishError> {
        self.element(element)?
            .call_js_fn(CLEAR_FIELD_JS, false)
            .await?;
        Ok(())
    }

    async fn type_text(&mut self, element: ElementRef, text: &str) -> Result<(), PublishError> {
        // Key events only cover the US layout; insertText takes any string.
        self.element(element)?.focus().await?;
        self.page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn press_enter(&mut self, element: ElementRef) -> Result<(), PublishError> {
        self.element(element)?.press_key("Enter").await?;
        Ok(())
    }

    async fn set_files(&mut self, element: ElementRef, path: &Path) -> Result<(), PublishError> {
        let backend_node_id = self.element(element)?.backend_node_id.clone();
        let params = SetFileInputFilesParams {
            files: vec![path.to_string_lossy().into_owned()],
            node_id: None,
            backend_node_id: Some(backend_node_id),
            object_id: None,
        };
        self.page.execute(params).await?;
        Ok(())
    }

    async fn text(&mut self, element: ElementRef) -> Result<String, PublishError> {
        Ok(self.element(element)?.inner_text().await?.unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        self.found.clear();
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser did not close cleanly");
            }
            let _ = browser.wait().await;
        }
        if let Some(events) = self.events.take() {
            events.abort();
        }
        Ok(())
    }
}
