//! Instagram publishing by driving the mobile web UI.
//!
//! There is no write API for this flow, so the publisher logs in once per
//! run and then walks the compose dialog for each post:
//!
//! ```text
//! Disconnected -> Authenticating -> Ready -> Composing -> CaptionEntry -> Submitting -> Ready
//! ```
//!
//! Every control is found through a locale list (Russian and English UI
//! strings). Optional dialogs that never show up are ignored; only the
//! create and share controls are required.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::browser::{
    dismiss, try_locate, wait_until_url, BrowserLauncher, BrowserSession, ChromiumLauncher, Locator,
};
use crate::config::{BrowserSettings, InstagramConfig};
use crate::error::PublishError;
use crate::models::PublishResult;
use crate::publisher::Publisher;

pub const BASE_URL: &str = "https://www.instagram.com";
const LOGIN_PATH: &str = "/accounts/login";

/// Instagram's hard caption limit.
pub const CAPTION_LIMIT: usize = 2200;

/// "Next" confirmations between upload and caption; not every flow shows both.
const NEXT_STEPS: usize = 2;

const USERNAME_INPUT: &[Locator] = &[Locator::Css("input[name='username']")];
const PASSWORD_INPUT: &[Locator] = &[Locator::Css("input[name='password']")];
const LOGIN_ERROR: &[Locator] = &[
    Locator::Css("#slfErrorAlert"),
    Locator::XPath("//div[@role='alert']"),
];

const COOKIE_CONSENT: &[Locator] = &[
    Locator::XPath("//button[contains(text(), 'Разрешить')]"),
    Locator::XPath("//button[contains(text(), 'Accept')]"),
    Locator::XPath("//button[contains(text(), 'Allow')]"),
    Locator::XPath("//button[contains(text(), 'Принять')]"),
];

const SAVE_LOGIN_PROMPT: &[Locator] = &[
    Locator::XPath("//button[contains(text(), 'Не сейчас')]"),
    Locator::XPath("//button[contains(text(), 'Not Now')]"),
    Locator::XPath("//div[contains(text(), 'Не сейчас')]"),
    Locator::XPath("//div[contains(text(), 'Not now')]"),
];

const NOTIFICATIONS_PROMPT: &[Locator] = &[
    Locator::XPath("//button[contains(text(), 'Не сейчас')]"),
    Locator::XPath("//button[contains(text(), 'Not Now')]"),
];

// The clickable node is the parent of the icon.
const CREATE_CONTROL: &[Locator] = &[
    Locator::XPath("//*[local-name()='svg' and @aria-label='Новая публикация']/.."),
    Locator::XPath("//*[local-name()='svg' and @aria-label='New post']/.."),
    Locator::XPath("//*[contains(@aria-label, 'New')]/.."),
    Locator::XPath("//*[contains(@aria-label, 'Create')]/.."),
    Locator::XPath("//*[contains(@aria-label, 'Создать')]/.."),
];

const FILE_INPUT: &[Locator] = &[Locator::XPath("//input[@type='file']")];

const NEXT_CONTROL: &[Locator] = &[
    Locator::XPath("//button[contains(text(), 'Далее')]"),
    Locator::XPath("//button[contains(text(), 'Next')]"),
    Locator::XPath("//div[contains(text(), 'Далее')]"),
    Locator::XPath("//div[contains(text(), 'Next')]"),
];

const CAPTION_INPUT: &[Locator] = &[
    Locator::XPath("//textarea[@aria-label='Добавьте подпись...']"),
    Locator::XPath("//textarea[@aria-label='Write a caption...']"),
    Locator::XPath("//textarea[contains(@placeholder, 'подпись')]"),
    Locator::XPath("//textarea[contains(@placeholder, 'caption')]"),
    Locator::XPath("//div[@aria-label='Добавьте подпись...']"),
    Locator::XPath("//div[@aria-label='Write a caption...']"),
];

const SHARE_CONTROL: &[Locator] = &[
    Locator::XPath("//button[contains(text(), 'Поделиться')]"),
    Locator::XPath("//button[contains(text(), 'Share')]"),
    Locator::XPath("//div[contains(text(), 'Поделиться')]"),
    Locator::XPath("//div[contains(text(), 'Share')]"),
];

const SHARED_CONFIRMATION: &[Locator] = &[
    Locator::XPath("//*[contains(text(), 'опубликована')]"),
    Locator::XPath("//*[contains(text(), 'has been shared')]"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Ready,
    Composing,
    CaptionEntry,
    Submitting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Composing => "composing",
            SessionState::CaptionEntry => "caption-entry",
            SessionState::Submitting => "submitting",
        };
        f.write_str(name)
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!(from = %state, to = %next, "instagram session state");
    *state = next;
}

/// Truncate to `limit` characters without splitting a code point.
pub fn truncate_caption(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct InstagramPublisher {
    launcher: Box<dyn BrowserLauncher>,
    settings: BrowserSettings,
    username: Option<String>,
    password: Option<Secret<String>>,
    session: Option<Box<dyn BrowserSession>>,
    state: SessionState,
}

impl InstagramPublisher {
    pub fn new(
        config: &InstagramConfig,
        settings: BrowserSettings,
        launcher: Box<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            launcher,
            settings,
            username: config.username.clone(),
            password: config.password.clone(),
            session: None,
            state: SessionState::Disconnected,
        }
    }

    /// Publisher backed by a local Chrome/Chromium.
    pub fn chromium(config: &InstagramConfig, settings: BrowserSettings) -> Self {
        Self::new(config, settings, Box::new(ChromiumLauncher))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
            && !matches!(
                self.state,
                SessionState::Disconnected | SessionState::Authenticating
            )
    }

    async fn try_connect(&mut self) -> Result<(), PublishError> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(u), Some(p)) => (u.clone(), p.clone()),
            _ => {
                return Err(PublishError::Config(
                    "INSTAGRAM_USERNAME or INSTAGRAM_PASSWORD is not set".to_string(),
                ))
            }
        };

        transition(&mut self.state, SessionState::Authenticating);
        let session = self.launcher.launch(&self.settings).await?;
        let session = self.session.insert(session).as_mut();

        login(session, &self.settings, &username, &password).await
    }

    async fn try_publish(
        &mut self,
        text: &str,
        image_path: Option<&Path>,
    ) -> Result<String, PublishError> {
        if !self.is_authenticated() {
            return Err(PublishError::Precondition("not logged in".to_string()));
        }
        let Some(image) = image_path.filter(|p| p.is_file()) else {
            return Err(PublishError::Precondition("image required".to_string()));
        };
        let image = image.canonicalize()?;

        let Self {
            session,
            settings,
            state,
            ..
        } = self;
        let session = session
            .as_deref_mut()
            .ok_or_else(|| PublishError::Precondition("not logged in".to_string()))?;

        transition(state, SessionState::Composing);
        session.goto(&format!("{}/", BASE_URL)).await?;

        let create = try_locate(session, CREATE_CONTROL, settings.element_timeout, settings.poll_interval)
            .await
            .ok_or_else(|| PublishError::Ui("create control not found".to_string()))?;
        session.click(create).await?;

        let input = try_locate(session, FILE_INPUT, settings.element_timeout, settings.poll_interval)
            .await
            .ok_or_else(|| PublishError::Ui("file input not found".to_string()))?;
        session.set_files(input, &image).await?;

        // The first "Next" appears once the preview is processed.
        for step in 0..NEXT_STEPS {
            let timeout = if step == 0 {
                settings.element_timeout
            } else {
                settings.dialog_timeout
            };
            if !dismiss(session, "next", NEXT_CONTROL, timeout, settings.poll_interval).await {
                debug!(step, "no next control, continuing");
            }
        }

        transition(state, SessionState::CaptionEntry);
        match try_locate(session, CAPTION_INPUT, settings.dialog_timeout, settings.poll_interval).await {
            Some(caption) => {
                session.click(caption).await?;
                session
                    .type_text(caption, truncate_caption(text, CAPTION_LIMIT))
                    .await?;
            }
            None => warn!("caption field not found, posting without caption"),
        }

        transition(state, SessionState::Submitting);
        let share = try_locate(session, SHARE_CONTROL, settings.element_timeout, settings.poll_interval)
            .await
            .ok_or_else(|| PublishError::Ui("share control not found".to_string()))?;
        session
            .click(share)
            .await
            .map_err(|e| PublishError::Ui(format!("share control not clickable: {}", e)))?;

        if try_locate(session, SHARED_CONFIRMATION, settings.share_timeout, settings.poll_interval)
            .await
            .is_none()
        {
            warn!("no share confirmation seen, assuming the post went through");
        }

        // The web flow never exposes the real media id.
        Ok(format!("ig_{}", chrono::Utc::now().timestamp()))
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "failed to close browser");
            }
        }
        transition(&mut self.state, SessionState::Disconnected);
    }
}

async fn login(
    session: &mut dyn BrowserSession,
    settings: &BrowserSettings,
    username: &str,
    password: &Secret<String>,
) -> Result<(), PublishError> {
    session
        .goto(&format!("{}{}/", BASE_URL, LOGIN_PATH))
        .await?;

    dismiss(
        session,
        "cookie consent",
        COOKIE_CONSENT,
        settings.dialog_timeout,
        settings.poll_interval,
    )
    .await;

    let user_field = try_locate(session, USERNAME_INPUT, settings.element_timeout, settings.poll_interval)
        .await
        .ok_or_else(|| PublishError::Ui("username field not found".to_string()))?;
    session.clear(user_field).await?;
    session.type_text(user_field, username).await?;

    let password_field = try_locate(session, PASSWORD_INPUT, settings.element_timeout, settings.poll_interval)
        .await
        .ok_or_else(|| PublishError::Ui("password field not found".to_string()))?;
    session.clear(password_field).await?;
    session
        .type_text(password_field, password.expose_secret())
        .await?;
    session.press_enter(password_field).await?;

    // Leaving the login page is the only success signal the UI gives.
    let left_login = wait_until_url(
        session,
        |url| !url.contains(LOGIN_PATH),
        settings.login_timeout,
        settings.poll_interval,
    )
    .await;

    if let Err(e) = left_login {
        let reason = match try_locate(session, LOGIN_ERROR, std::time::Duration::ZERO, settings.poll_interval).await {
            Some(region) => session.text(region).await.unwrap_or_default(),
            None => String::new(),
        };
        return Err(if reason.trim().is_empty() {
            PublishError::Auth(format!("still on the login page ({})", e))
        } else {
            PublishError::Auth(reason.trim().to_string())
        });
    }

    dismiss(
        session,
        "save login",
        SAVE_LOGIN_PROMPT,
        settings.dialog_timeout,
        settings.poll_interval,
    )
    .await;
    dismiss(
        session,
        "notifications",
        NOTIFICATIONS_PROMPT,
        settings.dialog_timeout,
        settings.poll_interval,
    )
    .await;

    Ok(())
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn code(&self) -> &'static str {
        "ig"
    }

    async fn connect(&mut self) -> bool {
        if self.is_authenticated() {
            return true;
        }

        match self.try_connect().await {
            Ok(()) => {
                transition(&mut self.state, SessionState::Ready);
                info!("instagram login succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, "instagram unavailable");
                self.teardown().await;
                false
            }
        }
    }

    async fn publish(&mut self, text: &str, image_path: Option<&Path>) -> PublishResult {
        let result = self.try_publish(text, image_path).await;
        if self.session.is_some() && self.state != SessionState::Disconnected {
            transition(&mut self.state, SessionState::Ready);
        }

        match &result {
            Ok(post_id) => info!(post_id = %post_id, "published to instagram"),
            Err(e) => warn!(error = %e, "instagram publish failed"),
        }
        result.into()
    }

    async fn disconnect(&mut self) {
        if self.session.is_some() {
            info!("closing instagram browser");
        }
        self.teardown().await;
    }
}
