use anyhow::{Context, Result};
use secrecy::Secret;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_CREDENTIALS_FILE: &str = "config/google_credentials.json";

/// Mobile Safari identity; the destination serves a simpler compose flow to phones.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<Secret<String>>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    /// Language the generated posts are written in.
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<Secret<String>>,
    pub channel_id: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,
    pub credentials_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct InstagramConfig {
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
}

/// Launch and synchronisation settings for the automated browser.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    pub locale: String,
    pub chrome_path: Option<PathBuf>,
    /// Upper bound for a required control to show up.
    pub element_timeout: Duration,
    /// Upper bound for an optional dialog to show up before it is considered absent.
    pub dialog_timeout: Duration,
    /// Upper bound for the login redirect.
    pub login_timeout: Duration,
    /// Upper bound for the "post shared" confirmation.
    pub share_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: MOBILE_USER_AGENT.to_string(),
            locale: "ru-RU".to_string(),
            chrome_path: None,
            element_timeout: Duration::from_secs(10),
            dialog_timeout: Duration::from_secs(3),
            login_timeout: Duration::from_secs(15),
            share_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Process-wide configuration, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub telegram: TelegramConfig,
    pub sheets: SheetsConfig,
    pub instagram: InstagramConfig,
    pub browser: BrowserSettings,
    pub artifact_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Credentials are all optional here; their absence is reported by the
    /// component that needs them when it connects.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let openai = OpenAiConfig {
            api_key: get("OPENAI_API_KEY").map(Secret::new),
            api_base: get("OPENAI_API_BASE").unwrap_or_else(|| "https://api.openai.com".to_string()),
            text_model: get("OPENAI_TEXT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            image_model: get("OPENAI_IMAGE_MODEL").unwrap_or_else(|| "dall-e-3".to_string()),
            language: get("POST_LANGUAGE").unwrap_or_else(|| "Russian".to_string()),
        };

        let telegram = TelegramConfig {
            bot_token: get("TELEGRAM_BOT_TOKEN").map(Secret::new),
            channel_id: get("TELEGRAM_CHANNEL_ID"),
            api_base: get("TELEGRAM_API_BASE")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
        };

        let sheets = SheetsConfig {
            spreadsheet_id: get("GOOGLE_SHEETS_ID"),
            credentials_file: get("GOOGLE_CREDENTIALS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE)),
        };

        let instagram = InstagramConfig {
            username: get("INSTAGRAM_USERNAME"),
            password: get("INSTAGRAM_PASSWORD").map(Secret::new),
        };

        let mut browser = BrowserSettings::default();
        if let Some(value) = get("INSTAGRAM_HEADLESS") {
            browser.headless = parse_bool(&value)
                .with_context(|| format!("INSTAGRAM_HEADLESS has an invalid value: {}", value))?;
        }
        if let Some(path) = get("CHROME_PATH") {
            browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = get("BROWSER_ELEMENT_TIMEOUT_MS") {
            browser.element_timeout = parse_millis("BROWSER_ELEMENT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = get("BROWSER_DIALOG_TIMEOUT_MS") {
            browser.dialog_timeout = parse_millis("BROWSER_DIALOG_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = get("BROWSER_LOGIN_TIMEOUT_MS") {
            browser.login_timeout = parse_millis("BROWSER_LOGIN_TIMEOUT_MS", &ms)?;
        }

        let artifact_dir = match get("AUTOPOST_ARTIFACT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_artifact_dir(),
        };

        Ok(Self {
            openai,
            telegram,
            sheets,
            instagram,
            browser,
            artifact_dir,
        })
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/autopost/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("autopost").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

fn default_artifact_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("autopost")
        .join("images")
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected true/false"),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .parse()
        .with_context(|| format!("{} must be a number of milliseconds, got {}", key, value))?;
    Ok(Duration::from_millis(ms))
}
