//! Post text and illustration generation through the OpenAI API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::artifact::{artifact_file_name, ensure_artifact_dir};
use crate::config::OpenAiConfig;
use crate::models::GeneratedContent;

/// Produces the text and image for one `(project, topic, platform)` publish.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn connect(&mut self) -> bool;

    /// Never fails: a part that could not be generated comes back empty.
    async fn generate_content(&self, project: &str, topic: &str, platform: &str)
        -> GeneratedContent;
}

/// Voice and look of a project's posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectProfile {
    pub style: &'static str,
    pub tone: &'static str,
    pub hashtags: &'static str,
    pub image_style: &'static str,
}

pub fn project_profile(project: &str) -> ProjectProfile {
    match project {
        "RouteOfRest" => ProjectProfile {
            style: "travel blog that inspires people to go on trips",
            tone: "friendly and informative, with emoji",
            hashtags: "#путешествия #отдых #travel #RouteOfRest",
            image_style: "beautiful nature photo, travel, bright colours, professional photography",
        },
        "NBot" => ProjectProfile {
            style: "finance and technology blog about earning money",
            tone: "expert and motivating, with concrete examples",
            hashtags: "#заработок #боты #пассивныйдоход #NBot",
            image_style: "modern minimalist design, technology, finance, blue and green tones",
        },
        _ => ProjectProfile {
            style: "informational blog",
            tone: "neutral",
            hashtags: "",
            image_style: "professional style",
        },
    }
}

/// Target post length for a platform.
pub fn length_target(platform: &str) -> &'static str {
    match platform {
        "tg" => "1500-2000 characters",
        "ig" => "1800-2200 characters",
        "tt" => "150-300 characters (a short video description)",
        _ => "1500 characters",
    }
}

pub fn text_prompt(project: &str, topic: &str, platform: &str, language: &str) -> String {
    let profile = project_profile(project);
    format!(
        r#"Write a social media post on the topic: "{topic}"

Project: {project}
Style: {style}
Tone: {tone}
Length: {length}

Requirements:
- Write the post in {language}
- Open with a catchy headline or question
- Give useful information on the topic
- Split the text into paragraphs for readability
- End with a call to action
- Add relevant hashtags: {hashtags}

Reply with the post text only, no explanations."#,
        topic = topic,
        project = project,
        style = profile.style,
        tone = profile.tone,
        length = length_target(platform),
        language = language,
        hashtags = profile.hashtags,
    )
}

pub fn image_prompt(project: &str, topic: &str) -> String {
    format!(
        "{}. Style: {}. No text on the image.",
        topic,
        project_profile(project).image_style
    )
}

const SYSTEM_PROMPT: &str =
    "You are an experienced social media copywriter. You write engaging posts for social networks.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'static str,
    quality: &'static str,
    n: u32,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

pub struct OpenAiGenerator {
    client: Option<Client>,
    config: OpenAiConfig,
    artifact_dir: PathBuf,
}

impl OpenAiGenerator {
    pub fn new(config: &OpenAiConfig, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: None,
            config: OpenAiConfig {
                api_base: config.api_base.trim_end_matches('/').to_string(),
                ..config.clone()
            },
            artifact_dir: artifact_dir.into(),
        }
    }

    fn client(&self) -> Result<(&Client, &str)> {
        match (&self.client, &self.config.api_key) {
            (Some(client), Some(key)) => Ok((client, key.expose_secret())),
            _ => anyhow::bail!("OpenAI client is not connected"),
        }
    }

    /// Post text, or an empty string when generation fails.
    pub async fn generate_text(&self, project: &str, topic: &str, platform: &str) -> String {
        match self.try_generate_text(project, topic, platform).await {
            Ok(text) => {
                info!(chars = text.chars().count(), "generated post text");
                text
            }
            Err(e) => {
                warn!(error = %e, "text generation failed");
                String::new()
            }
        }
    }

    /// Path of the downloaded illustration, or `None` when generation fails.
    pub async fn generate_image(
        &self,
        project: &str,
        topic: &str,
        platform: &str,
    ) -> Option<PathBuf> {
        match self.try_generate_image(project, topic, platform).await {
            Ok(path) => {
                info!(path = %path.display(), "saved generated image");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "image generation failed");
                None
            }
        }
    }

    async fn try_generate_text(&self, project: &str, topic: &str, platform: &str) -> Result<String> {
        let (client, api_key) = self.client()?;
        let prompt = text_prompt(project, topic, platform, &self.config.language);

        let request = ChatRequest {
            model: &self.config.text_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: 1000,
            temperature: 0.7,
        };

        let response = client
            .post(format!("{}/v1/chat/completions", self.config.api_base))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("OpenAI API error {}: {}", status, error_text);
        }

        let chat = response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse OpenAI chat response")?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        Ok(text)
    }

    async fn try_generate_image(
        &self,
        project: &str,
        topic: &str,
        platform: &str,
    ) -> Result<PathBuf> {
        let (client, api_key) = self.client()?;
        let prompt = image_prompt(project, topic);

        let request = ImageRequest {
            model: &self.config.image_model,
            prompt: &prompt,
            size: "1024x1024",
            quality: "standard",
            n: 1,
        };

        let response = client
            .post(format!("{}/v1/images/generations", self.config.api_base))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI images API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("OpenAI images API error {}: {}", status, error_text);
        }

        let images = response
            .json::<ImageResponse>()
            .await
            .context("Failed to parse OpenAI images response")?;

        let url = images
            .data
            .into_iter()
            .find_map(|d| d.url)
            .context("OpenAI images response has no URL")?;

        // The URL is pre-signed; no credentials go with the download.
        let download = client
            .get(&url)
            .send()
            .await
            .context("Failed to download generated image")?;
        if !download.status().is_success() {
            anyhow::bail!("Image download failed with status {}", download.status());
        }
        let bytes = download
            .bytes()
            .await
            .context("Failed to read generated image")?;

        let dir = ensure_artifact_dir(&self.artifact_dir)?;
        let path = dir.join(artifact_file_name(project, platform, chrono::Local::now()));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write image to {}", path.display()))?;

        Ok(path)
    }
}

#[async_trait]
impl ContentSource for OpenAiGenerator {
    async fn connect(&mut self) -> bool {
        if self.config.api_key.is_none() {
            warn!("OPENAI_API_KEY is not set");
            return false;
        }

        match Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
        {
            Ok(client) => {
                self.client = Some(client);
                info!(model = %self.config.text_model, "OpenAI client initialised");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to create HTTP client");
                false
            }
        }
    }

    async fn generate_content(
        &self,
        project: &str,
        topic: &str,
        platform: &str,
    ) -> GeneratedContent {
        info!(project, topic, platform, "generating content");
        GeneratedContent {
            text: self.generate_text(project, topic, platform).await,
            image_path: self.generate_image(project, topic, platform).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rstest::rstest;
    use secrecy::Secret;
    use serde_json::json;
    use tempfile::tempdir;

    fn config_for(server: &mockito::ServerGuard, key: Option<&str>) -> OpenAiConfig {
        OpenAiConfig {
            api_key: key.map(|k| Secret::new(k.to_string())),
            api_base: format!("{}/", server.url()),
            text_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            language: "Russian".to_string(),
        }
    }

    #[rstest]
    #[case("tg", "1500-2000")]
    #[case("ig", "1800-2200")]
    #[case("tt", "150-300")]
    #[case("vk", "1500 characters")]
    fn test_text_prompt_length_target(#[case] platform: &str, #[case] expected: &str) {
        let prompt = text_prompt("RouteOfRest", "Turkey", platform, "Russian");
        assert!(prompt.contains(expected), "{}", prompt);
    }

    #[test]
    fn test_text_prompt_uses_project_profile() {
        let prompt = text_prompt("NBot", "Passive income", "tg", "Russian");
        assert!(prompt.contains("#NBot"));
        assert!(prompt.contains("\"Passive income\""));
        assert!(prompt.contains("Write the post in Russian"));

        let unknown = project_profile("Somebody");
        assert_eq!(unknown.hashtags, "");
        assert_eq!(unknown.tone, "neutral");
    }

    #[test]
    fn test_image_prompt_forbids_text() {
        let prompt = image_prompt("NBot", "Trading bots");
        assert!(prompt.starts_with("Trading bots. Style: modern minimalist"));
        assert!(prompt.ends_with("No text on the image."));
    }

    #[tokio::test]
    async fn test_connect_requires_api_key() {
        let server = mockito::Server::new_async().await;
        let dir = tempdir().unwrap();
        let mut generator = OpenAiGenerator::new(&config_for(&server, None), dir.path());

        assert!(!generator.connect().await);
    }

    #[tokio::test]
    async fn test_generate_content_before_connect_is_empty() {
        let server = mockito::Server::new_async().await;
        let dir = tempdir().unwrap();
        let generator = OpenAiGenerator::new(&config_for(&server, Some("sk-test")), dir.path());

        let content = generator.generate_content("NBot", "Bots", "tg").await;

        assert_eq!(content, GeneratedContent::default());
    }

    #[tokio::test]
    async fn test_generate_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 1000
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"  Hello, world!  "}}]}"#)
            .create_async()
            .await;
        let dir = tempdir().unwrap();
        let mut generator = OpenAiGenerator::new(&config_for(&server, Some("sk-test")), dir.path());
        assert!(generator.connect().await);

        let text = generator.generate_text("RouteOfRest", "Turkey", "tg").await;

        mock.assert_async().await;
        assert_eq!(text, "Hello, world!");
    }

    #[tokio::test]
    async fn test_generate_text_api_error_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _completions = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"rate limited"}}"#)
            .create_async()
            .await;
        let dir = tempdir().unwrap();
        let mut generator = OpenAiGenerator::new(&config_for(&server, Some("sk-test")), dir.path());
        assert!(generator.connect().await);

        assert_eq!(generator.generate_text("NBot", "Bots", "tg").await, "");
    }

    #[tokio::test]
    async fn test_generate_image_downloads_into_artifact_dir() {
        let mut server = mockito::Server::new_async().await;
        let image_url = format!("{}/files/generated.png", server.url());
        let _generations = server
            .mock("POST", "/v1/images/generations")
            .match_body(Matcher::PartialJson(json!({
                "model": "dall-e-3",
                "size": "1024x1024",
                "n": 1
            })))
            .with_status(200)
            .with_body(json!({ "data": [{ "url": image_url }] }).to_string())
            .create_async()
            .await;
        let _png = server
            .mock("GET", "/files/generated.png")
            .with_status(200)
            .with_body("png-bytes")
            .create_async()
            .await;
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let mut generator = OpenAiGenerator::new(&config_for(&server, Some("sk-test")), &images);
        assert!(generator.connect().await);

        let path = generator
            .generate_image("RouteOfRest", "Turkey", "ig")
            .await
            .unwrap();

        assert!(path.starts_with(&images));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("RouteOfRest_ig_"));
        assert!(name.ends_with(".png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_generate_image_failed_download_is_none() {
        let mut server = mockito::Server::new_async().await;
        let image_url = format!("{}/files/missing.png", server.url());
        let _generations = server
            .mock("POST", "/v1/images/generations")
            .with_status(200)
            .with_body(json!({ "data": [{ "url": image_url }] }).to_string())
            .create_async()
            .await;
        let _png = server
            .mock("GET", "/files/missing.png")
            .with_status(404)
            .create_async()
            .await;
        let dir = tempdir().unwrap();
        let mut generator = OpenAiGenerator::new(&config_for(&server, Some("sk-test")), dir.path());
        assert!(generator.connect().await);

        assert!(generator
            .generate_image("NBot", "Bots", "tg")
            .await
            .is_none());
    }
}
