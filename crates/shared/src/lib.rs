// Public modules
pub mod artifact;
pub mod browser;
pub mod config;
pub mod error;
pub mod generator;
pub mod instagram;
pub mod models;
pub mod orchestrator;
pub mod publisher;
pub mod sheets;
pub mod telegram;

// Re-export commonly used types
pub use artifact::ImageArtifact;
pub use browser::{BrowserLauncher, BrowserSession, ChromiumLauncher, Locator};
pub use config::{BrowserSettings, Config};
pub use error::PublishError;
pub use generator::{ContentSource, OpenAiGenerator};
pub use instagram::{InstagramPublisher, SessionState};
pub use models::{GeneratedContent, PublishResult, Task, TaskStatus};
pub use orchestrator::{
    ContentPreview, Orchestrator, PlatformOutcome, RunSummary, TaskReport, Writeback,
};
pub use publisher::{Publisher, PublisherRegistry};
pub use sheets::{SheetsQueue, TaskQueue};
pub use telegram::TelegramPublisher;
