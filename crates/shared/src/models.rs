use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle of a queued task as recorded in the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            other => anyhow::bail!("unknown task status: {}", other),
        }
    }
}

/// One row of pending work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Spreadsheet row; `None` for ad-hoc single-post runs, which are never written back.
    pub row_number: Option<u32>,
    pub project: String,
    pub topic: String,
    pub platforms: Vec<String>,
    pub scheduled_at: Option<String>,
    pub status: TaskStatus,
}

impl Task {
    /// A synthetic task that bypasses the queue.
    pub fn ad_hoc(
        project: impl Into<String>,
        topic: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            row_number: None,
            project: project.into(),
            topic: topic.into(),
            platforms: vec![platform.into()],
            scheduled_at: None,
            status: TaskStatus::Pending,
        }
    }
}

/// Trimmed, lower-cased platform code (`" TG "` becomes `"tg"`).
pub fn normalize_platform_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Text plus an optional locally materialised image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedContent {
    pub text: String,
    pub image_path: Option<PathBuf>,
}

/// Terminal outcome of one publish attempt.
///
/// Built only through [`PublishResult::success`] and [`PublishResult::failure`],
/// so a success never carries an error and a failure never carries a post id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    success: bool,
    post_id: String,
    error: String,
}

impl PublishResult {
    pub fn success(post_id: impl Into<String>) -> Self {
        Self {
            success: true,
            post_id: post_id.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            post_id: String::new(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn error(&self) -> &str {
        &self.error
    }
}

impl From<Result<String, crate::PublishError>> for PublishResult {
    fn from(result: Result<String, crate::PublishError>) -> Self {
        match result {
            Ok(post_id) => PublishResult::success(post_id),
            Err(e) => PublishResult::failure(e.to_string()),
        }
    }
}
