//! Drives one run: queue → generator → publishers → queue.
//!
//! Everything runs sequentially. Publisher failures stay inside their
//! [`PlatformOutcome`]; the only run-level failure is an unavailable
//! content generator.

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::artifact::ImageArtifact;
use crate::generator::ContentSource;
use crate::models::{normalize_platform_code, PublishResult, Task, TaskStatus};
use crate::publisher::PublisherRegistry;
use crate::sheets::TaskQueue;

/// Characters of generated text shown in a dry-run preview.
pub const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformOutcome {
    pub platform: String,
    pub result: PublishResult,
}

/// What a dry run would have published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPreview {
    pub platform: String,
    pub excerpt: String,
    pub chars: usize,
    /// Kept on disk so it can be inspected.
    pub image_path: Option<PathBuf>,
}

impl ContentPreview {
    fn new(platform: &str, text: &str, image_path: Option<PathBuf>) -> Self {
        let chars = text.chars().count();
        let mut excerpt: String = text.chars().take(PREVIEW_CHARS).collect();
        if chars > PREVIEW_CHARS {
            excerpt.push_str("...");
        }
        Self {
            platform: platform.to_string(),
            excerpt,
            chars,
            image_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Writeback {
    pub status: TaskStatus,
    pub post_id: Option<String>,
    /// Whether the queue accepted the write.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub row_number: Option<u32>,
    pub project: String,
    pub topic: String,
    pub outcomes: Vec<PlatformOutcome>,
    pub previews: Vec<ContentPreview>,
    /// Codes with no connected publisher.
    pub skipped: Vec<String>,
    pub writeback: Option<Writeback>,
}

impl TaskReport {
    fn new(task: &Task) -> Self {
        Self {
            row_number: task.row_number,
            project: task.project.clone(),
            topic: task.topic.clone(),
            outcomes: Vec::new(),
            previews: Vec::new(),
            skipped: Vec::new(),
            writeback: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks: Vec<TaskReport>,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.tasks.iter().map(|t| t.outcomes.len()).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes().filter(|o| o.result.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn skipped(&self) -> usize {
        self.tasks.iter().map(|t| t.skipped.len()).sum()
    }

    pub fn writebacks(&self) -> usize {
        self.tasks.iter().filter(|t| t.writeback.is_some()).count()
    }

    fn outcomes(&self) -> impl Iterator<Item = &PlatformOutcome> {
        self.tasks.iter().flat_map(|t| t.outcomes.iter())
    }
}

/// The single status written back for a task: `done` with every post id
/// when all attempted platforms succeeded, `error` otherwise, nothing when
/// no platform was attempted.
pub fn task_status(outcomes: &[PlatformOutcome]) -> Option<(TaskStatus, Option<String>)> {
    if outcomes.is_empty() {
        return None;
    }

    if outcomes.iter().all(|o| o.result.is_success()) {
        let ids: Vec<&str> = outcomes
            .iter()
            .map(|o| o.result.post_id())
            .filter(|id| !id.is_empty())
            .collect();
        let post_id = Some(ids.join(",")).filter(|ids| !ids.is_empty());
        Some((TaskStatus::Done, post_id))
    } else {
        Some((TaskStatus::Error, None))
    }
}

pub struct Orchestrator {
    queue: Option<Box<dyn TaskQueue>>,
    generator: Box<dyn ContentSource>,
    publishers: PublisherRegistry,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(generator: Box<dyn ContentSource>, publishers: PublisherRegistry) -> Self {
        Self {
            queue: None,
            generator,
            publishers,
            dry_run: false,
        }
    }

    pub fn with_queue(mut self, queue: Box<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Generate and preview only: nothing is published or written back.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Platform codes that will be published to.
    pub fn platforms(&self) -> Vec<String> {
        self.publishers.codes()
    }

    /// Connect the generator (required) and the publishers (each optional).
    /// Publishers that fail to connect are dropped for this run.
    pub async fn connect(&mut self) -> Result<()> {
        if !self.generator.connect().await {
            anyhow::bail!("content generator is unavailable");
        }

        if self.dry_run {
            info!("dry run, publishers stay disconnected");
            return Ok(());
        }

        for code in self.publishers.codes() {
            let connected = match self.publishers.get_mut(&code) {
                Some(publisher) => publisher.connect().await,
                None => continue,
            };
            if !connected {
                warn!(platform = %code, "publisher unavailable, its tasks will be skipped");
                if let Some(mut publisher) = self.publishers.remove(&code) {
                    publisher.disconnect().await;
                }
            }
        }

        if self.publishers.is_empty() {
            warn!("no publisher connected");
        }
        Ok(())
    }

    /// Process every pending task from the queue.
    pub async fn run(&mut self) -> RunSummary {
        let tasks = match &self.queue {
            Some(queue) => match queue.pending_tasks().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(error = %e, "task queue unavailable, nothing to do");
                    Vec::new()
                }
            },
            None => {
                warn!("no task queue configured");
                Vec::new()
            }
        };

        let mut summary = RunSummary::default();
        if tasks.is_empty() {
            info!("no pending tasks");
        }
        for task in &tasks {
            summary.tasks.push(self.process_task(task).await);
        }

        self.shutdown().await;
        summary
    }

    /// Publish one ad-hoc post without touching the queue.
    pub async fn run_single(&mut self, project: &str, topic: &str, platform: &str) -> TaskReport {
        let task = Task::ad_hoc(project, topic, platform);
        let report = self.process_task(&task).await;
        self.shutdown().await;
        report
    }

    pub async fn shutdown(&mut self) {
        self.publishers.disconnect_all().await;
    }

    async fn process_task(&mut self, task: &Task) -> TaskReport {
        info!(
            row = ?task.row_number,
            project = %task.project,
            topic = %task.topic,
            platforms = %task.platforms.join(","),
            "processing task"
        );
        let mut report = TaskReport::new(task);

        for raw in &task.platforms {
            let code = normalize_platform_code(raw);
            if code.is_empty() {
                continue;
            }
            if !self.publishers.contains(&code) {
                debug!(platform = %code, "no publisher for platform, skipping");
                report.skipped.push(code);
                continue;
            }

            let content = self
                .generator
                .generate_content(&task.project, &task.topic, &code)
                .await;
            let artifact = ImageArtifact::adopt(content.image_path);

            if self.dry_run {
                report
                    .previews
                    .push(ContentPreview::new(&code, &content.text, artifact.keep()));
                continue;
            }

            let Some(publisher) = self.publishers.get_mut(&code) else {
                continue;
            };
            let result = publisher.publish(&content.text, artifact.path()).await;
            drop(artifact);

            report.outcomes.push(PlatformOutcome {
                platform: code,
                result,
            });
        }

        if let Some(row) = task.row_number.filter(|_| !self.dry_run) {
            report.writeback = self.write_back(row, &report.outcomes).await;
        }
        report
    }

    async fn write_back(&self, row: u32, outcomes: &[PlatformOutcome]) -> Option<Writeback> {
        let (status, post_id) = task_status(outcomes)?;
        let applied = match &self.queue {
            Some(queue) => queue.update_status(row, status, post_id.as_deref()).await,
            None => false,
        };
        Some(Writeback {
            status,
            post_id,
            applied,
        })
    }
}
