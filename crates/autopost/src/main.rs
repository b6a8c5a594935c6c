mod logging;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use shared::{
    Config, InstagramPublisher, OpenAiGenerator, Orchestrator, PublisherRegistry, RunSummary,
    SheetsQueue, TaskReport, TelegramPublisher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Platform {
    /// Telegram channel
    Tg,
    /// Instagram feed
    Ig,
    /// TikTok (not supported yet, skipped)
    Tt,
}

impl Platform {
    fn code(&self) -> &'static str {
        match self {
            Platform::Tg => "tg",
            Platform::Ig => "ig",
            Platform::Tt => "tt",
        }
    }
}

#[derive(Parser)]
#[command(name = "autopost")]
#[command(about = "Generate posts with OpenAI and publish them from a Google Sheets queue")]
struct Args {
    /// Generate and preview only; never publish or update the sheet
    #[arg(long)]
    test: bool,

    /// Publish one post without reading the sheet
    #[arg(long)]
    single: bool,

    /// Project for --single
    #[arg(long, default_value = "RouteOfRest")]
    project: String,

    /// Topic for --single
    #[arg(long)]
    topic: Option<String>,

    /// Platform for --single
    #[arg(long, value_enum, default_value = "tg")]
    platform: Platform,

    /// Show the browser window while publishing to Instagram
    #[arg(long)]
    headed: bool,
}

fn build_publishers(config: &Config, codes: &[&str]) -> PublisherRegistry {
    let mut registry = PublisherRegistry::new();
    for code in codes {
        match *code {
            "tg" => registry.register(Box::new(TelegramPublisher::new(&config.telegram))),
            "ig" => registry.register(Box::new(InstagramPublisher::chromium(
                &config.instagram,
                config.browser.clone(),
            ))),
            _ => {}
        }
    }
    registry
}

fn print_banner(title: &str, dry_run: bool) {
    println!("\n{}", "=".repeat(50));
    println!("   AutoPost - {}", title);
    println!("{}", "=".repeat(50));
    println!("Time: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    if dry_run {
        println!("Mode: TEST (nothing is published)");
    }
}

fn print_report(report: &TaskReport) {
    println!("\n--- Task ---");
    if let Some(row) = report.row_number {
        println!("Row: {}", row);
    }
    println!("Project: {}", report.project);
    println!("Topic: {}", report.topic);

    for preview in &report.previews {
        println!(
            "\n[TEST] {} text ({} characters):",
            preview.platform, preview.chars
        );
        println!("{}", preview.excerpt);
        match &preview.image_path {
            Some(path) => println!("[TEST] Image: {}", path.display()),
            None => println!("[TEST] Image: none"),
        }
    }

    for outcome in &report.outcomes {
        if outcome.result.is_success() {
            println!(
                "  ✓ {}: published (post id {})",
                outcome.platform,
                outcome.result.post_id()
            );
        } else {
            println!("  ✗ {}: {}", outcome.platform, outcome.result.error());
        }
    }

    for code in &report.skipped {
        println!("  - {}: no publisher available, skipped", code);
    }

    if let Some(writeback) = &report.writeback {
        if writeback.applied {
            println!("  Sheet status: {}", writeback.status);
        } else {
            println!("  ⚠ Failed to update sheet status to {}", writeback.status);
        }
    }
}

fn print_summary(summary: &RunSummary) {
    if summary.tasks.is_empty() {
        println!("\nNo pending tasks.");
        return;
    }

    for report in &summary.tasks {
        print_report(report);
    }

    println!("\n{}", "=".repeat(50));
    println!(
        "Tasks: {}  published: {}  failed: {}  skipped: {}  sheet updates: {}",
        summary.tasks.len(),
        summary.succeeded(),
        summary.failed(),
        summary.skipped(),
        summary.writebacks()
    );
    println!("{}\n", "=".repeat(50));
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if args.headed {
        config.browser.headless = false;
    }

    let generator = Box::new(OpenAiGenerator::new(&config.openai, &config.artifact_dir));

    if args.single {
        let topic = args
            .topic
            .as_deref()
            .context("--topic is required with --single")?;

        print_banner("single post", args.test);

        let publishers = build_publishers(&config, &[args.platform.code()]);
        let mut orchestrator = Orchestrator::new(generator, publishers).dry_run(args.test);
        orchestrator.connect().await?;

        let report = orchestrator
            .run_single(&args.project, topic, args.platform.code())
            .await;
        print_report(&report);
        return Ok(());
    }

    print_banner("queue run", args.test);

    let publishers = build_publishers(&config, &["tg", "ig"]);
    let mut orchestrator = Orchestrator::new(generator, publishers).dry_run(args.test);
    match SheetsQueue::new(&config.sheets) {
        Ok(queue) => orchestrator = orchestrator.with_queue(Box::new(queue)),
        Err(e) => println!("⚠ Google Sheets unavailable, continuing without it: {}", e),
    }

    println!("\nConnecting services...");
    orchestrator.connect().await?;
    if !orchestrator.is_dry_run() {
        println!("✓ Publishing to: {}", orchestrator.platforms().join(", "));
    }

    let summary = orchestrator.run().await;
    print_summary(&summary);

    Ok(())
}
