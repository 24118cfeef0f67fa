//! storyq CLI: run the worker and inspect stories and events.

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use storyq::config::Config;
use storyq::db::Db;
use storyq::devops::AzureDevOpsClient;
use storyq::engine::{Processor, Worker, WorkerConfig};
use storyq::intake::{StoryService, story_from_service_hook};
use storyq::model::{Event, EventId, EventStatus, NewStory};
use storyq::queue::EventQueue;
use storyq::telemetry::{TelemetryConfig, init_telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "storyq", about = "Queue-driven subtask creation for user stories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker daemon
    Serve {
        /// Seconds between poll cycles (overrides POLL_INTERVAL_SECS)
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// User story operations
    Story {
        #[command(subcommand)]
        action: StoryAction,
    },
    /// Event queue operations
    Event {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Check database connectivity
    Health,
}

#[derive(Subcommand)]
enum StoryAction {
    /// Record a story and queue subtask creation
    Create {
        /// Upstream work item id
        id: i64,
        /// Story title
        title: String,
        #[arg(long)]
        area_path: Option<String>,
        #[arg(long)]
        iteration_path: Option<String>,
    },
    /// Show a story
    Show {
        /// Upstream work item id
        id: i64,
    },
    /// Accept an Azure DevOps service hook notification
    Hook {
        /// JSON file with the notification, or `-` for stdin
        source: String,
    },
}

#[derive(Subcommand)]
enum EventAction {
    /// List events, newest first
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum events to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show an event
    Show { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { poll_interval } => cmd_serve(config, poll_interval).await,
        Command::Story { action } => {
            let db = connect(&config).await?;
            let service = StoryService::new(db);
            match action {
                StoryAction::Create {
                    id,
                    title,
                    area_path,
                    iteration_path,
                } => {
                    let new = NewStory {
                        external_id: id,
                        title,
                        area_path,
                        iteration_path,
                    };
                    cmd_story_create(&service, new).await
                }
                StoryAction::Show { id } => cmd_story_show(&service, id).await,
                StoryAction::Hook { source } => cmd_story_hook(&service, &source).await,
            }
        }
        Command::Event { action } => {
            let queue = EventQueue::new(connect(&config).await?);
            match action {
                EventAction::List { status, limit } => cmd_event_list(&queue, status, limit).await,
                EventAction::Show { id } => cmd_event_show(&queue, id).await,
            }
        }
        Command::Health => {
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.health_check().await?;
            println!("ok");
            Ok(())
        }
    }
}

/// Connect and bring the schema up to date.
async fn connect(config: &Config) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn cmd_serve(config: Config, poll_interval: Option<u64>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "storyq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let devops = config.devops.as_ref().ok_or_else(|| {
        anyhow::anyhow!(
            "AZURE_DEVOPS_ORG, AZURE_DEVOPS_PROJECT and AZURE_DEVOPS_PAT must be set to run the worker"
        )
    })?;
    let client = Arc::new(AzureDevOpsClient::new(devops)?);
    let workflow = config.load_workflow()?;

    let db = connect(&config).await?;
    info!("database initialized");

    let poll_interval = poll_interval
        .map(Duration::from_secs)
        .unwrap_or(config.poll_interval);
    info!(
        environment = %config.environment,
        poll_interval_secs = poll_interval.as_secs(),
        templates = workflow.task_templates.len(),
        "starting worker"
    );

    let queue = EventQueue::new(db.clone());
    let processor =
        Processor::new(queue.clone(), db, client, workflow).with_retry_interval(poll_interval);
    let worker = Worker::new(queue, processor, WorkerConfig { poll_interval });
    let handle = worker.spawn();

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");

    if handle.shutdown(config.shutdown_grace).await {
        info!("shutdown complete");
    } else {
        anyhow::bail!("worker did not shut down cleanly");
    }
    Ok(())
}

async fn cmd_story_create(service: &StoryService, new: NewStory) -> anyhow::Result<()> {
    let accepted = service.create_user_story(new).await?;
    println!("{}", serde_json::to_string_pretty(&accepted)?);
    Ok(())
}

async fn cmd_story_hook(service: &StoryService, source: &str) -> anyhow::Result<()> {
    let raw = if source == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(source)?
    };
    let notification: serde_json::Value = serde_json::from_str(&raw)?;

    match story_from_service_hook(&notification) {
        Some(new) => cmd_story_create(service, new).await,
        None => {
            // Anything but a created user story is acknowledged and dropped.
            println!(
                "{}",
                serde_json::json!({"status": "ignored", "message": "not a created user story"})
            );
            Ok(())
        }
    }
}

async fn cmd_story_show(service: &StoryService, id: i64) -> anyhow::Result<()> {
    let Some(story) = service.get_user_story(id).await? else {
        anyhow::bail!("story #{id} not found");
    };

    println!("Story:      #{}", story.external_id);
    println!("Title:      {}", story.title);
    println!("Status:     {}", story.status);
    println!("Area:       {}", story.area_path.as_deref().unwrap_or("-"));
    println!("Iteration:  {}", story.iteration_path.as_deref().unwrap_or("-"));
    println!("Created:    {}", story.created_at);
    println!("Updated:    {}", story.updated_at);
    Ok(())
}

async fn cmd_event_list(
    queue: &EventQueue,
    status: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status_filter: Option<EventStatus> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let events = queue.list(status_filter, limit).await?;
    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<16}  {:<10}  {:<16}  PROCESSED",
        "ID", "TYPE", "STATUS", "CREATED"
    );
    println!("{}", "-".repeat(80));
    for event in &events {
        println!(
            "{:<8}  {:<16}  {:<10}  {:<16}  {}",
            event.id.0,
            event.event_type,
            event.status,
            event.created_at.format("%Y-%m-%d %H:%M"),
            event
                .processed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!("\n{} event(s)", events.len());
    Ok(())
}

async fn cmd_event_show(queue: &EventQueue, id: i64) -> anyhow::Result<()> {
    let Some(event) = queue.get(EventId(id)).await? else {
        anyhow::bail!("event {id} not found");
    };
    print_event(&event)
}

fn print_event(event: &Event) -> anyhow::Result<()> {
    println!("ID:         {}", event.id);
    println!("Type:       {}", event.event_type);
    println!("Status:     {}", event.status);
    println!(
        "Payload:    {}",
        serde_json::to_string_pretty(&event.payload)?
    );
    println!("Created:    {}", event.created_at);
    if let Some(processed) = event.processed_at {
        println!("Processed:  {processed}");
    }
    if let Some(ref result) = event.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    if let Some(ref error) = event.error {
        println!("Error:      {error}");
    }
    Ok(())
}
