//! Command-line entry point: run the orchestrator, submit and list tasks.

mod config;
mod config_watcher;
mod shell;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_channels::{NotifierSet, TelegramNotifier};
use conductor_core::{short_id, RiskLevel, Submission, TaskId, TaskStatus, UrgencyLevel};
use conductor_memory::VectorHistory;
use conductor_orchestrator::{parse_interval, Orchestrator};
use conductor_store::{FileTaskStore, InMemoryStatusCache, TaskFilter, TaskStore};
use config::ConductorConfig;
use config_watcher::{ConfigWatcher, ScheduleSync};
use shell::ShellExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor — priority task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover persisted work and run until Ctrl-C
    Run,
    /// Persist a task; the next `run` picks it up
    Submit {
        /// What should be done
        description: String,
        #[arg(long, default_value = "low")]
        risk: RiskLevel,
        #[arg(long, default_value = "low")]
        urgency: UrgencyLevel,
        /// Executor hint
        #[arg(long)]
        executor: Option<String>,
        /// Shell command run by the shell executor
        #[arg(long)]
        command: Option<String>,
        /// Task ids that must complete first
        #[arg(long = "depends-on")]
        depends_on: Vec<TaskId>,
        /// Retry ceiling for this task
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// List persisted tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Validate and print configured schedules
    Schedules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        config::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
        toml::from_str::<ConductorConfig>("")?
    };

    match cli.command {
        Commands::Run => run(&cli.config, config).await?,
        Commands::Submit {
            description,
            risk,
            urgency,
            executor,
            command,
            depends_on,
            max_retries,
        } => {
            let mut submission = Submission::new(description)
                .with_risk(risk)
                .with_urgency(urgency)
                .with_origin("cli")
                .with_dependencies(depends_on);
            if let Some(executor) = executor {
                submission = submission.with_target(executor);
            }
            if let Some(command) = command {
                submission = submission.with_metadata("command", serde_json::json!(command));
            }
            if let Some(max_retries) = max_retries {
                submission = submission.with_max_retries(max_retries);
            }
            submission.validate()?;

            let store = open_store(&config).await?;
            let record = store.create_task(&submission).await?;
            println!("{}", record.id);
        }
        Commands::List { status, limit } => {
            let store = open_store(&config).await?;
            let mut filter = TaskFilter::default().limit(limit);
            filter.status = status;
            let records = store.list_tasks(&filter).await?;
            if records.is_empty() {
                println!("No tasks.");
            }
            for record in &records {
                let description: String = record.description.chars().take(60).collect();
                println!(
                    "{}  {:<9}  {:<6}  {:<6}  {}",
                    short_id(&record.id),
                    record.status.as_str(),
                    record.risk.as_str(),
                    record.urgency.as_str(),
                    description
                );
            }
        }
        Commands::Schedules => {
            let active = config.active_schedules()?;
            if config.schedules.is_empty() {
                println!("No schedules configured.");
                println!("Add [[schedules]] entries to {}", cli.config.display());
            }
            for spec in &config.schedules {
                let interval = parse_interval(&spec.every)?;
                let state = if spec.enabled { "" } else { " (disabled)" };
                println!(
                    "  {:<20} {} ({}s){}  {}",
                    spec.name,
                    spec.every,
                    interval.as_secs(),
                    state,
                    spec.description
                );
            }
            println!("\nActive: {} schedule(s)", active.len());
        }
    }

    Ok(())
}

async fn open_store(config: &ConductorConfig) -> anyhow::Result<FileTaskStore> {
    let dir = config.data_dir.join("tasks");
    FileTaskStore::new(dir.clone())
        .await
        .with_context(|| format!("Failed to open task store at '{}'", dir.display()))
}

async fn run(config_path: &std::path::Path, config: ConductorConfig) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config).await?);
    let history = Arc::new(VectorHistory::open(config.data_dir.join("history.jsonl")).await?);
    let executor = Arc::new(ShellExecutor::new(Duration::from_secs(config.shell.timeout_secs)));

    let mut notifiers = NotifierSet::new();
    if let Some((token, chat_id)) = config.telegram.as_ref().and_then(config::TelegramConfig::resolve) {
        notifiers.add(Box::new(TelegramNotifier::new(token, chat_id)));
    }
    info!(notifiers = ?notifiers.names(), "Notification channels configured");

    let mut builder = Orchestrator::builder(store, executor)
        .config(config.orchestrator.clone())
        .cache(Arc::new(InMemoryStatusCache::new()))
        .history(history);
    if !notifiers.is_empty() {
        builder = builder.notifier(Arc::new(notifiers));
    }
    let orchestrator = builder.build()?;

    let mut sync = ScheduleSync::new(orchestrator.clone());
    sync.apply(&config)?;

    let (reload_tx, mut reload_rx) = tokio::sync::mpsc::unbounded_channel::<ConductorConfig>();
    let _watcher = if config_path.exists() {
        let watcher = ConfigWatcher::start(config_path.to_path_buf(), 500, move |config| {
            let _ = reload_tx.send(config);
        });
        match watcher {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Config hot-reload disabled");
                None
            }
        }
    } else {
        None
    };
    let reloader = tokio::spawn(async move {
        while let Some(config) = reload_rx.recv().await {
            if let Err(e) = sync.apply(&config) {
                warn!(error = %e, "Ignoring invalid schedule changes");
            }
        }
    });

    let stats = orchestrator.start().await?;
    info!(
        downgraded = stats.downgraded,
        requeued = stats.requeued,
        blocked = stats.blocked,
        cancelled = stats.cancelled,
        "Conductor running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    orchestrator.stop().await;
    reloader.abort();

    let metrics = orchestrator.metrics().await;
    info!(
        submitted = metrics.total_submitted,
        completed = metrics.total_completed,
        failed = metrics.total_failed,
        cancelled = metrics.total_cancelled,
        queued = metrics.queue_depth,
        "Final metrics"
    );
    Ok(())
}
