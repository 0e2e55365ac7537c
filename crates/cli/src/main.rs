//! `hopperflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: start the API server and arm every active workflow.
//! - `migrate`: run pending database migrations.
//! - `validate`: validate a workflow definition JSON file.
//! - `next-runs`: print the upcoming fire times of a cron expression.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{DatabaseArgs, LogFormat, ServeArgs};
use db::{MemoryStore, PgStore, Store};
use engine::{BroadcastSink, WorkflowDefinition, WorkflowEngine};
use nodes::NodeRegistry;

#[derive(Parser)]
#[command(
    name = "hopperflow",
    about = "Workflow automation engine for storage bots",
    version
)]
struct Cli {
    /// Log output format; the filter comes from RUST_LOG.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve(ServeArgs),
    /// Run pending database migrations.
    Migrate(DatabaseArgs),
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Show when a schedule trigger would fire.
    NextRuns {
        /// Five-field cron expression, e.g. "*/5 * * * *".
        cron: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
        /// Start point (RFC 3339); defaults to now.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Migrate(args) => {
            let url = args
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for migrate")?;
            let pool = db::pool::create_pool(url, &args.pool_settings())
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
            Ok(())
        }
        Command::Validate { path } => validate(&path),
        Command::NextRuns { cron, count, from } => {
            let times = engine::upcoming_fire_times(&cron, from.unwrap_or_else(Utc::now), count);
            if times.is_empty() {
                bail!("'{cron}' is not a supported schedule; it would never fire");
            }
            for time in times {
                println!("{}", time.to_rfc3339());
            }
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store: Arc<dyn Store> = if args.in_memory {
        warn!("running with the in-memory store; nothing is persisted");
        Arc::new(MemoryStore::new())
    } else {
        let url = args
            .database
            .database_url
            .as_deref()
            .context("DATABASE_URL is required unless --in-memory is set")?;
        let pool = db::pool::create_pool(url, &args.database.pool_settings())
            .await
            .context("failed to connect to database")?;
        Arc::new(PgStore::new(pool))
    };

    let sink = Arc::new(BroadcastSink::new(1024));
    let mut notifications = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => debug!(user_id = %n.user_id, event = n.event.as_str(), payload = %n.payload, "notification"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let engine = WorkflowEngine::new(
        store,
        Arc::new(NodeRegistry::with_builtins()),
        sink,
        args.engine_config(),
    );
    let armed = engine
        .reconcile()
        .await
        .context("failed to re-arm active workflows")?;
    info!(armed, "Starting API server on {}", args.bind);

    api::serve(&args.bind, api::AppState::new(engine))
        .await
        .context("API server failed")
}

fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let definition: WorkflowDefinition =
        serde_json::from_str(&content).context("not a workflow definition")?;

    let order = engine::validate_definition(&definition).context("validation failed")?;
    println!("Workflow is valid. Topological order: {order:?}");

    if let Some(trigger) = definition.trigger() {
        println!("Trigger: {trigger:?}");
    }
    let registry = NodeRegistry::with_builtins();
    for node in &definition.nodes {
        if !registry.contains(&node.node_type) && !node.is_trigger() {
            println!(
                "note: node '{}' has type '{}', which must be registered by its domain",
                node.id, node.node_type
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn next_runs_parses_count_and_start() {
        let cli = Cli::try_parse_from([
            "hopperflow",
            "next-runs",
            "*/15 * * * *",
            "-n",
            "3",
            "--from",
            "2024-03-10T08:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Command::NextRuns { cron, count, from } => {
                assert_eq!(cron, "*/15 * * * *");
                assert_eq!(count, 3);
                let times = engine::upcoming_fire_times(&cron, from.unwrap(), count);
                assert_eq!(times.len(), 3);
            }
            _ => panic!("expected next-runs"),
        }
    }

    #[test]
    fn serve_wait_timeout_feeds_engine_config() {
        let cli = Cli::try_parse_from(["hopperflow", "serve", "--in-memory", "--wait-timeout-secs", "30"])
            .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.in_memory);
        assert_eq!(args.engine_config().default_wait_timeout.as_secs(), 30);
    }
}
