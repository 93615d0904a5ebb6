mod config;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepwright_core::store::InMemoryStore;
use stepwright_core::{ToolCatalog, WorkflowRecord};
use stepwright_engine::{AuthoringOutcome, AuthoringRequest, WorkflowAuthor};
use stepwright_llm::authoring::conversation::{ChatEntry, ConversationSession};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "stepwright", about = "Edit a workflow DAG through chat")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "stepwright.toml")]
    config: PathBuf,

    /// Workflow JSON file (read, and written back on --confirm)
    #[arg(long)]
    workflow: PathBuf,

    /// Tool catalog JSON file
    #[arg(long)]
    tools: PathBuf,

    /// The chat message, or the workflow description with --draft
    #[arg(long)]
    message: String,

    /// Prior conversation as a JSON array of {role, content}
    #[arg(long)]
    history: Option<PathBuf>,

    /// Apply the resulting proposal immediately
    #[arg(long)]
    confirm: bool,

    /// Override model name
    #[arg(long)]
    model: Option<String>,

    /// Plan the workflow from the message instead of editing it
    #[arg(long)]
    draft: bool,
}

#[derive(Serialize)]
struct Output {
    outcome: AuthoringOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<WorkflowRecord>,
}

// ── Setup ───────────────────────────────────────────────────────

fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(console).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log dir: {}", dir.display()))?;
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("stepwright")
        .filename_suffix("log")
        .build(dir)
        .context("Failed to create log file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(console)
        .with(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug")),
        )
        .init();
    Ok(Some(guard))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}: {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}: {}", what, path.display()))
}

// ── Main ────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let _guard = init_logging(config.logging.dir.as_deref())?;

    let workflow: WorkflowRecord = read_json(&cli.workflow, "workflow")?;
    let catalog: ToolCatalog = read_json(&cli.tools, "tool catalog")?;
    let session = match &cli.history {
        Some(path) => ConversationSession {
            messages: read_json::<Vec<ChatEntry>>(path, "history")?,
        },
        None => ConversationSession::new(),
    };

    let llm = config
        .llm
        .to_llm_config(cli.model.as_deref(), |name| std::env::var(name).ok());
    info!(model = %llm.model, workflow_id = %workflow.id, steps = workflow.dag.len(), "Starting authoring turn");

    let store = Arc::new(InMemoryStore::with_workflow(workflow.clone()));
    let author = WorkflowAuthor::from_llm_config(llm, store, catalog, config.authoring);
    let context = author.context_from(&session);

    let outcome = if cli.draft {
        author
            .draft_workflow(&workflow.id, &cli.message, context.as_deref())
            .await
    } else {
        author
            .handle_message(AuthoringRequest::new(&workflow.id, &cli.message).with_context(context))
            .await
    }
    .map_err(|e| {
        let status = e.status_code();
        anyhow::Error::new(e).context(format!("Authoring failed (status {})", status))
    })?;

    let updated = match (cli.confirm, outcome.proposal()) {
        (true, Some(proposal)) => {
            let updated = author
                .confirm_proposal(proposal.id)
                .await
                .context("Failed to apply proposal")?;
            let json = serde_json::to_string_pretty(&updated)?;
            std::fs::write(&cli.workflow, json)
                .with_context(|| format!("Failed to write workflow: {}", cli.workflow.display()))?;
            info!(path = %cli.workflow.display(), steps = updated.dag.len(), "Workflow updated");
            Some(updated)
        }
        _ => None,
    };

    let output = Output {
        outcome,
        workflow: updated,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
