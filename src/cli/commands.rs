//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use tokio::sync::mpsc;

use crate::ocr::{content_hash, EngineRegistry};
use crate::repository::JsonExecutionRepository;
use crate::workflow::{
    CircuitBreakerStore, RetryController, SelectionStrategy, WorkflowConfig, WorkflowCoordinator,
    WorkflowEvent, WorkflowOverrides,
};

#[derive(Parser)]
#[command(name = "ocrflow")]
#[command(about = "OCR workflow orchestration for document ingestion")]
#[command(version)]
pub struct Cli {
    /// Data directory for execution records
    #[arg(long, global = true, default_value = "./ocrflow-data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run an OCR workflow against a document file
    Run {
        /// Document to process (PDF or image)
        file: PathBuf,
        /// Workflow: a preset name (azure_primary, google_primary,
        /// opensource) or a path to a TOML config
        #[arg(short, long, default_value = "opensource")]
        workflow: String,
        /// Document id (defaults to the content hash)
        #[arg(long)]
        document_id: Option<String>,
        /// Run fallback engines in parallel
        #[arg(long)]
        parallel: bool,
        /// Keep running fallbacks even after a passing result
        #[arg(long)]
        no_stop_on_success: bool,
        /// Override the result selection strategy
        #[arg(long)]
        strategy: Option<String>,
        /// Print the full execution record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which OCR engines are usable in this environment
    Engines,

    /// Print a workflow configuration as TOML
    ShowConfig {
        /// Preset name or path to a TOML config
        workflow: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            workflow,
            document_id,
            parallel,
            no_stop_on_success,
            strategy,
            json,
        } => {
            run_workflow(
                &cli.data_dir,
                &file,
                &workflow,
                document_id,
                parallel,
                no_stop_on_success,
                strategy,
                json,
            )
            .await
        }
        Commands::Engines => list_engines(),
        Commands::ShowConfig { workflow } => show_config(&workflow),
    }
}

fn load_workflow(name: &str) -> anyhow::Result<WorkflowConfig> {
    if let Some(preset) = WorkflowConfig::preset(name) {
        return Ok(preset);
    }
    let path = PathBuf::from(name);
    if path.exists() {
        return WorkflowConfig::from_toml_file(&path)
            .with_context(|| format!("loading workflow config from {:?}", path));
    }
    anyhow::bail!(
        "unknown workflow {:?} (presets: azure_primary, google_primary, opensource)",
        name
    );
}

#[allow(clippy::too_many_arguments)]
async fn run_workflow(
    data_dir: &std::path::Path,
    file: &std::path::Path,
    workflow: &str,
    document_id: Option<String>,
    parallel: bool,
    no_stop_on_success: bool,
    strategy: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_workflow(workflow)?;

    let mut overrides = WorkflowOverrides::default();
    if parallel {
        overrides.parallel_fallbacks = Some(true);
    }
    if no_stop_on_success {
        overrides.stop_on_success = Some(false);
    }
    if let Some(name) = strategy {
        let strategy = SelectionStrategy::from_str(&name)
            .with_context(|| format!("unknown selection strategy {:?}", name))?;
        overrides.selection_strategy = Some(strategy);
    }

    let bytes = std::fs::read(file).with_context(|| format!("reading {:?}", file))?;
    let document_id = document_id.unwrap_or_else(|| content_hash(&bytes));

    let repository = Arc::new(JsonExecutionRepository::new(data_dir.join("executions"))?);
    let coordinator = WorkflowCoordinator::new(
        Arc::new(EngineRegistry::with_defaults()),
        RetryController::new(CircuitBreakerStore::new()),
        repository,
    );

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    println!(
        "{} Processing {} with workflow {}",
        style("→").cyan(),
        file.display(),
        style(&config.workflow_id).bold()
    );

    let outcome = coordinator
        .process_document(&document_id, bytes, &config, Some(&overrides), Some(event_tx))
        .await?;
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.execution)?);
        return Ok(());
    }

    println!();
    match outcome.selected_engine {
        Some(engine) => {
            let marker = if outcome.best_effort {
                style("⚠").yellow()
            } else {
                style("✓").green()
            };
            println!(
                "{} Selected {} (confidence {:.2}{})",
                marker,
                style(engine.as_str()).bold(),
                outcome.confidence.unwrap_or_default(),
                if outcome.best_effort {
                    ", best effort"
                } else {
                    ""
                }
            );
            if let Some(text) = &outcome.extracted_text {
                let preview: String = text.chars().take(400).collect();
                println!("\n{}", preview);
                if text.chars().count() > 400 {
                    println!("{}", style("… (truncated)").dim());
                }
            }
        }
        None => {
            println!(
                "{} {}",
                style("✗").red(),
                outcome
                    .failure
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "no result selected".to_string())
            );
        }
    }
    if let Some(persist_error) = outcome.persist_error {
        println!(
            "{} execution record not persisted: {}",
            style("⚠").yellow(),
            persist_error
        );
    }
    println!(
        "{} execution {} ({})",
        style("·").dim(),
        outcome.execution_id,
        outcome.status.as_str()
    );

    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::EngineStarted { engine, slot } => {
            println!("  {} [{}] {} running", style("→").cyan(), slot, engine);
        }
        WorkflowEvent::EngineCompleted {
            engine,
            slot,
            passed,
            score,
            confidence,
        } => {
            let marker = if *passed {
                style("✓").green()
            } else {
                style("✗").yellow()
            };
            println!(
                "  {} [{}] {} score {:.2}, confidence {:.2}",
                marker, slot, engine, score, confidence
            );
        }
        WorkflowEvent::EngineFailed {
            engine,
            slot,
            error,
        } => {
            println!("  {} [{}] {} failed: {}", style("✗").red(), slot, engine, error);
        }
        WorkflowEvent::FallbacksStarted { count, parallel } => {
            println!(
                "  {} running {} fallback engine(s){}",
                style("→").cyan(),
                count,
                if *parallel { " in parallel" } else { "" }
            );
        }
        _ => {}
    }
}

fn list_engines() -> anyhow::Result<()> {
    let registry = EngineRegistry::with_defaults();
    for (kind, available, hint) in registry.availability() {
        let marker = if available {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("{} {:10} {}", marker, kind.as_str(), style(hint).dim());
    }
    Ok(())
}

fn show_config(workflow: &str) -> anyhow::Result<()> {
    let config = load_workflow(workflow)?;
    println!("{}", config.to_toml()?);
    Ok(())
}
