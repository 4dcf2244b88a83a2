//! ABOUTME: Clap command tree for the ocrflow binary
//! ABOUTME: process, runs, presets, engines, and worker subcommands

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ocrflow_config::{preset, preset_names, EngineConfig, OcrFlowSettings, RetryPolicy};
use ocrflow_core::EngineKind;
use ocrflow_engines::{EngineProvider, EngineRegistry};

use crate::bootstrap;

#[derive(Parser)]
#[command(name = "ocrflow", about = "OCR workflow orchestrator", version)]
pub struct Cli {
    /// Optional TOML settings file; environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a workflow over a document file and print the execution.
    Process {
        /// Path to the document (image or PDF).
        path: PathBuf,
        /// Workflow preset name.
        #[arg(long, default_value = "azure_primary")]
        workflow: String,
        /// Reuse an existing document row instead of inserting one.
        #[arg(long)]
        document_id: Option<i64>,
    },
    /// List the recorded runs for a document.
    Runs {
        document_id: i64,
        /// Only the most recent N runs, newest first.
        #[arg(long)]
        recent: Option<i64>,
    },
    /// List the built-in workflow presets.
    Presets,
    /// Check the health of every configured engine.
    Engines,
    /// Run the background task worker until interrupted.
    Worker,
}

fn load_settings(cli: &Cli) -> Result<OcrFlowSettings> {
    match &cli.config {
        Some(path) => Ok(OcrFlowSettings::from_toml_file(path)?),
        None => Ok(OcrFlowSettings::from_env()?),
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    match cli.command {
        Command::Process {
            path,
            workflow,
            document_id,
        } => {
            let app = bootstrap::build(settings).await?;
            let config = preset(&workflow)?;

            let document_id = match document_id {
                Some(id) => id,
                None => {
                    let mime = match path.extension().and_then(|e| e.to_str()) {
                        Some("pdf") => "application/pdf",
                        Some("jpg" | "jpeg") => "image/jpeg",
                        _ => "image/png",
                    };
                    app.run_store
                        .insert_document(&path.to_string_lossy(), mime, None)
                        .await?
                        .id
                }
            };

            let execution = app.engine.run_workflow(document_id, &path, &config).await?;
            println!("{}", serde_json::to_string_pretty(&execution)?);
            Ok(())
        }
        Command::Runs {
            document_id,
            recent,
        } => {
            let app = bootstrap::build(settings).await?;
            match recent {
                Some(limit) => {
                    let runs = app
                        .run_store
                        .recent_runs_for_document(document_id, limit)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&runs)?);
                }
                None => {
                    let runs = app.handle.get_document_runs(document_id).await?;
                    println!("{}", serde_json::to_string_pretty(&runs)?);
                }
            }
            Ok(())
        }
        Command::Presets => {
            for name in preset_names() {
                let config = preset(name).context("built-in preset must resolve")?;
                let chain: Vec<&str> = config
                    .engine_kinds()
                    .iter()
                    .map(EngineKind::as_str)
                    .collect();
                println!("{name}: {}", chain.join(" -> "));
            }
            Ok(())
        }
        Command::Engines => {
            let registry = EngineRegistry::new();
            for kind in EngineKind::ALL {
                let config = EngineConfig::new(kind, kind.as_str());
                match registry.acquire(&config, &RetryPolicy::default()).await {
                    Ok(_) => println!("{kind}: healthy"),
                    Err(e) => println!("{kind}: unavailable ({e})"),
                }
            }
            Ok(())
        }
        Command::Worker => {
            let app = bootstrap::build(settings).await?;
            println!(
                "worker started (queues: {}), press Ctrl-C to stop",
                ocrflow_tasks::queues::ALL.join(", ")
            );
            // Keep the runner alive until the process is interrupted.
            let _runner = app.runner;
            tokio::signal::ctrl_c().await?;
            println!("worker stopped");
            Ok(())
        }
    }
}
