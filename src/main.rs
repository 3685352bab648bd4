mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_core::config::AppConfig;
use trellis_core::traits::{ResponseEvaluator, TextGenerator};
use trellis_llm::{LlmEvaluator, OpenAiGenerator};
use trellis_pipelines::{run_audit, run_triage, TriageCapabilities};

#[derive(Parser)]
#[command(name = "trellis", version, about = "Graph-based step orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "trellis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the exception triage pipeline against simulated monitoring data
    Triage {
        /// Seed the pattern catalogue so the exception resolves as a known issue
        #[arg(long)]
        known: bool,
    },
    /// Run the checklist audit pipeline
    Audit {
        /// Number of generated checklist items when no file is given
        #[arg(long, default_value = "20")]
        items: usize,

        /// Read checklist items from a file, one per line
        #[arg(long)]
        checklist: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trellis=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    // With a model configured, both pipelines talk to the real generation
    // service; otherwise the deterministic offline pair stands in.
    let (generator, evaluator): (Arc<dyn TextGenerator>, Arc<dyn ResponseEvaluator>) =
        match &config.model {
            Some(model) => {
                info!(model = %model.model_id, provider = %model.provider, "using configured model");
                let generator: Arc<dyn TextGenerator> =
                    Arc::new(OpenAiGenerator::new(model.clone()));
                let evaluator = Arc::new(LlmEvaluator::new(generator.clone()));
                (generator, evaluator)
            }
            None => {
                warn!("no model configured, running with the offline generator");
                (
                    Arc::new(demo::OfflineGenerator),
                    Arc::new(demo::OfflineEvaluator),
                )
            }
        };

    match cli.command {
        Commands::Triage { known } => {
            let knowledge = if known {
                demo::InMemoryKnowledgeBase::with_known_patterns()
            } else {
                demo::InMemoryKnowledgeBase::new()
            };

            let report = run_triage(TriageCapabilities {
                exceptions: Arc::new(demo::SimulatedExceptionSource),
                knowledge: Arc::new(knowledge),
                repository: Arc::new(demo::SimulatedRepository),
                generator,
            })
            .await?;

            println!("# {}", report.title);
            println!("{}\n", report.summary);
            if let Some(analysis) = &report.root_cause {
                println!("Root cause: {} (confidence {:.0}%)", analysis.cause, analysis.confidence * 100.0);
            }
            for rec in &report.recommendations {
                match &rec.file {
                    Some(file) => println!("Fix [{file}]: {}", rec.summary),
                    None => println!("Fix: {}", rec.summary),
                }
            }
        }
        Commands::Audit { items, checklist } => {
            let checklist = match checklist {
                Some(path) => std::fs::read_to_string(&path)?
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => (1..=items)
                    .map(|i| format!("Audit item {i}: verify the control is implemented"))
                    .collect::<Vec<String>>(),
            };

            let report = run_audit(checklist, &config.audit, generator, evaluator).await?;
            println!("{report}");
        }
    }

    Ok(())
}
