//! Anchorite - Mission-Aware Traffic Filtering Engine
//!
//! Command-line front end for deciding requests, recording feedback and
//! managing the mission, the model and the configuration.

use anchorite_core::{
    error::{AnchoriteError, Result},
    learning::SeedSet,
    DecisionId, DecisionOrchestrator, Feedback, FilterConfig, RawRequest, ResponseMetadata,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anchorite")]
#[command(about = "Mission-aware traffic filtering engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, env = "ANCHORITE_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides the configuration file)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide one URL and print the decision as JSON
    Decide {
        url: String,

        /// Page title
        #[arg(long)]
        title: Option<String>,

        /// Page description
        #[arg(long)]
        description: Option<String>,

        /// Page keyword (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Page contains video
        #[arg(long)]
        video: bool,

        /// Page contains forms
        #[arg(long)]
        forms: bool,
    },

    /// Record feedback on a previous decision
    Feedback {
        decision_id: String,

        /// correct, incorrect, allow or block
        feedback: String,
    },

    /// Show or change the mission
    Mission {
        #[command(subcommand)]
        command: MissionCommands,
    },

    /// Print decision statistics as JSON
    Stats,

    /// Train on unconsumed stored feedback and save the model snapshot
    Train {
        /// Pretrain on a labelled seed list (JSON) first
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Write the default configuration as TOML
    InitConfig { path: PathBuf },
}

#[derive(Subcommand)]
enum MissionCommands {
    /// Replace the current mission
    Set {
        text: String,

        /// Heuristic similarity threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f32>,

        /// Planned session length in minutes
        #[arg(long)]
        minutes: Option<u32>,
    },

    /// Import a mission.json file
    Import { path: PathBuf },

    /// Print the current mission
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::new(format!(
        "anchorite={},anchorite_core={}",
        level.as_str().to_lowercase(),
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Anchorite v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Commands::InitConfig { path } = &cli.command {
        let toml = FilterConfig::default().to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = FilterConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db_path {
        config.storage.db_path = db_path;
    }
    debug!("Using database: {}", config.storage.db_path.display());

    let orchestrator = DecisionOrchestrator::open(config).await?;
    let result = run(&orchestrator, cli.command).await;
    orchestrator.shutdown().await?;
    result
}

async fn run(orchestrator: &DecisionOrchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::Decide {
            url,
            title,
            description,
            keywords,
            video,
            forms,
        } => {
            let has_metadata =
                title.is_some() || description.is_some() || !keywords.is_empty() || video || forms;
            let response = has_metadata.then(|| ResponseMetadata {
                title: title.unwrap_or_default(),
                description: description.unwrap_or_default(),
                keywords,
                has_video: video,
                has_forms: forms,
                ..Default::default()
            });

            let decision = orchestrator
                .decide(&RawRequest::get(url), response.as_ref())
                .await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Feedback {
            decision_id,
            feedback,
        } => {
            let id = DecisionId::from_string(&decision_id)
                .map_err(|e| AnchoriteError::Validation(format!("Invalid decision id: {}", e)))?;
            let feedback: Feedback = feedback.parse().map_err(AnchoriteError::Validation)?;
            orchestrator.submit_feedback(id, feedback).await?;
            println!("Recorded {} for {}", feedback.as_str(), id);
        }
        Commands::Mission { command } => match command {
            MissionCommands::Set {
                text,
                threshold,
                minutes,
            } => {
                let mission = orchestrator.set_mission(&text, threshold, minutes).await?;
                println!("Mission set ({}): {}", mission.fingerprint(), mission.text());
            }
            MissionCommands::Import { path } => {
                let mission = orchestrator.import_mission(&path).await?;
                println!("Mission imported ({}): {}", mission.fingerprint(), mission.text());
            }
            MissionCommands::Show => {
                let mission = orchestrator.current_mission();
                println!("{}", serde_json::to_string_pretty(&*mission)?);
            }
        },
        Commands::Stats => {
            let stats = orchestrator.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Train { seed } => {
            let before = orchestrator.current_model().training_step;
            if let Some(path) = seed {
                let seeds = SeedSet::from_json_file(&path)?;
                let step = orchestrator.bootstrap(&seeds).await?;
                println!(
                    "Pretrained on {} seed examples ({} epochs), training step {}",
                    seeds.examples.len(),
                    seeds.epochs(),
                    step
                );
            }
            let step = orchestrator.flush().await?;
            let model = orchestrator.current_model();
            info!(before, step, "Training complete");
            println!(
                "Model version {} at training step {} (exploration {:.3})",
                model.version, model.training_step, model.exploration_rate
            );
        }
        Commands::InitConfig { .. } => {}
    }
    Ok(())
}
