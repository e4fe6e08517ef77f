//! # Crop Advisor CLI (`crop`)
//!
//! Command-line front end for the crop recommendation and farming
//! assistant services.
//!
//! ## Usage
//!
//! ```bash
//! crop --config ./config/crop.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crop health` | Crop service health and per-model status |
//! | `crop ping` | Reachability of both services |
//! | `crop models` | Available models and feature ranges |
//! | `crop predict` | Recommend a crop for the given conditions |
//! | `crop batch <file>` | One prediction per sample in a JSON file |
//! | `crop chat "<message>"` | Ask the farming assistant |
//! | `crop soil` | Soil analysis for the given conditions |
//! | `crop insights` | Recommendation plus assistant insights |
//! | `crop diagnose <symptom>...` | Expert-system diagnosis |
//! | `crop symptoms` / `crop diseases` / `crop disease <name>` | Expert-system lookups |
//! | `crop chat-models` | Language models the expert system offers |
//! | `crop validate-model <name>` | Check a language model name with the expert system |
//!
//! ## Examples
//!
//! ```bash
//! # Top 3 crops from the neural network model
//! crop predict --nitrogen 60 --ph 7.1 --model neural_network --top-k 3 --mode top-k
//!
//! # Stream a reply
//! crop chat "How often should I irrigate rice?" --stream
//! ```
//!
//! A missing config file is not an error: built-in defaults are used and
//! `CROP_API_URL` / `MESA_API_URL` still apply.

use clap::{Args, Parser, Subcommand};
use std::num::NonZeroU32;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crop_advisor::commands::{self, PredictMode};
use crop_advisor::config;
use crop_advisor::error::DispatchError;
use crop_advisor::models::{FeaturePatch, ModelType};

/// Crop Advisor CLI: crop recommendations and a farming assistant.
#[derive(Parser)]
#[command(
    name = "crop",
    about = "Crop Advisor: crop recommendations and a farming assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/crop.toml`. Missing files fall back to
    /// built-in defaults.
    #[arg(long, global = true, default_value = "./config/crop.toml")]
    config: PathBuf,

    /// Log each request at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Soil and climate conditions. Omitted flags keep their defaults
/// (N 90, P 42, K 43, 25 °C, 70 %, pH 6.5, 200 mm).
#[derive(Args, Debug, Default)]
struct FeatureArgs {
    /// Nitrogen content (N).
    #[arg(long, short = 'n')]
    nitrogen: Option<f64>,
    /// Phosphorus content (P).
    #[arg(long, short = 'p')]
    phosphorus: Option<f64>,
    /// Potassium content (K).
    #[arg(long, short = 'k')]
    potassium: Option<f64>,
    /// Temperature in °C.
    #[arg(long)]
    temperature: Option<f64>,
    /// Relative humidity in %.
    #[arg(long)]
    humidity: Option<f64>,
    /// Soil pH.
    #[arg(long)]
    ph: Option<f64>,
    /// Rainfall in mm.
    #[arg(long)]
    rainfall: Option<f64>,
}

impl FeatureArgs {
    fn patch(&self) -> FeaturePatch {
        FeaturePatch {
            nitrogen: self.nitrogen,
            phosphorus: self.phosphorus,
            potassium: self.potassium,
            temperature: self.temperature,
            humidity: self.humidity,
            ph: self.ph,
            rainfall: self.rainfall,
        }
    }
}

/// Model selection shared by prediction commands.
#[derive(Args, Debug)]
struct ModelArgs {
    /// Model variant: `random_forest` (`rf`) or `neural_network` (`nn`).
    #[arg(long, default_value = "random_forest")]
    model: ModelType,

    /// Number of ranked alternatives to request.
    #[arg(long, default_value = "5")]
    top_k: NonZeroU32,
}

#[derive(Subcommand)]
enum Commands {
    /// Show crop service health and per-model status.
    Health,

    /// Check that both services respond.
    Ping,

    /// List available models and expected feature ranges.
    Models,

    /// Recommend a crop for the given conditions.
    Predict {
        #[command(flatten)]
        features: FeatureArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Output shape.
        #[arg(long, value_enum, default_value_t = PredictMode::Report)]
        mode: PredictMode,
    },

    /// Predict one crop per sample.
    ///
    /// The file holds a JSON array of objects with keys
    /// `N`, `P`, `K`, `temperature`, `humidity`, `ph`, `rainfall`.
    Batch {
        /// Path to the samples file.
        path: PathBuf,

        /// Model variant; the service default when omitted.
        #[arg(long)]
        model: Option<ModelType>,
    },

    /// Ask the farming assistant.
    Chat {
        /// The question.
        message: String,

        /// Optional system instruction sent before the question.
        #[arg(long)]
        system: Option<String>,

        /// Print the reply incrementally as it arrives.
        #[arg(long)]
        stream: bool,
    },

    /// Analyse soil conditions.
    Soil {
        #[command(flatten)]
        features: FeatureArgs,
    },

    /// Recommend a crop, then ask the assistant for growing insights.
    Insights {
        #[command(flatten)]
        features: FeatureArgs,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Diagnose a crop problem from observed symptoms.
    Diagnose {
        /// Observed symptoms.
        #[arg(required = true)]
        symptoms: Vec<String>,
    },

    /// List the symptoms the expert system knows.
    Symptoms,

    /// List the diseases the expert system knows.
    Diseases,

    /// Show one disease.
    Disease {
        /// Disease name.
        name: String,
    },

    /// List the language models the expert system can chat with.
    ChatModels,

    /// Ask the expert system whether a language model name is usable.
    ValidateModel {
        /// Model name, e.g. llama-3.1-8b-instant.
        name: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "crop_advisor=debug,crop=debug"
    } else {
        "crop_advisor=info,crop=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config_or_default(&cli.config)?;
    tracing::debug!(
        crop = %cfg.crop.base_url,
        expert = %cfg.expert.base_url,
        "configuration loaded"
    );

    match cli.command {
        Commands::Health => commands::run_health(&cfg).await?,
        Commands::Ping => commands::run_ping(&cfg).await?,
        Commands::Models => commands::run_models(&cfg).await?,
        Commands::Predict {
            features,
            model,
            mode,
        } => {
            commands::run_predict(&cfg, &features.patch(), model.model, model.top_k, mode).await?;
        }
        Commands::Batch { path, model } => {
            commands::run_batch(&cfg, &path, model).await?;
        }
        Commands::Chat {
            message,
            system,
            stream,
        } => {
            commands::run_chat(&cfg, &message, system.as_deref(), stream).await?;
        }
        Commands::Soil { features } => {
            commands::run_soil(&cfg, &features.patch()).await?;
        }
        Commands::Insights { features, model } => {
            commands::run_insights(&cfg, &features.patch(), model.model, model.top_k).await?;
        }
        Commands::Diagnose { symptoms } => commands::run_diagnose(&cfg, &symptoms).await?,
        Commands::Symptoms => commands::run_symptoms(&cfg).await?,
        Commands::Diseases => commands::run_diseases(&cfg).await?,
        Commands::Disease { name } => commands::run_disease(&cfg, &name).await?,
        Commands::ChatModels => commands::run_chat_models(&cfg).await?,
        Commands::ValidateModel { name } => commands::run_validate_model(&cfg, &name).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        let message = match e.downcast_ref::<DispatchError>() {
            Some(dispatch) => dispatch.summary(),
            None => format!("{:#}", e),
        };
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }
}
