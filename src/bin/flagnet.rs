//! Flagnet CLI binary.
//!
//! Adversarial image classification challenge server.
//!
//! # Commands
//!
//! - `serve` - Start the HTTP challenge server
//! - `classify` - Classify a local image file
//! - `hint` - Print a hint
//! - `inspect` - Load a parameter file and print model info
//! - `init-weights` - Write a deterministic placeholder parameter file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flagnet::{
    inference::{ResNetConfig, StateDict},
    server::create_router,
    AppState, ClassLabelTable, Classifier, Config, HintBook, ModelStore, VERSION,
};

#[derive(Parser)]
#[command(name = "flagnet")]
#[command(version = VERSION)]
#[command(about = "Flagnet - adversarial image classification challenge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP challenge server
    Serve {
        /// Config file (default: <config dir>/flagnet/config.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces (0.0.0.0)
        #[arg(long)]
        bind_all: bool,

        /// Path to the safetensors parameter file
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Network stem width
        #[arg(long)]
        base_width: Option<usize>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Emit logs as JSON
        #[arg(long)]
        log_json: bool,
    },

    /// Classify a local image file and print the response JSON
    Classify {
        /// Image file
        image: PathBuf,

        /// Path to the safetensors parameter file
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Network stem width
        #[arg(long)]
        base_width: Option<usize>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the hint for an attempt number
    Hint {
        /// Attempt number (default: 0)
        #[arg(allow_negative_numbers = true)]
        attempt: Option<i64>,
    },

    /// Load a parameter file and print model info
    Inspect {
        /// Path to the safetensors parameter file
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Network stem width
        #[arg(long)]
        base_width: Option<usize>,
    },

    /// Write a deterministic placeholder parameter file
    InitWeights {
        /// Output path
        #[arg(short, long)]
        out: PathBuf,

        /// Network stem width
        #[arg(long, default_value = "64")]
        base_width: usize,

        /// RNG seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            host,
            bind_all,
            model,
            base_width,
            verbose,
            log_json,
        } => {
            init_logging(verbose, log_json);
            let mut config = load_config(config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if bind_all {
                config.server.host = "0.0.0.0".to_string();
            }
            apply_model_overrides(&mut config, model, base_width);
            cmd_serve(&config)
        },

        Commands::Classify {
            image,
            model,
            base_width,
            verbose,
        } => {
            init_logging(verbose, false);
            let mut config = load_config(None)?;
            apply_model_overrides(&mut config, model, base_width);
            cmd_classify(&config, &image)
        },

        Commands::Hint { attempt } => cmd_hint(attempt.unwrap_or(0)),

        Commands::Inspect { model, base_width } => {
            init_logging(false, false);
            let mut config = load_config(None)?;
            apply_model_overrides(&mut config, model, base_width);
            cmd_inspect(&config)
        },

        Commands::InitWeights {
            out,
            base_width,
            seed,
        } => cmd_init_weights(&out, base_width, seed),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// File config (explicit path, else the default location if it exists),
/// then environment variables on top.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let file_config = match path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        },
    };

    Ok(file_config.merge(Config::from_env()))
}

fn apply_model_overrides(config: &mut Config, model: Option<PathBuf>, base_width: Option<usize>) {
    if let Some(path) = model {
        config.model.path = path;
    }
    if let Some(width) = base_width {
        config.model.base_width = width;
    }
}

fn load_classifier(config: &Config) -> anyhow::Result<Classifier> {
    let labels = ClassLabelTable::default();
    let model = ModelStore::new(&config.model.path, &labels)
        .with_base_width(config.model.base_width)
        .load()
        .context("Model is unavailable")?;

    Ok(Classifier::new(Arc::new(model))?.with_preprocessor(config.preprocessor()))
}

fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let server_config = config.server_config()?;
    let classifier = load_classifier(config)?;

    // Create state and router
    let state = Arc::new(AppState::new(server_config.clone(), classifier));
    let app = create_router(state);

    // Start server
    tracing::info!("Starting Flagnet server on {}", server_config.addr);
    tracing::info!(
        "Max upload: {} bytes, CORS: {}",
        server_config.max_body_size,
        if server_config.cors_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(server_config.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("Server stopped");
        Ok::<_, anyhow::Error>(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn cmd_classify(config: &Config, image: &Path) -> anyhow::Result<()> {
    let classifier = load_classifier(config)?;
    let bytes =
        std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;

    let result = classifier.classify(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn cmd_hint(attempt: i64) -> anyhow::Result<()> {
    let hints = HintBook::default();
    let output = serde_json::json!({ "hint": hints.hint(attempt) });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_inspect(config: &Config) -> anyhow::Result<()> {
    let classifier = load_classifier(config)?;
    let info = classifier.model_info();

    println!("Model: {}", config.model.path.display());
    println!("  Architecture:  {}", info.architecture);
    println!("  Classes:       {}", info.num_classes);
    println!("  Base width:    {}", info.base_width);
    println!("  Parameters:    {}", info.parameter_count);
    println!(
        "  Labels:        {}",
        classifier.labels().iter().collect::<Vec<_>>().join(", ")
    );

    Ok(())
}

fn cmd_init_weights(out: &Path, base_width: usize, seed: u64) -> anyhow::Result<()> {
    let labels = ClassLabelTable::default();
    let config = ResNetConfig::resnet18(labels.len()).with_base_width(base_width);
    let dict = StateDict::placeholder(&config, seed);

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    dict.write(out)?;

    eprintln!(
        "Wrote {} tensors (base width {base_width}, seed {seed}) to {}",
        dict.len(),
        out.display()
    );
    eprintln!("These are untrained placeholder weights; predictions are meaningless.");

    Ok(())
}
