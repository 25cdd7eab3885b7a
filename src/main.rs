//! ocr-bridge - OCR an image and get paragraphs back
//!
//! Also hosts the bridge commands over stdin/stdout for a UI process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ocr_bridge::config::{self, ConfigSource};
use ocr_bridge::layout::Detection;
use ocr_bridge::storage;
use ocr_bridge::vision::ModelManager;
use ocr_bridge::{Bridge, OcrResponse, COMMANDS};

/// ocr-bridge - OCR callback bridge
#[derive(Parser, Debug)]
#[command(name = "ocr-bridge", version)]
#[command(about = "Recognize text in images and group it into paragraphs")]
struct Args {
    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// OCR an image file
    Read {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,

        /// Language code; repeat for several (default: from config)
        #[arg(short, long = "language")]
        languages: Vec<String>,

        /// Print the JSON response instead of plain paragraphs
        #[arg(long)]
        json: bool,
    },
    /// Group a JSON array of detections into paragraphs
    Group {
        /// File containing `[{"bounding_box": ..., "text": ..., "confidence": ...}, ...]`
        detections: PathBuf,

        /// Print the JSON response instead of plain paragraphs
        #[arg(long)]
        json: bool,
    },
    /// Serve bridge commands as JSON lines on stdin/stdout
    Serve,
    /// List the registered bridge commands
    Commands,
    /// Manage PaddleOCR model files
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsAction {
    /// Show which model files are present
    Status,
    /// Download missing model files
    Download,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| storage::default_config_path().ok());
    let (config, source) = config::load_or_default(config_path.as_deref())?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level));

    match source {
        ConfigSource::Missing(path) => {
            if let Err(e) = config::save_config(&config, &path) {
                warn!("Could not write default configuration to {:?}: {:#}", path, e);
            } else {
                info!("Created default configuration at {:?}", path);
            }
        }
        ConfigSource::File(path) => info!("Loaded configuration from {:?}", path),
        ConfigSource::Defaults => info!("Using default configuration"),
    }

    match args.command {
        Commands::Read {
            image,
            languages,
            json,
        } => {
            let buffer = std::fs::read(&image)
                .with_context(|| format!("Failed to read image {:?}", image))?;
            let bridge = Bridge::new(&config);
            let languages = if languages.is_empty() {
                bridge.default_languages().to_vec()
            } else {
                languages
            };

            info!("Reading {:?} ({} bytes)", image, buffer.len());
            Ok(print_response(&bridge.buffer_to_text(&buffer, &languages), json))
        }
        Commands::Group { detections, json } => {
            let content = std::fs::read_to_string(&detections)
                .with_context(|| format!("Failed to read detections file {:?}", detections))?;
            let parsed: Vec<Detection> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse detections file {:?}", detections))?;

            let bridge = Bridge::new(&config);
            Ok(print_response(&bridge.group_detections(&parsed), json))
        }
        Commands::Serve => {
            let bridge = Bridge::new(&config);
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            ocr_bridge::bridge::serve(&bridge, BufReader::new(stdin.lock()), stdout.lock())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Commands => {
            for command in COMMANDS {
                println!("{:<18} {}", command.name, command.description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models { action } => {
            let manager = match &config.ocr.models_dir {
                Some(dir) => ModelManager::with_dir(dir.clone())?,
                None => ModelManager::new()?,
            };

            match action {
                ModelsAction::Status => {
                    println!("Models directory: {}", manager.models_dir().display());
                    for status in manager.model_status() {
                        let state = match (status.available, status.size_bytes) {
                            (true, _) => "ready",
                            (false, Some(_)) => "incomplete",
                            (false, None) => "missing",
                        };
                        println!(
                            "  {:<22} {:<10} {}",
                            status.model_type.display_name(),
                            state,
                            manager.model_path(status.model_type).display()
                        );
                    }
                }
                ModelsAction::Download => {
                    manager.with_auto_download(true).ensure_all_models()?;
                    println!("All models ready");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print a response and map it to the process exit code
fn print_response(response: &OcrResponse, json: bool) -> ExitCode {
    if json {
        println!("{}", response.to_json());
    } else if let Some(error) = response.error() {
        eprintln!("error: {}", error);
    } else {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", response.paragraphs().join("\n\n"));
    }

    if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Logs go to stderr so stdout stays free for results and host replies
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
