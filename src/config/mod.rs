//! Application Configuration
//!
//! User settings stored in TOML format. Every section and field is optional in the
//! file; missing values take their defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::layout::DEFAULT_GAP_FACTOR;
use crate::vision::OcrBackend;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Paragraph grouping settings
    pub layout: LayoutSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// OCR-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Which OCR backend to load
    pub backend: OcrBackend,
    /// Language codes used when a request does not name any
    pub languages: Vec<String>,
    /// Directory holding PaddleOCR model files (defaults to the data directory)
    pub models_dir: Option<PathBuf>,
    /// Download missing model files on first use
    pub auto_download: bool,
    /// Detections below this confidence are dropped before grouping
    pub min_confidence: f32,
    /// Longest image side fed to the detection model
    pub det_limit_side: u32,
    /// Probability above which a pixel counts as text
    pub det_threshold: f32,
    /// Minimum mean probability of a text box
    pub box_threshold: f32,
    /// How far detected boxes are grown before cropping
    pub unclip_ratio: f32,
    /// Widest crop fed to the recognition model
    pub rec_max_width: u32,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backend: OcrBackend::default(),
            languages: vec!["en".to_string()],
            models_dir: None,
            auto_download: true,
            min_confidence: 0.0,
            det_limit_side: 960,
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            rec_max_width: 960,
            intra_threads: 4,
        }
    }
}

/// Paragraph grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Multiple of the average line height that starts a new paragraph
    pub gap_factor: f64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            gap_factor: DEFAULT_GAP_FACTOR,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let ocr = &self.ocr;

        if ocr.languages.is_empty() {
            bail!("ocr.languages must name at least one language");
        }
        if ocr.languages.iter().any(|l| l.trim().is_empty()) {
            bail!("ocr.languages must not contain empty codes");
        }
        for (name, value) in [
            ("ocr.min_confidence", ocr.min_confidence),
            ("ocr.det_threshold", ocr.det_threshold),
            ("ocr.box_threshold", ocr.box_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }
        if ocr.unclip_ratio.is_nan() || ocr.unclip_ratio <= 0.0 {
            bail!("ocr.unclip_ratio must be positive, got {}", ocr.unclip_ratio);
        }
        if ocr.det_limit_side == 0 || ocr.rec_max_width == 0 || ocr.intra_threads == 0 {
            bail!("ocr.det_limit_side, ocr.rec_max_width and ocr.intra_threads must be non-zero");
        }
        if !self.layout.gap_factor.is_finite() || self.layout.gap_factor < 0.0 {
            bail!(
                "layout.gap_factor must be a finite non-negative number, got {}",
                self.layout.gap_factor
            );
        }

        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from this file
    File(PathBuf),
    /// Defaults; the file does not exist yet
    Missing(PathBuf),
    /// Defaults; no config location could be determined
    Defaults,
}

/// Load the configuration at `path`, falling back to defaults when the file is missing.
/// An existing but unreadable or invalid file is still an error.
pub fn load_or_default(path: Option<&Path>) -> Result<(AppConfig, ConfigSource)> {
    match path {
        Some(path) if path.exists() => {
            Ok((load_config(path)?, ConfigSource::File(path.to_path_buf())))
        }
        Some(path) => Ok((AppConfig::default(), ConfigSource::Missing(path.to_path_buf()))),
        None => Ok((AppConfig::default(), ConfigSource::Defaults)),
    }
}
