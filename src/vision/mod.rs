//! Vision/OCR Layer
//!
//! Decodes image buffers and runs them through an OCR engine to get text detections.
//! Supports multiple OCR backends:
//! - PaddleOCR via ONNX Runtime (portable, default)
//! - Windows OCR API (Windows only)

pub mod models;
pub mod ocr;
pub mod preprocess;
#[cfg(windows)]
pub mod windows_ocr;

use anyhow::Result;
use image::DynamicImage;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::OcrSettings;
use crate::error::BridgeError;
use crate::layout::Detection;

pub use models::{ModelManager, ModelStatus, ModelType};
pub use ocr::PaddleOcrEngine;
#[cfg(windows)]
pub use windows_ocr::WindowsOcr;

/// OCR backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    /// PaddleOCR via ONNX Runtime
    #[default]
    PaddleOcr,
    /// Windows built-in OCR
    WindowsOcr,
}

/// Configuration for the vision pipeline
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// OCR backend to use
    pub backend: OcrBackend,
    /// Directory with PaddleOCR model files (None = application data directory)
    pub models_dir: Option<PathBuf>,
    /// Download missing PaddleOCR models on first use
    pub auto_download: bool,
    /// Detections below this confidence are dropped
    pub min_confidence: f32,
    /// Longest image side fed to the detection model
    pub det_limit_side: u32,
    /// Text pixel probability threshold
    pub det_threshold: f32,
    /// Minimum mean probability of a text box
    pub box_threshold: f32,
    /// Text box growth ratio
    pub unclip_ratio: f32,
    /// Widest crop fed to the recognition model
    pub rec_max_width: u32,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self::from(&OcrSettings::default())
    }
}

impl From<&OcrSettings> for VisionConfig {
    fn from(settings: &OcrSettings) -> Self {
        Self {
            backend: settings.backend,
            models_dir: settings.models_dir.clone(),
            auto_download: settings.auto_download,
            min_confidence: settings.min_confidence,
            det_limit_side: settings.det_limit_side,
            det_threshold: settings.det_threshold,
            box_threshold: settings.box_threshold,
            unclip_ratio: settings.unclip_ratio,
            rec_max_width: settings.rec_max_width,
            intra_threads: settings.intra_threads,
        }
    }
}

/// Text recognizer producing detections in arbitrary order
pub trait OcrEngine: Send {
    /// Backend identifier used in logs
    fn name(&self) -> &'static str;

    /// Detect and recognize all text in the image
    fn read_text(&mut self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Builds an OCR engine for a set of language codes
pub trait EngineLoader: Send {
    fn load(&self, languages: &[String]) -> Result<Box<dyn OcrEngine>, BridgeError>;
}

/// Loads the engine selected by [`VisionConfig::backend`]
pub struct BackendLoader {
    config: VisionConfig,
}

impl BackendLoader {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }
}

impl EngineLoader for BackendLoader {
    fn load(&self, languages: &[String]) -> Result<Box<dyn OcrEngine>, BridgeError> {
        match self.config.backend {
            OcrBackend::PaddleOcr => {
                let engine = PaddleOcrEngine::load(&self.config, languages)
                    .map_err(BridgeError::unavailable)?;
                Ok(Box::new(engine))
            }
            OcrBackend::WindowsOcr => load_windows_ocr(languages),
        }
    }
}

#[cfg(windows)]
fn load_windows_ocr(languages: &[String]) -> Result<Box<dyn OcrEngine>, BridgeError> {
    let language = languages.first().map(String::as_str).unwrap_or("en");
    let engine = WindowsOcr::new(language).map_err(BridgeError::unavailable)?;
    Ok(Box::new(engine))
}

#[cfg(not(windows))]
fn load_windows_ocr(_languages: &[String]) -> Result<Box<dyn OcrEngine>, BridgeError> {
    Err(BridgeError::CollaboratorUnavailable(
        "the Windows OCR backend is only available on Windows".to_string(),
    ))
}

struct LoadedEngine {
    languages: Vec<String>,
    engine: Box<dyn OcrEngine>,
}

/// Vision processing pipeline: image decoding, engine caching, recognition
pub struct VisionPipeline {
    loader: Box<dyn EngineLoader>,
    loaded: Option<LoadedEngine>,
    min_confidence: f32,
}

impl VisionPipeline {
    /// Create a pipeline that loads the configured backend on first use
    pub fn new(config: VisionConfig) -> Self {
        let min_confidence = config.min_confidence;
        Self::with_loader(Box::new(BackendLoader::new(config)), min_confidence)
    }

    /// Create a pipeline with a custom engine loader
    pub fn with_loader(loader: Box<dyn EngineLoader>, min_confidence: f32) -> Self {
        Self {
            loader,
            loaded: None,
            min_confidence,
        }
    }

    /// Check if an engine is loaded for `languages`
    pub fn is_ocr_ready(&self, languages: &[String]) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|loaded| loaded.languages == languages)
    }

    /// Load (or reuse) the engine for `languages`
    pub fn init_ocr(&mut self, languages: &[String]) -> Result<&mut dyn OcrEngine, BridgeError> {
        if !self.is_ocr_ready(languages) {
            // Drop the old engine first so two models are never resident at once
            self.loaded = None;
            let engine = self.loader.load(languages)?;
            info!("Loaded {} engine for languages {:?}", engine.name(), languages);
            self.loaded = Some(LoadedEngine {
                languages: languages.to_vec(),
                engine,
            });
        }

        match self.loaded.as_mut() {
            Some(loaded) => Ok(loaded.engine.as_mut()),
            None => Err(BridgeError::CollaboratorUnavailable(
                "OCR engine failed to initialize".to_string(),
            )),
        }
    }

    /// Decode an encoded image (PNG, JPEG, ...) and recognize its text
    pub fn recognize(
        &mut self,
        image_bytes: &[u8],
        languages: &[String],
    ) -> Result<Vec<Detection>, BridgeError> {
        if image_bytes.is_empty() {
            return Err(BridgeError::MalformedInput("image buffer is empty".to_string()));
        }
        if languages.is_empty() {
            return Err(BridgeError::MalformedInput(
                "at least one language is required".to_string(),
            ));
        }

        let image = image::load_from_memory(image_bytes).map_err(|e| {
            BridgeError::RecognitionFailure(format!("failed to decode image: {e}"))
        })?;

        self.recognize_image(&image, languages)
    }

    /// Recognize text in an already decoded image
    pub fn recognize_image(
        &mut self,
        image: &DynamicImage,
        languages: &[String],
    ) -> Result<Vec<Detection>, BridgeError> {
        let min_confidence = self.min_confidence as f64;
        let engine = self.init_ocr(languages)?;

        let start = Instant::now();
        let detections = engine.read_text(image).map_err(BridgeError::recognition)?;
        let total = detections.len();

        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= min_confidence)
            .collect();

        debug!(
            "OCR ({}) complete in {:?}: {} detections, {} kept",
            engine.name(),
            start.elapsed(),
            total,
            detections.len()
        );

        Ok(detections)
    }
}
