//! Callback bridge
//!
//! Exposes a fixed table of commands the UI can invoke. The OCR commands never fail at
//! the dispatch level: every error is folded into an [`OcrResponse::Error`] so the UI
//! always receives the same shape back.

pub mod messages;
pub mod server;

use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{BridgeError, InvokeError};
use crate::layout::{Detection, ParagraphGrouper};
use crate::vision::{VisionConfig, VisionPipeline};

pub use messages::{HostReply, HostRequest};
pub use server::serve;

/// Entry in the command registration table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub description: &'static str,
}

/// Commands invokable from the UI
pub const COMMANDS: &[Command] = &[
    Command {
        name: "greet",
        description: "Return a greeting for the given name",
    },
    Command {
        name: "buffer_to_text",
        description: "Recognize text in an encoded image and group it into paragraphs",
    },
    Command {
        name: "group_detections",
        description: "Group existing OCR detections into paragraphs",
    },
];

/// Result of an OCR command as seen by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OcrResponse {
    Success { paragraphs: Vec<String> },
    Error { paragraphs: Vec<String>, error: String },
}

impl OcrResponse {
    pub fn success(paragraphs: Vec<String>) -> Self {
        OcrResponse::Success { paragraphs }
    }

    pub fn failure(error: &BridgeError) -> Self {
        OcrResponse::Error {
            paragraphs: Vec::new(),
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OcrResponse::Success { .. })
    }

    pub fn paragraphs(&self) -> &[String] {
        match self {
            OcrResponse::Success { paragraphs } => paragraphs,
            OcrResponse::Error { paragraphs, .. } => paragraphs,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            OcrResponse::Success { .. } => None,
            OcrResponse::Error { error, .. } => Some(error),
        }
    }

    /// Serialize to the JSON text handed to the UI
    pub fn to_json(&self) -> String {
        // Only strings inside; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<Result<Vec<String>, BridgeError>> for OcrResponse {
    fn from(result: Result<Vec<String>, BridgeError>) -> Self {
        match result {
            Ok(paragraphs) => OcrResponse::success(paragraphs),
            Err(err) => {
                warn!("OCR request failed ({}): {}", err.kind(), err);
                OcrResponse::failure(&err)
            }
        }
    }
}

/// Image buffer as sent by the UI: an array of byte values or a base64 string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum BufferInput {
    Bytes(Vec<u8>),
    Base64(String),
}

impl TryFrom<Value> for BufferInput {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(values) => values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    byte_value(v).ok_or_else(|| format!("buffer[{i}] = {v} is not a byte"))
                })
                .collect::<Result<Vec<u8>, String>>()
                .map(BufferInput::Bytes),
            Value::String(text) => Ok(BufferInput::Base64(text)),
            _ => Err("buffer must be an array of integers 0..=255 or a base64 string".to_string()),
        }
    }
}

/// Whole numbers in 0..=255, including floats such as `7.0`
fn byte_value(value: &Value) -> Option<u8> {
    let number = value.as_number()?;
    if let Some(n) = number.as_u64() {
        return u8::try_from(n).ok();
    }
    let f = number.as_f64()?;
    if f.fract() == 0.0 && (0.0..=255.0).contains(&f) {
        Some(f as u8)
    } else {
        None
    }
}

impl BufferInput {
    pub fn into_bytes(self) -> Result<Vec<u8>, BridgeError> {
        match self {
            BufferInput::Bytes(bytes) => Ok(bytes),
            BufferInput::Base64(text) => base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| BridgeError::MalformedInput(format!("invalid base64 buffer: {e}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BufferArgs {
    buffer: BufferInput,
    #[serde(default)]
    languages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GroupArgs {
    detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GreetArgs {
    Named { name: String },
    Bare(String),
}

/// Callback bridge between the UI and the OCR pipeline
pub struct Bridge {
    pipeline: Mutex<VisionPipeline>,
    grouper: ParagraphGrouper,
    default_languages: Vec<String>,
}

impl Bridge {
    /// Build a bridge from the application configuration
    pub fn new(config: &AppConfig) -> Self {
        Self::with_pipeline(
            VisionPipeline::new(VisionConfig::from(&config.ocr)),
            ParagraphGrouper::with_gap_factor(config.layout.gap_factor),
            config.ocr.languages.clone(),
        )
    }

    pub fn with_pipeline(
        pipeline: VisionPipeline,
        grouper: ParagraphGrouper,
        default_languages: Vec<String>,
    ) -> Self {
        Self {
            pipeline: Mutex::new(pipeline),
            grouper,
            default_languages,
        }
    }

    pub fn default_languages(&self) -> &[String] {
        &self.default_languages
    }

    pub fn greet(&self, name: &str) -> String {
        format!("{name} from ocr-bridge")
    }

    /// OCR an encoded image and group the detections into paragraphs
    pub fn buffer_to_text(&self, buffer: &[u8], languages: &[String]) -> OcrResponse {
        self.recognize_paragraphs(buffer, languages).into()
    }

    fn recognize_paragraphs(
        &self,
        buffer: &[u8],
        languages: &[String],
    ) -> Result<Vec<String>, BridgeError> {
        let detections = self.pipeline.lock().recognize(buffer, languages)?;
        debug!("Grouping {} detections", detections.len());
        self.grouper.group(&detections)
    }

    /// Group detections produced elsewhere
    pub fn group_detections(&self, detections: &[Detection]) -> OcrResponse {
        self.grouper.group(detections).into()
    }

    /// Dispatch a registered command with JSON arguments
    pub fn invoke(&self, command: &str, args: Value) -> Result<Value, InvokeError> {
        debug!("Invoking command '{}'", command);

        let response: OcrResponse = match command {
            "greet" => {
                let name = match serde_json::from_value::<GreetArgs>(args) {
                    Ok(GreetArgs::Named { name }) | Ok(GreetArgs::Bare(name)) => name,
                    Err(e) => {
                        return Err(InvokeError::InvalidArguments {
                            command: "greet",
                            reason: e.to_string(),
                        })
                    }
                };
                return Ok(Value::String(self.greet(&name)));
            }
            "buffer_to_text" => decode_args::<BufferArgs>(args)
                .and_then(|args| {
                    let languages = args
                        .languages
                        .unwrap_or_else(|| self.default_languages.clone());
                    let bytes = args.buffer.into_bytes()?;
                    self.recognize_paragraphs(&bytes, &languages)
                })
                .into(),
            "group_detections" => decode_args::<GroupArgs>(args)
                .and_then(|args| self.grouper.group(&args.detections))
                .into(),
            other => return Err(InvokeError::UnknownCommand(other.to_string())),
        };

        Ok(serde_json::to_value(response).unwrap_or(Value::Null))
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, BridgeError> {
    serde_json::from_value(args)
        .map_err(|e| BridgeError::MalformedInput(format!("invalid arguments: {e}")))
}
