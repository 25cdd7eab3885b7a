//! ocr-bridge - OCR callback bridge for desktop UIs
//!
//! Runs OCR on an image buffer handed over by a UI and returns the recognized text
//! grouped into paragraphs, as a fixed `{"status", "paragraphs", "error"}` shape.

pub mod bridge;
pub mod config;
pub mod error;
pub mod layout;
pub mod storage;
pub mod vision;

pub use bridge::{Bridge, OcrResponse, COMMANDS};
pub use config::AppConfig;
pub use error::{BridgeError, InvokeError};
pub use layout::{group_paragraphs, Detection, ParagraphGrouper};
