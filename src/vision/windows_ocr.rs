//! Windows OCR API backend
//!
//! Uses the built-in Windows OCR (Media.Ocr). Results are reported per line, with
//! the line box being the union of its word boxes.

use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::{debug, info, warn};
use windows::{
    core::HSTRING,
    Foundation::IAsyncOperation,
    Globalization::Language,
    Graphics::Imaging::{BitmapPixelFormat, SoftwareBitmap},
    Media::Ocr::{OcrEngine as WinOcrEngine, OcrResult as WinOcrResult},
    Storage::Streams::{DataReader, DataWriter, InMemoryRandomAccessStream},
};

use super::OcrEngine;
use crate::layout::Detection;

/// Windows OCR engine wrapper
pub struct WindowsOcr {
    engine: WinOcrEngine,
    language: String,
}

impl WindowsOcr {
    /// Create a new Windows OCR engine with the specified language
    pub fn new(language_tag: &str) -> Result<Self> {
        info!("Initializing Windows OCR engine with language: {}", language_tag);

        let language = Language::CreateLanguage(&HSTRING::from(language_tag))
            .context("Failed to create language")?;

        if !WinOcrEngine::IsLanguageSupported(&language)
            .context("Failed to check language support")?
        {
            warn!("Language '{}' not supported, falling back to user profile language", language_tag);
            let engine = WinOcrEngine::TryCreateFromUserProfileLanguages()
                .context("No OCR language installed for the user profile")?;

            let lang_tag = engine
                .RecognizerLanguage()
                .context("Failed to get recognizer language")?
                .LanguageTag()
                .context("Failed to get language tag")?
                .to_string();

            info!("Windows OCR initialized with language: {}", lang_tag);
            return Ok(Self {
                engine,
                language: lang_tag,
            });
        }

        let engine = WinOcrEngine::TryCreateFromLanguage(&language)
            .context("Failed to create OCR engine for language")?;

        Ok(Self {
            engine,
            language: language_tag.to_string(),
        })
    }

    /// Get the current language
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Get available OCR languages on this system
    pub fn available_languages() -> Result<Vec<String>> {
        let languages = WinOcrEngine::AvailableRecognizerLanguages()
            .context("Failed to get available languages")?;

        let mut result = Vec::new();
        for i in 0..languages.Size().context("Failed to get languages size")? {
            if let Ok(tag) = languages.GetAt(i).and_then(|lang| lang.LanguageTag()) {
                result.push(tag.to_string());
            }
        }

        Ok(result)
    }
}

impl OcrEngine for WindowsOcr {
    fn name(&self) -> &'static str {
        "windows_ocr"
    }

    fn read_text(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Ok(vec![]);
        }

        debug!("Windows OCR: Processing {}x{} image", width, height);

        let bgra = rgba_to_bgra(rgba.as_raw());
        let bitmap = create_software_bitmap(&bgra, width, height)?;
        let ocr_result = run_ocr_sync(&self.engine, &bitmap)?;
        let detections = extract_lines(&ocr_result)?;

        debug!("Windows OCR: Found {} lines", detections.len());
        Ok(detections)
    }
}

/// Convert RGBA to BGRA (Windows expects BGRA)
fn rgba_to_bgra(rgba: &[u8]) -> Vec<u8> {
    let mut bgra = rgba.to_vec();
    for chunk in bgra.chunks_exact_mut(4) {
        chunk.swap(0, 2);
    }
    bgra
}

/// Create a SoftwareBitmap from BGRA data using CopyFromBuffer
fn create_software_bitmap(bgra_data: &[u8], width: u32, height: u32) -> Result<SoftwareBitmap> {
    let stream = InMemoryRandomAccessStream::new().context("Failed to create in-memory stream")?;

    let writer = DataWriter::CreateDataWriter(&stream).context("Failed to create data writer")?;
    writer.WriteBytes(bgra_data).context("Failed to write pixel data")?;
    writer
        .StoreAsync()
        .context("Failed to start store operation")?
        .get()
        .context("Failed to store data")?;
    writer
        .FlushAsync()
        .context("Failed to start flush operation")?
        .get()
        .context("Failed to flush data")?;

    let bitmap = SoftwareBitmap::Create(BitmapPixelFormat::Bgra8, width as i32, height as i32)
        .context("Failed to create SoftwareBitmap")?;

    let input_stream = stream.GetInputStreamAt(0).context("Failed to get input stream")?;
    let reader = DataReader::CreateDataReader(&input_stream).context("Failed to create data reader")?;
    reader
        .LoadAsync(bgra_data.len() as u32)
        .context("Failed to start load operation")?
        .get()
        .context("Failed to load data")?;

    let buffer = reader
        .ReadBuffer(bgra_data.len() as u32)
        .context("Failed to read buffer")?;
    bitmap
        .CopyFromBuffer(&buffer)
        .context("Failed to copy buffer to bitmap")?;

    Ok(bitmap)
}

/// Run OCR synchronously (blocks until complete)
fn run_ocr_sync(engine: &WinOcrEngine, bitmap: &SoftwareBitmap) -> Result<WinOcrResult> {
    let async_op: IAsyncOperation<WinOcrResult> = engine
        .RecognizeAsync(bitmap)
        .context("Failed to start OCR recognition")?;

    async_op.get().context("OCR recognition failed")
}

/// One detection per OCR line
fn extract_lines(ocr_result: &WinOcrResult) -> Result<Vec<Detection>> {
    let mut detections = Vec::new();

    let lines = ocr_result.Lines().context("Failed to get OCR lines")?;

    for i in 0..lines.Size().context("Failed to get lines size")? {
        let line = lines.GetAt(i).context("Failed to get line")?;
        let text = line.Text().context("Failed to get line text")?.to_string();

        let words = line.Words().context("Failed to get words")?;
        let mut bounds: Option<(f64, f64, f64, f64)> = None;

        for j in 0..words.Size().context("Failed to get words size")? {
            let rect = words
                .GetAt(j)
                .context("Failed to get word")?
                .BoundingRect()
                .context("Failed to get bounding rect")?;

            let (x0, y0) = (rect.X as f64, rect.Y as f64);
            let (x1, y1) = (x0 + rect.Width as f64, y0 + rect.Height as f64);

            bounds = Some(match bounds {
                Some((bx0, by0, bx1, by1)) => (bx0.min(x0), by0.min(y0), bx1.max(x1), by1.max(y1)),
                None => (x0, y0, x1, y1),
            });
        }

        // Windows OCR doesn't provide confidence
        if let Some((x0, y0, x1, y1)) = bounds {
            detections.push(Detection::from_rect(x0, y0, x1 - x0, y1 - y0, text, 1.0));
        }
    }

    Ok(detections)
}
