//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime for text detection and recognition.

use anyhow::{bail, Context, Result};
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{Array2, ArrayD, ArrayView2};
use std::path::Path;
use tracing::{debug, info};

use super::models::{ModelManager, ModelType, OnnxSession};
use super::preprocess::{preprocess_for_detection, preprocess_for_recognition, PreprocessConfig};
use super::{OcrEngine, VisionConfig};
use crate::layout::Detection;

/// Languages the bundled recognition model can read
pub const SUPPORTED_LANGUAGES: &[&str] = &["en"];

/// Shorter side (in probability-map pixels) below which a component is noise
const MIN_BOX_SIDE: f32 = 3.0;

/// Upper bound on text boxes considered per image
const MAX_CANDIDATES: usize = 1000;

/// Parameters of the DB post-processing step
#[derive(Debug, Clone, Copy)]
pub struct DbParams {
    /// Probability above which a pixel counts as text
    pub threshold: f32,
    /// Minimum mean probability of a kept box
    pub box_threshold: f32,
    /// Box growth ratio
    pub unclip_ratio: f32,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
        }
    }
}

/// Axis-aligned text box in probability-map coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    /// Mean text probability inside the component
    pub score: f32,
}

impl TextBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Grow the box on every side by `area * ratio / perimeter`
    pub fn unclip(&self, ratio: f32) -> Self {
        let (w, h) = (self.width(), self.height());
        let perimeter = 2.0 * (w + h);
        let distance = if perimeter > 0.0 { w * h * ratio / perimeter } else { 0.0 };

        Self {
            x0: self.x0 - distance,
            y0: self.y0 - distance,
            x1: self.x1 + distance,
            y1: self.y1 + distance,
            score: self.score,
        }
    }
}

/// Extract text boxes from a DB probability map
pub fn boxes_from_probability_map(map: ArrayView2<f32>, params: &DbParams) -> Vec<TextBox> {
    let (height, width) = map.dim();
    if height == 0 || width == 0 {
        return vec![];
    }

    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if map[[y as usize, x as usize]] > params.threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y, probability sum, pixel count)
    let mut regions: Vec<(u32, u32, u32, u32, f32, u32)> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if regions.len() < label {
            regions.resize(label, (u32::MAX, u32::MAX, 0, 0, 0.0, 0));
        }
        let region = &mut regions[label - 1];
        region.0 = region.0.min(x);
        region.1 = region.1.min(y);
        region.2 = region.2.max(x);
        region.3 = region.3.max(y);
        region.4 += map[[y as usize, x as usize]];
        region.5 += 1;
    }

    regions
        .into_iter()
        .filter(|region| region.5 > 0)
        .take(MAX_CANDIDATES)
        .map(|(min_x, min_y, max_x, max_y, sum, count)| TextBox {
            x0: min_x as f32,
            y0: min_y as f32,
            x1: (max_x + 1) as f32,
            y1: (max_y + 1) as f32,
            score: sum / count as f32,
        })
        .filter(|b| b.width().min(b.height()) >= MIN_BOX_SIDE)
        .filter(|b| b.score >= params.box_threshold)
        .map(|b| b.unclip(params.unclip_ratio))
        .collect()
}

/// Load the CTC character table: blank first, one entry per dictionary line, then space
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {:?}", path))?;
    Ok(parse_dictionary(&content))
}

fn parse_dictionary(content: &str) -> Vec<String> {
    let mut charset = vec![String::new()];
    charset.extend(
        content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    charset.push(" ".to_string());
    charset
}

/// Greedy CTC decoding over a `[time, classes]` probability matrix.
///
/// Returns the text and the mean probability of the emitted characters.
pub fn ctc_decode(probs: ArrayView2<f32>, charset: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut total = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for row in probs.rows() {
        let (index, prob) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        if index != 0 && index != previous {
            if let Some(token) = charset.get(index) {
                text.push_str(token);
                total += prob;
                emitted += 1;
            }
        }
        previous = index;
    }

    let confidence = if emitted == 0 { 0.0 } else { total / emitted as f32 };
    (text, confidence)
}

/// View the last two axes of a model output as a matrix (batch index 0)
fn last_two_axes(output: &ArrayD<f32>) -> Result<Array2<f32>> {
    let shape = output.shape();
    if shape.len() < 2 {
        bail!("Unexpected output shape: {:?}", shape);
    }
    let rows = shape[shape.len() - 2];
    let cols = shape[shape.len() - 1];
    let values: Vec<f32> = output.iter().copied().take(rows * cols).collect();

    Array2::from_shape_vec((rows, cols), values).context("Failed to reshape model output")
}

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct PaddleOcrEngine {
    detection: OnnxSession,
    recognition: OnnxSession,
    charset: Vec<String>,
    preprocess: PreprocessConfig,
    db: DbParams,
}

impl PaddleOcrEngine {
    /// Load the engine for `languages`, fetching model files if needed
    pub fn load(config: &VisionConfig, languages: &[String]) -> Result<Self> {
        if let Some(language) = languages
            .iter()
            .find(|l| !SUPPORTED_LANGUAGES.contains(&l.as_str()))
        {
            bail!(
                "no PaddleOCR recognition model for language '{}' (supported: {})",
                language,
                SUPPORTED_LANGUAGES.join(", ")
            );
        }

        let manager = match &config.models_dir {
            Some(dir) => ModelManager::with_dir(dir.clone())?,
            None => ModelManager::new()?,
        }
        .with_auto_download(config.auto_download);

        let det_path = manager.ensure_model(ModelType::Detection)?;
        let rec_path = manager.ensure_model(ModelType::Recognition)?;
        let dict_path = manager.ensure_model(ModelType::Dictionary)?;

        Self::from_files(&det_path, &rec_path, &dict_path, config)
    }

    /// Load the engine from explicit model files
    pub fn from_files(
        det_path: &Path,
        rec_path: &Path,
        dict_path: &Path,
        config: &VisionConfig,
    ) -> Result<Self> {
        info!("Initializing PaddleOCR backend");

        let charset = load_dictionary(dict_path)?;
        let detection = OnnxSession::new(det_path, config.intra_threads)?;
        let recognition = OnnxSession::new(rec_path, config.intra_threads)?;

        info!(
            "PaddleOCR initialized ({} dictionary entries)",
            charset.len()
        );

        Ok(Self {
            detection,
            recognition,
            charset,
            preprocess: PreprocessConfig {
                det_limit_side: config.det_limit_side,
                rec_max_width: config.rec_max_width,
                ..Default::default()
            },
            db: DbParams {
                threshold: config.det_threshold,
                box_threshold: config.box_threshold,
                unclip_ratio: config.unclip_ratio,
            },
        })
    }

    /// Find text boxes, in source image coordinates as `(x0, y0, x1, y1)`
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<(f32, f32, f32, f32)>> {
        let (width, height) = image.dimensions();
        let input = preprocess_for_detection(image, &self.preprocess);

        let output = self
            .detection
            .run(input.tensor)
            .context("Detection inference failed")?;
        let map = last_two_axes(&output)?;

        let boxes = boxes_from_probability_map(map.view(), &self.db);
        debug!("Detected {} text regions", boxes.len());

        Ok(boxes
            .into_iter()
            .map(|b| {
                (
                    (b.x0 / input.ratio_w).clamp(0.0, width as f32),
                    (b.y0 / input.ratio_h).clamp(0.0, height as f32),
                    (b.x1 / input.ratio_w).clamp(0.0, width as f32),
                    (b.y1 / input.ratio_h).clamp(0.0, height as f32),
                )
            })
            .collect())
    }

    fn recognize(&mut self, crop: &DynamicImage) -> Result<(String, f32)> {
        let tensor = preprocess_for_recognition(crop, &self.preprocess);
        let output = self
            .recognition
            .run(tensor)
            .context("Recognition inference failed")?;
        let probs = last_two_axes(&output)?;

        Ok(ctc_decode(probs.view(), &self.charset))
    }
}

impl OcrEngine for PaddleOcrEngine {
    fn name(&self) -> &'static str {
        "paddle_ocr"
    }

    fn read_text(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();

        for (x0, y0, x1, y1) in self.detect(image)? {
            let left = x0.floor() as u32;
            let top = y0.floor() as u32;
            let crop_w = (x1.ceil() as u32).saturating_sub(left);
            let crop_h = (y1.ceil() as u32).saturating_sub(top);
            if crop_w == 0 || crop_h == 0 {
                continue;
            }

            let crop = image.crop_imm(left, top, crop_w, crop_h);
            let (text, confidence) = self.recognize(&crop)?;
            if text.trim().is_empty() {
                continue;
            }

            detections.push(Detection::new(
                vec![
                    [x0 as f64, y0 as f64],
                    [x1 as f64, y0 as f64],
                    [x1 as f64, y1 as f64],
                    [x0 as f64, y1 as f64],
                ],
                text,
                confidence as f64,
            ));
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayD, IxDyn};

    fn charset(chars: &str) -> Vec<String> {
        parse_dictionary(&chars.chars().map(|c| format!("{c}\n")).collect::<String>())
    }

    #[test]
    fn test_parse_dictionary() {
        let set = parse_dictionary("a\r\nb\n\nc\n");
        assert_eq!(set, vec!["", "a", "b", "c", " "]);
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let set = charset("ab");
        // Steps: a, a, blank, a, b, b
        let probs = array![
            [0.1, 0.8, 0.1, 0.0],
            [0.1, 0.9, 0.0, 0.0],
            [0.9, 0.05, 0.05, 0.0],
            [0.2, 0.7, 0.1, 0.0],
            [0.1, 0.1, 0.8, 0.0],
            [0.0, 0.1, 0.9, 0.0],
        ];

        let (text, confidence) = ctc_decode(probs.view(), &set);
        assert_eq!(text, "aab");
        assert!((confidence - (0.8 + 0.7 + 0.8) / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_ctc_space_token() {
        let set = charset("a");
        // Index 2 is the appended space
        let probs = array![[0.0, 0.9, 0.1], [0.0, 0.1, 0.9], [0.0, 0.9, 0.1]];
        assert_eq!(ctc_decode(probs.view(), &set).0, "a a");
    }

    #[test]
    fn test_ctc_all_blank() {
        let set = charset("a");
        let probs = array![[0.9, 0.1, 0.0], [0.8, 0.2, 0.0]];
        assert_eq!(ctc_decode(probs.view(), &set), (String::new(), 0.0));
    }

    #[test]
    fn test_boxes_from_probability_map() {
        let mut map = Array2::<f32>::zeros((40, 60));
        // Two separated blobs
        for y in 5..10 {
            for x in 5..30 {
                map[[y, x]] = 0.9;
            }
        }
        for y in 25..32 {
            for x in 10..50 {
                map[[y, x]] = 0.8;
            }
        }
        // Speck below the minimum size
        map[[38, 58]] = 0.95;

        let params = DbParams {
            unclip_ratio: 0.0,
            ..Default::default()
        };
        let boxes = boxes_from_probability_map(map.view(), &params);

        assert_eq!(boxes.len(), 2);
        let first = boxes.iter().find(|b| b.y0 < 20.0).unwrap();
        assert_eq!((first.x0, first.y0, first.x1, first.y1), (5.0, 5.0, 30.0, 10.0));
        assert!((first.score - 0.9).abs() < 1e-3);
    }

    #[test]
    fn test_low_score_boxes_dropped() {
        let mut map = Array2::<f32>::zeros((20, 20));
        for y in 2..10 {
            for x in 2..18 {
                map[[y, x]] = 0.4;
            }
        }
        assert!(boxes_from_probability_map(map.view(), &DbParams::default()).is_empty());
    }

    #[test]
    fn test_unclip_grows_box() {
        let b = TextBox {
            x0: 10.0,
            y0: 10.0,
            x1: 30.0,
            y1: 20.0,
            score: 1.0,
        };
        // area 200, perimeter 60, ratio 1.5 -> distance 5
        let grown = b.unclip(1.5);
        assert_eq!((grown.x0, grown.y0, grown.x1, grown.y1), (5.0, 5.0, 35.0, 25.0));
    }

    #[test]
    fn test_last_two_axes() {
        let output = ArrayD::from_shape_vec(IxDyn(&[1, 1, 2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let matrix = last_two_axes(&output).unwrap();
        assert_eq!(matrix.dim(), (2, 3));
        assert_eq!(matrix[[1, 2]], 6.0);

        let flat = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
        assert!(last_two_axes(&flat).is_err());
    }

    #[test]
    fn test_unsupported_language() {
        let config = VisionConfig::default();
        let err = PaddleOcrEngine::load(&config, &["xx".to_string()])
            .err()
            .unwrap();
        assert!(err.to_string().contains("language 'xx'"));
    }
}
