//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, and tensor conversion for PaddleOCR models.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side fed to the detection model (rounded to a multiple of 32)
    pub det_limit_side: u32,
    /// Target height for recognition model (typically 32 or 48)
    pub rec_target_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
    /// Detection normalization mean [R, G, B] (ImageNet)
    pub det_mean: [f32; 3],
    /// Detection normalization std [R, G, B] (ImageNet)
    pub det_std: [f32; 3],
    /// Recognition normalization mean, maps [0, 255] -> [-1, 1]
    pub rec_mean: [f32; 3],
    /// Recognition normalization std
    pub rec_std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_limit_side: 960,
            rec_target_height: 48,
            rec_max_width: 960,
            det_mean: [0.485, 0.456, 0.406],
            det_std: [0.229, 0.224, 0.225],
            rec_mean: [0.5, 0.5, 0.5],
            rec_std: [0.5, 0.5, 0.5],
        }
    }
}

/// Image resized for the detection model, with the per-axis scale factors applied
#[derive(Debug)]
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    /// resized height / source height
    pub ratio_h: f32,
    /// resized width / source width
    pub ratio_w: f32,
}

/// Convert an RGB image to a normalized NCHW tensor (batch size 1)
pub fn to_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (w, h) = image.dimensions();

    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        let value = image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - mean[c]) / std[c]
    })
}

/// Detection input size: longer side capped at `limit_side`, both sides rounded
/// to a multiple of 32 (at least 32)
pub fn detection_size(width: u32, height: u32, limit_side: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f32;
    let ratio = if longest > limit_side as f32 {
        limit_side as f32 / longest
    } else {
        1.0
    };

    let round32 = |side: u32| -> u32 {
        let scaled = (side as f32 * ratio / 32.0).round() as u32 * 32;
        scaled.max(32)
    };

    (round32(width), round32(height))
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &DynamicImage, config: &PreprocessConfig) -> DetectionInput {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = detection_size(width, height, config.det_limit_side);

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    DetectionInput {
        tensor: to_nchw(&resized, &config.det_mean, &config.det_std),
        ratio_h: new_h as f32 / height.max(1) as f32,
        ratio_w: new_w as f32 / width.max(1) as f32,
    }
}

/// Recognition input width for a crop, keeping its aspect ratio
pub fn recognition_width(width: u32, height: u32, target_height: u32, max_width: u32) -> u32 {
    let scale = target_height as f32 / height.max(1) as f32;
    ((width as f32 * scale).ceil() as u32).clamp(4, max_width.max(4))
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(crop: &DynamicImage, config: &PreprocessConfig) -> Array4<f32> {
    let (width, height) = crop.dimensions();
    let new_w = recognition_width(width, height, config.rec_target_height, config.rec_max_width);

    let resized = crop
        .resize_exact(new_w, config.rec_target_height, FilterType::Triangle)
        .to_rgb8();

    to_nchw(&resized, &config.rec_mean, &config.rec_std)
}
