//! Paragraph grouping
//!
//! Turns raw OCR detections, which arrive in arbitrary order, into paragraphs in
//! reading order. Lines are merged while the vertical gap to the previous line stays
//! within a multiple of the average line height.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::BridgeError;

/// Default multiple of the average line height that separates two paragraphs
pub const DEFAULT_GAP_FACTOR: f64 = 1.5;

/// Single OCR detection as returned by an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Quadrilateral corners in image coordinates (usually 4 points)
    pub bounding_box: Vec<[f64; 2]>,
    /// Recognized text, possibly with surrounding whitespace
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f64,
}

impl Detection {
    /// Create a detection from its corner points
    pub fn new(bounding_box: Vec<[f64; 2]>, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            bounding_box,
            text: text.into(),
            confidence,
        }
    }

    /// Create a detection from an axis-aligned rectangle
    pub fn from_rect(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        text: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::new(
            vec![
                [x, y],
                [x + width, y],
                [x + width, y + height],
                [x, y + height],
            ],
            text,
            confidence,
        )
    }
}

/// Vertical extent and left edge of one detection, with its trimmed text
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub text: String,
    pub y_top: f64,
    pub y_bottom: f64,
    pub x_left: f64,
    pub height: f64,
}

impl NormalizedItem {
    /// Derive the item from a detection's bounding box extremes
    pub fn from_detection(detection: &Detection) -> Result<Self, BridgeError> {
        let Some(first) = detection.bounding_box.first() else {
            return Err(BridgeError::MalformedInput(
                "detection has an empty bounding box".to_string(),
            ));
        };

        let mut y_top = first[1];
        let mut y_bottom = first[1];
        let mut x_left = first[0];

        for &[x, y] in &detection.bounding_box {
            if !x.is_finite() || !y.is_finite() {
                return Err(BridgeError::MalformedInput(format!(
                    "bounding box point ({x}, {y}) is not finite"
                )));
            }
            y_top = y_top.min(y);
            y_bottom = y_bottom.max(y);
            x_left = x_left.min(x);
        }

        Ok(Self {
            text: detection.text.trim().to_string(),
            y_top,
            y_bottom,
            x_left,
            height: y_bottom - y_top,
        })
    }
}

/// Lines merged into one paragraph, in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    items: Vec<NormalizedItem>,
}

impl Paragraph {
    fn start(item: NormalizedItem) -> Self {
        Self { items: vec![item] }
    }

    /// Member texts joined with single spaces
    pub fn text(&self) -> String {
        self.items
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Lines that make up this paragraph
    pub fn items(&self) -> &[NormalizedItem] {
        &self.items
    }

    /// Smallest top coordinate of any member
    pub fn y_top(&self) -> f64 {
        self.items.iter().map(|i| i.y_top).fold(f64::INFINITY, f64::min)
    }

    /// Largest bottom coordinate of any member
    pub fn y_bottom(&self) -> f64 {
        self.items.iter().map(|i| i.y_bottom).fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Groups detections into paragraphs by vertical spacing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParagraphGrouper {
    gap_factor: f64,
}

impl Default for ParagraphGrouper {
    fn default() -> Self {
        Self {
            gap_factor: DEFAULT_GAP_FACTOR,
        }
    }
}

impl ParagraphGrouper {
    /// Create a grouper with the default gap factor (1.5)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a grouper with a custom gap factor.
    ///
    /// Negative or non-finite factors fall back to the default.
    pub fn with_gap_factor(gap_factor: f64) -> Self {
        if gap_factor.is_finite() && gap_factor >= 0.0 {
            Self { gap_factor }
        } else {
            Self::default()
        }
    }

    pub fn gap_factor(&self) -> f64 {
        self.gap_factor
    }

    /// Group detections into paragraph strings in reading order
    pub fn group(&self, detections: &[Detection]) -> Result<Vec<String>, BridgeError> {
        Ok(self
            .group_blocks(detections)?
            .iter()
            .map(Paragraph::text)
            .collect())
    }

    /// Group detections into paragraphs, keeping the member lines
    pub fn group_blocks(&self, detections: &[Detection]) -> Result<Vec<Paragraph>, BridgeError> {
        if detections.is_empty() {
            return Ok(vec![]);
        }

        let mut items = detections
            .iter()
            .enumerate()
            .map(|(index, detection)| {
                NormalizedItem::from_detection(detection).map_err(|e| match e {
                    BridgeError::MalformedInput(msg) => {
                        BridgeError::MalformedInput(format!("detection {index}: {msg}"))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Stable: equal keys keep their input order
        items.sort_by(|a, b| {
            a.y_top
                .partial_cmp(&b.y_top)
                .unwrap_or(Ordering::Equal)
                .then(a.x_left.partial_cmp(&b.x_left).unwrap_or(Ordering::Equal))
        });

        let average_height = items.iter().map(|i| i.height).sum::<f64>() / items.len() as f64;
        let gap_threshold = average_height * self.gap_factor;

        let mut paragraphs = Vec::new();
        let mut items = items.into_iter();
        let Some(first) = items.next() else {
            return Ok(paragraphs);
        };

        let mut previous_bottom = first.y_bottom;
        let mut current = Paragraph::start(first);

        for item in items {
            let gap = item.y_top - previous_bottom;
            previous_bottom = item.y_bottom;

            if gap > gap_threshold {
                paragraphs.push(std::mem::replace(&mut current, Paragraph::start(item)));
            } else {
                current.items.push(item);
            }
        }
        paragraphs.push(current);

        Ok(paragraphs)
    }
}

/// Group detections with the default gap factor
pub fn group_paragraphs(detections: &[Detection]) -> Result<Vec<String>, BridgeError> {
    ParagraphGrouper::default().group(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Detection spanning `y_top..y_bottom` starting at `x`
    fn line(x: f64, y_top: f64, y_bottom: f64, text: &str) -> Detection {
        Detection::from_rect(x, y_top, 100.0, y_bottom - y_top, text, 0.9)
    }

    #[test]
    fn test_empty_input() {
        assert!(group_paragraphs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_single_detection_is_trimmed() {
        let result = group_paragraphs(&[line(0.0, 0.0, 10.0, "  Hello  ")]).unwrap();
        assert_eq!(result, vec!["Hello"]);
    }

    #[test]
    fn test_close_lines_merge() {
        let detections = vec![
            line(0.0, 0.0, 10.0, "Hello"),
            line(0.0, 12.0, 22.0, "World"),
            line(0.0, 24.0, 34.0, "Foo"),
        ];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["Hello World Foo"]);
    }

    #[test]
    fn test_large_gap_splits() {
        let detections = vec![line(0.0, 0.0, 10.0, "Hello"), line(0.0, 50.0, 60.0, "World")];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["Hello", "World"]);
    }

    #[test]
    fn test_same_top_sorted_left_to_right() {
        let detections = vec![
            line(200.0, 0.0, 10.0, "right"),
            line(10.0, 0.0, 10.0, "left"),
        ];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["left right"]);
    }

    #[test]
    fn test_unsorted_input_is_read_top_to_bottom() {
        let detections = vec![
            line(0.0, 50.0, 60.0, "second"),
            line(0.0, 62.0, 72.0, "paragraph"),
            line(0.0, 0.0, 10.0, "first"),
        ];
        assert_eq!(
            group_paragraphs(&detections).unwrap(),
            vec!["first", "second paragraph"]
        );
    }

    #[test]
    fn test_equal_keys_keep_input_order() {
        let detections = vec![
            line(0.0, 0.0, 10.0, "a"),
            line(0.0, 0.0, 10.0, "b"),
            line(0.0, 0.0, 10.0, "c"),
        ];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["a b c"]);
    }

    #[test]
    fn test_gap_measured_from_previous_line() {
        // Each gap is 5, well under the threshold of 15, even though the last line is
        // far below the first one.
        let detections: Vec<_> = (0..10)
            .map(|i| line(0.0, i as f64 * 15.0, i as f64 * 15.0 + 10.0, "x"))
            .collect();
        assert_eq!(group_paragraphs(&detections).unwrap().len(), 1);
    }

    #[test]
    fn test_gap_equal_to_threshold_does_not_split() {
        // Average height 10 -> threshold 15, gap exactly 15
        let detections = vec![line(0.0, 0.0, 10.0, "a"), line(0.0, 25.0, 35.0, "b")];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["a b"]);
    }

    #[test]
    fn test_overlapping_lines_merge() {
        let detections = vec![line(0.0, 0.0, 10.0, "over"), line(0.0, 5.0, 15.0, "lap")];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["over lap"]);
    }

    #[test]
    fn test_zero_height_threshold() {
        // All heights zero -> threshold 0: positive gaps split, zero gaps do not
        let detections = vec![
            line(0.0, 0.0, 0.0, "a"),
            line(0.0, 0.0, 0.0, "b"),
            line(0.0, 1.0, 1.0, "c"),
        ];
        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["a b", "c"]);
    }

    #[test]
    fn test_custom_gap_factor() {
        // Gap of 16: over 1.5 x 10, under 2.0 x 10
        let detections = vec![line(0.0, 0.0, 10.0, "a"), line(0.0, 26.0, 36.0, "b")];

        assert_eq!(group_paragraphs(&detections).unwrap(), vec!["a", "b"]);
        assert_eq!(
            ParagraphGrouper::with_gap_factor(2.0).group(&detections).unwrap(),
            vec!["a b"]
        );
    }

    #[test]
    fn test_invalid_gap_factor_falls_back() {
        assert_eq!(ParagraphGrouper::with_gap_factor(-1.0).gap_factor(), DEFAULT_GAP_FACTOR);
        assert_eq!(ParagraphGrouper::with_gap_factor(f64::NAN).gap_factor(), DEFAULT_GAP_FACTOR);
        assert_eq!(ParagraphGrouper::with_gap_factor(0.0).gap_factor(), 0.0);
    }

    #[test]
    fn test_empty_bounding_box_rejected() {
        let detections = vec![line(0.0, 0.0, 10.0, "ok"), Detection::new(vec![], "bad", 0.5)];

        let err = group_paragraphs(&detections).unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
        assert!(err.to_string().contains("detection 1"));
    }

    #[test]
    fn test_non_finite_point_rejected() {
        let detections = vec![Detection::new(vec![[0.0, f64::NAN]], "bad", 0.5)];
        assert!(matches!(
            group_paragraphs(&detections),
            Err(BridgeError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_every_text_appears_once() {
        let detections = vec![
            line(0.0, 100.0, 110.0, "d"),
            line(0.0, 0.0, 10.0, "a"),
            line(0.0, 12.0, 22.0, "b"),
            line(0.0, 200.0, 210.0, "e"),
            line(50.0, 12.0, 22.0, "c"),
        ];

        let paragraphs = group_paragraphs(&detections).unwrap();
        let words: Vec<&str> = paragraphs.iter().flat_map(|p| p.split(' ')).collect();
        assert_eq!(words, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(paragraphs, vec!["a b c", "d", "e"]);
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let detections = vec![
            line(30.0, 40.0, 52.0, "three"),
            line(0.0, 0.0, 10.0, "one"),
            line(5.0, 11.0, 19.0, "two"),
        ];
        let first = group_paragraphs(&detections).unwrap();
        for _ in 0..5 {
            assert_eq!(group_paragraphs(&detections).unwrap(), first);
        }
    }

    #[test]
    fn test_normalized_item_extremes() {
        let detection = Detection::new(
            vec![[10.0, 5.0], [40.0, 3.0], [42.0, 20.0], [12.0, 22.0]],
            " skewed ",
            0.7,
        );
        let item = NormalizedItem::from_detection(&detection).unwrap();
        assert_eq!(item.text, "skewed");
        assert_eq!(item.y_top, 3.0);
        assert_eq!(item.y_bottom, 22.0);
        assert_eq!(item.x_left, 10.0);
        assert_eq!(item.height, 19.0);
    }

    #[test]
    fn test_paragraph_extent() {
        let detections = vec![line(0.0, 0.0, 10.0, "a"), line(0.0, 12.0, 22.0, "b")];
        let blocks = ParagraphGrouper::new().group_blocks(&detections).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].items().len(), 2);
        assert_eq!(blocks[0].y_top(), 0.0);
        assert_eq!(blocks[0].y_bottom(), 22.0);
    }

    #[test]
    fn test_detection_json_shape() {
        let json = r#"{"bounding_box": [[0, 0], [10, 0], [10, 5], [0, 5]], "text": "hi"}"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.text, "hi");
        assert_eq!(detection.bounding_box.len(), 4);
        assert_eq!(detection.confidence, 0.0);
    }
}
