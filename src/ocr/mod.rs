mod background;
mod engine;
mod font;
mod geom;
mod layout;
mod merge;
mod pipeline;
mod preprocess;
mod render;
mod select;
mod text;

use serde::Serialize;

pub use engine::{
    EngineHandle, Recognizer, TesseractRecognizer, build_recognizer, list_tesseract_languages,
};
pub use font::{FontMetrics, OverlayFonts, ResolvedOverlayFont, WritingSystem};
pub use geom::Rect;
pub use merge::merge_segments;
pub use pipeline::{OcrPipeline, PipelineReport};
pub use render::{OverlayLine, OverlayOptions, render_overlay};
pub use select::{config_priority, score, select_best, short_circuits, word_frequencies};
pub use text::normalize_text;

/// Four corner points in pixel coordinates, clockwise from the top-left.
pub type Quad = [[f64; 2]; 4];

/// One raw recognition result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: Quad,
    pub text: String,
    pub confidence: f64,
}

/// A detection that passed the confidence floor and normalized to non-empty text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub text: String,
    pub bbox: Quad,
    pub confidence: f64,
}

/// Reading-order group of segments produced by [`merge_segments`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub text: String,
    pub bbox: Quad,
    pub confidence: f64,
    pub children: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    Original,
    Resized,
    Deskewed,
}

impl CoordinateSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinateSpace::Original => "original",
            CoordinateSpace::Resized => "resized",
            CoordinateSpace::Deskewed => "deskewed",
        }
    }
}

/// Whole-image transcript from a single recognition pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub text: String,
    pub length: usize,
    pub config: String,
    pub engine: String,
    pub confidence: f64,
    pub segments: Vec<Segment>,
    pub coordinate_space: CoordinateSpace,
}

impl Candidate {
    /// Builds a candidate from already-normalized segments.
    ///
    /// Returns `None` when there are no segments or the joined text normalizes
    /// to nothing; an empty pass never produces a fallback candidate.
    pub fn from_segments(
        segments: Vec<Segment>,
        config: impl Into<String>,
        engine: impl Into<String>,
        coordinate_space: CoordinateSpace,
    ) -> Option<Self> {
        if segments.is_empty() {
            return None;
        }
        let joined = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let text = normalize_text(&joined);
        if text.is_empty() {
            return None;
        }
        let confidence =
            segments.iter().map(|segment| segment.confidence).sum::<f64>() / segments.len() as f64;
        Some(Self {
            length: text.chars().count(),
            text,
            config: config.into(),
            engine: engine.into(),
            confidence,
            segments,
            coordinate_space,
        })
    }
}

/// Keeps detections at or above `min_confidence` whose text survives normalization.
pub fn segments_from_detections(detections: &[Detection], min_confidence: f64) -> Vec<Segment> {
    detections
        .iter()
        .filter(|detection| detection.confidence >= min_confidence)
        .filter_map(|detection| {
            let text = normalize_text(&detection.text);
            if text.is_empty() {
                None
            } else {
                Some(Segment {
                    text,
                    bbox: detection.bbox,
                    confidence: detection.confidence,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{detection, segment};

    #[test]
    fn below_floor_detections_never_become_segments() {
        let detections = vec![
            detection("Hello", 0.0, 0.0, 50.0, 20.0, 0.9),
            detection("noise", 60.0, 0.0, 50.0, 20.0, 0.05),
            detection("|", 120.0, 0.0, 5.0, 20.0, 0.9),
        ];
        let segments = segments_from_detections(&detections, 0.1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Hello");
    }

    #[test]
    fn candidate_confidence_is_mean_of_kept_segments() {
        let segments = vec![
            segment("Hello", 0.0, 0.0, 50.0, 20.0, 0.9),
            segment("World", 60.0, 0.0, 50.0, 20.0, 0.5),
        ];
        let candidate =
            Candidate::from_segments(segments, "original", "scripted", CoordinateSpace::Original)
                .expect("candidate");
        assert_eq!(candidate.text, "Hello World");
        assert_eq!(candidate.length, 11);
        assert!((candidate.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn empty_pass_yields_no_candidate() {
        assert!(
            Candidate::from_segments(Vec::new(), "original", "x", CoordinateSpace::Original)
                .is_none()
        );
    }

    #[test]
    fn coordinate_space_serializes_lowercase() {
        let value = serde_json::to_value(CoordinateSpace::Deskewed).unwrap();
        assert_eq!(value, serde_json::json!("deskewed"));
    }
}
